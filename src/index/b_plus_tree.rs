use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{PageId, QuarryError, RecordId, Result, INVALID_PAGE_ID};
use crate::storage::page::HeaderPage;

use super::btree_page::{
    internal_capacity, leaf_capacity, set_parent_page_id, BTreePageRef, InternalPage,
    InternalPageRef, LeafPage, LeafPageRef,
};
use super::{IndexIterator, KeyComparator};

/// Page id of the header page mapping object names to root pages.
pub const HEADER_PAGE_ID: PageId = PageId::new(0);

/// Occupancy summary returned by [`BPlusTree::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeSummary {
    /// Levels from root to leaf; 0 for an empty tree, 1 for a root leaf
    pub height: usize,
    pub leaf_pages: usize,
    pub key_count: usize,
}

/// A persistent, concurrent, unique-key B+tree over fixed-width byte keys.
///
/// All nodes live in buffer-pool pages and reference each other by page id;
/// the root page id is registered in the header page under the tree's name.
/// Write operations descend with latch coupling in its conservative form:
/// the per-page write latches from root to leaf stay held until the
/// operation completes, so structural changes never expose a torn tree.
/// Read operations crab: the child's read latch is taken before the
/// parent's is released.
pub struct BPlusTree {
    name: String,
    buffer_pool: Arc<BufferPoolManager>,
    comparator: Arc<dyn KeyComparator>,
    key_size: usize,
    /// Order M: a leaf splits when it reaches M keys, an internal node when
    /// it exceeds M children
    order: usize,
    /// Guards the root page id; held across whole write operations since
    /// any of them may swap the root
    root: Mutex<PageId>,
}

impl BPlusTree {
    /// Opens (or registers) the tree named `name`, picking up an existing
    /// root from the header page.
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        key_size: usize,
        order: usize,
    ) -> Result<Self> {
        if order < 2 || order > leaf_capacity(key_size) || order + 1 > internal_capacity(key_size) {
            return Err(QuarryError::OrderOutOfRange { order, key_size });
        }

        let name = name.into();
        Self::ensure_header_page(&buffer_pool)?;

        let root = {
            let mut guard = buffer_pool.fetch_page_write(HEADER_PAGE_ID)?;
            let mut header = HeaderPage::new(guard.data_mut());
            match header.get_root_id(&name) {
                Some(root) => root,
                None => {
                    // First open, or a registered tree whose storage was
                    // emptied; a duplicate registration means the latter.
                    match header.insert_record(&name, INVALID_PAGE_ID) {
                        Ok(()) => {}
                        Err(e @ (QuarryError::NameTooLong(_) | QuarryError::HeaderFull)) => {
                            return Err(e);
                        }
                        Err(_) => debug!(tree = %name, "reopening emptied tree"),
                    }
                    INVALID_PAGE_ID
                }
            }
        };

        Ok(Self {
            name,
            buffer_pool,
            comparator,
            key_size,
            order,
            root: Mutex::new(root),
        })
    }

    fn ensure_header_page(buffer_pool: &Arc<BufferPoolManager>) -> Result<()> {
        match buffer_pool.fetch_page_read(HEADER_PAGE_ID) {
            Ok(_) => Ok(()),
            Err(QuarryError::Io(_)) => {
                let mut guard = buffer_pool.new_page()?;
                assert_eq!(guard.page_id(), HEADER_PAGE_ID, "header page must be page 0");
                HeaderPage::new(guard.data_mut()).init();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn is_empty(&self) -> bool {
        *self.root.lock() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root.lock()
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_size {
            return Err(QuarryError::Corruption(format!(
                "key width {} does not match index width {}",
                key.len(),
                self.key_size
            )));
        }
        Ok(())
    }

    /// Minimum keys a non-root leaf must keep.
    fn leaf_min(&self) -> usize {
        (self.order - 1).div_ceil(2)
    }

    /// Minimum children a non-root internal node must keep.
    fn internal_min(&self) -> usize {
        self.order.div_ceil(2)
    }

    /// Point lookup.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<RecordId>> {
        self.check_key(key)?;

        let mut guard = {
            let root = self.root.lock();
            if *root == INVALID_PAGE_ID {
                return Ok(None);
            }
            self.buffer_pool.fetch_page_read(*root)?
        };

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                let leaf = LeafPageRef::new(guard.data(), self.key_size);
                return Ok(leaf
                    .find(key, &*self.comparator)
                    .map(|index| leaf.rid_at(index)));
            }
            let child = InternalPageRef::new(guard.data(), self.key_size)
                .lookup(key, &*self.comparator);
            // Take the child's latch before letting the parent's go
            let child_guard = self.buffer_pool.fetch_page_read(child)?;
            guard = child_guard;
        }
    }

    /// Inserts a unique key.
    pub fn insert(&self, key: &[u8], rid: RecordId) -> Result<()> {
        self.check_key(key)?;
        let mut root = self.root.lock();

        if *root == INVALID_PAGE_ID {
            let mut guard = self.buffer_pool.new_page()?;
            let page_id = guard.page_id();
            let mut leaf = LeafPage::new(guard.data_mut(), self.key_size);
            leaf.init(page_id, self.order);
            leaf.insert(key, rid, &*self.comparator);
            drop(guard);
            self.set_root(&mut root, page_id)?;
            return Ok(());
        }

        let mut path = self.descend_for_write(*root, key)?;

        {
            let leaf_guard = path.last_mut().expect("descent produced no leaf");
            let mut leaf = LeafPage::new(leaf_guard.data_mut(), self.key_size);
            if leaf.find(key, &*self.comparator).is_some() {
                return Err(QuarryError::DuplicateKey);
            }
            leaf.insert(key, rid, &*self.comparator);
            if leaf.size() < self.order {
                return Ok(());
            }
        }

        self.split_leaf_and_propagate(&mut root, path)
    }

    /// Removes a key, rebalancing by redistribution or merge as needed.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;
        let mut root = self.root.lock();

        if *root == INVALID_PAGE_ID {
            return Err(QuarryError::KeyNotFound);
        }

        let mut path = self.descend_for_write(*root, key)?;

        {
            let leaf_guard = path.last_mut().expect("descent produced no leaf");
            let mut leaf = LeafPage::new(leaf_guard.data_mut(), self.key_size);
            let Some(index) = leaf.find(key, &*self.comparator) else {
                return Err(QuarryError::KeyNotFound);
            };
            leaf.remove_at(index);
        }

        self.rebalance_after_delete(&mut root, path)
    }

    /// Iterator over the whole tree in key order.
    pub fn iter(&self) -> Result<IndexIterator> {
        let Some(mut guard) = self.latch_root_for_read()? else {
            return Ok(IndexIterator::exhausted(
                Arc::clone(&self.buffer_pool),
                self.key_size,
            ));
        };

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                return Ok(IndexIterator::new(
                    Arc::clone(&self.buffer_pool),
                    self.key_size,
                    guard,
                    0,
                ));
            }
            let child = InternalPageRef::new(guard.data(), self.key_size).leftmost_child();
            let child_guard = self.buffer_pool.fetch_page_read(child)?;
            guard = child_guard;
        }
    }

    /// Iterator positioned at the first key >= `key`.
    pub fn iter_from(&self, key: &[u8]) -> Result<IndexIterator> {
        self.check_key(key)?;
        let Some(mut guard) = self.latch_root_for_read()? else {
            return Ok(IndexIterator::exhausted(
                Arc::clone(&self.buffer_pool),
                self.key_size,
            ));
        };

        loop {
            if BTreePageRef::new(guard.data()).is_leaf() {
                let index = LeafPageRef::new(guard.data(), self.key_size)
                    .lower_bound(key, &*self.comparator);
                return Ok(IndexIterator::new(
                    Arc::clone(&self.buffer_pool),
                    self.key_size,
                    guard,
                    index,
                ));
            }
            let child =
                InternalPageRef::new(guard.data(), self.key_size).lookup(key, &*self.comparator);
            let child_guard = self.buffer_pool.fetch_page_read(child)?;
            guard = child_guard;
        }
    }

    fn latch_root_for_read(&self) -> Result<Option<crate::buffer::ReadPageGuard>> {
        let root = self.root.lock();
        if *root == INVALID_PAGE_ID {
            return Ok(None);
        }
        Ok(Some(self.buffer_pool.fetch_page_read(*root)?))
    }

    /// Descends from `root` to the leaf owning `key`, returning the write
    /// guards for the whole path (conservative crabbing: nothing is
    /// released until the operation completes).
    fn descend_for_write(&self, root: PageId, key: &[u8]) -> Result<Vec<WritePageGuard>> {
        let mut path = Vec::new();
        let mut current = root;
        loop {
            let guard = self.buffer_pool.fetch_page_write(current)?;
            if BTreePageRef::new(guard.data()).is_leaf() {
                path.push(guard);
                return Ok(path);
            }
            let child =
                InternalPageRef::new(guard.data(), self.key_size).lookup(key, &*self.comparator);
            path.push(guard);
            current = child;
        }
    }

    fn split_leaf_and_propagate(
        &self,
        root: &mut PageId,
        mut path: Vec<WritePageGuard>,
    ) -> Result<()> {
        let mut leaf_guard = path.pop().expect("descent produced no leaf");
        let mut new_guard = self.buffer_pool.new_page()?;
        let new_page_id = new_guard.page_id();

        let separator = {
            let mut leaf = LeafPage::new(leaf_guard.data_mut(), self.key_size);
            let mut new_leaf = LeafPage::new(new_guard.data_mut(), self.key_size);
            new_leaf.init(new_page_id, self.order);

            let separator = leaf.split_into(&mut new_leaf);
            new_leaf.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(Some(new_page_id));
            new_leaf.set_parent_page_id(leaf.parent_page_id());
            separator
        };

        self.insert_into_parent(root, path, leaf_guard, separator, new_guard)
    }

    /// Wires a freshly split pair (left, right) into their parent, growing
    /// a new root when the left node was the root, and splitting parents
    /// recursively while they overflow.
    fn insert_into_parent(
        &self,
        root: &mut PageId,
        mut path: Vec<WritePageGuard>,
        mut left_guard: WritePageGuard,
        mut separator: Vec<u8>,
        mut right_guard: WritePageGuard,
    ) -> Result<()> {
        loop {
            if path.is_empty() {
                // The split node was the root; grow the tree by one level.
                let mut root_guard = self.buffer_pool.new_page()?;
                let root_page_id = root_guard.page_id();
                {
                    let mut new_root = InternalPage::new(root_guard.data_mut(), self.key_size);
                    new_root.init(root_page_id, self.order);
                    new_root.populate_new_root(
                        left_guard.page_id(),
                        &separator,
                        right_guard.page_id(),
                    );
                }
                set_parent_page_id(left_guard.data_mut(), Some(root_page_id));
                set_parent_page_id(right_guard.data_mut(), Some(root_page_id));
                drop(left_guard);
                drop(right_guard);
                drop(root_guard);

                debug!(tree = %self.name, new_root = %root_page_id, "root split");
                return self.set_root(root, root_page_id);
            }

            let mut parent_guard = path.pop().expect("checked non-empty");
            let left_page_id = left_guard.page_id();
            let right_page_id = right_guard.page_id();

            set_parent_page_id(right_guard.data_mut(), Some(parent_guard.page_id()));
            {
                let mut parent = InternalPage::new(parent_guard.data_mut(), self.key_size);
                parent.insert_after(left_page_id, &separator, right_page_id);
            }
            drop(left_guard);
            drop(right_guard);

            if InternalPageRef::new(parent_guard.data(), self.key_size).size() <= self.order {
                return Ok(());
            }

            // The parent overflowed; split it and carry on upward.
            let mut new_guard = self.buffer_pool.new_page()?;
            let new_page_id = new_guard.page_id();

            let (new_separator, moved_children) = {
                let mut parent = InternalPage::new(parent_guard.data_mut(), self.key_size);
                let mut new_node = InternalPage::new(new_guard.data_mut(), self.key_size);
                new_node.init(new_page_id, self.order);
                let result = parent.split_into(&mut new_node);
                new_node.set_parent_page_id(parent.parent_page_id());
                result
            };

            for child in moved_children {
                let mut child_guard = self.buffer_pool.fetch_page_write(child)?;
                set_parent_page_id(child_guard.data_mut(), Some(new_page_id));
            }

            separator = new_separator;
            left_guard = parent_guard;
            right_guard = new_guard;
        }
    }

    /// Walks back up the path fixing underflow: redistribute from a
    /// sibling when it can spare a pair, merge otherwise, recursing on the
    /// parent when the merge leaves it deficient.
    fn rebalance_after_delete(
        &self,
        root: &mut PageId,
        mut path: Vec<WritePageGuard>,
    ) -> Result<()> {
        loop {
            let node_guard = path.pop().expect("rebalance popped past the root");

            if path.is_empty() {
                return self.adjust_root(root, node_guard);
            }

            let (is_leaf, size) = {
                let node = BTreePageRef::new(node_guard.data());
                (node.is_leaf(), node.size())
            };
            let min = if is_leaf {
                self.leaf_min()
            } else {
                self.internal_min()
            };
            if size >= min {
                return Ok(());
            }

            let merged = self.fix_deficient_node(path.last_mut().expect("checked"), node_guard)?;
            if !merged {
                return Ok(());
            }
            // A merge removed a separator from the parent; it may now be
            // deficient itself.
        }
    }

    /// Redistributes into or merges the deficient node using a sibling
    /// chosen from its parent (left preferred). Returns true when a merge
    /// removed a separator from the parent.
    fn fix_deficient_node(
        &self,
        parent_guard: &mut WritePageGuard,
        node_guard: WritePageGuard,
    ) -> Result<bool> {
        let node_page_id = node_guard.page_id();
        let is_leaf = BTreePageRef::new(node_guard.data()).is_leaf();

        let (node_index, sibling_page_id) = {
            let parent = InternalPageRef::new(parent_guard.data(), self.key_size);
            let node_index = parent.child_index_of(node_page_id).ok_or_else(|| {
                QuarryError::Corruption(format!(
                    "node {} missing from its parent {}",
                    node_page_id,
                    parent_guard.page_id()
                ))
            })?;
            let sibling_index = if node_index > 0 {
                node_index - 1
            } else {
                node_index + 1
            };
            (node_index, parent.child_at(sibling_index))
        };

        // Latch siblings left to right: when the sibling sits to the left,
        // release the node and reacquire it after the sibling. The parent's
        // exclusive latch keeps the pair stable meanwhile.
        let (mut left_guard, mut right_guard, left_is_sibling) = if node_index > 0 {
            drop(node_guard);
            let sibling_guard = self.buffer_pool.fetch_page_write(sibling_page_id)?;
            let node_guard = self.buffer_pool.fetch_page_write(node_page_id)?;
            (sibling_guard, node_guard, true)
        } else {
            let sibling_guard = self.buffer_pool.fetch_page_write(sibling_page_id)?;
            (node_guard, sibling_guard, false)
        };

        let sibling_size = if left_is_sibling {
            BTreePageRef::new(left_guard.data()).size()
        } else {
            BTreePageRef::new(right_guard.data()).size()
        };
        let min = if is_leaf {
            self.leaf_min()
        } else {
            self.internal_min()
        };

        // The separator between left and right sits at the right node's
        // index in the parent.
        let separator_index = if left_is_sibling { node_index } else { 1 };

        if sibling_size > min {
            self.redistribute(
                parent_guard,
                &mut left_guard,
                &mut right_guard,
                separator_index,
                left_is_sibling,
                is_leaf,
            )?;
            return Ok(false);
        }

        self.merge(
            parent_guard,
            &mut left_guard,
            right_guard,
            separator_index,
            is_leaf,
        )?;
        Ok(true)
    }

    /// Moves one pair across the boundary and refreshes the separator.
    fn redistribute(
        &self,
        parent_guard: &mut WritePageGuard,
        left_guard: &mut WritePageGuard,
        right_guard: &mut WritePageGuard,
        separator_index: usize,
        from_left: bool,
        is_leaf: bool,
    ) -> Result<()> {
        if is_leaf {
            let mut left = LeafPage::new(left_guard.data_mut(), self.key_size);
            let mut right = LeafPage::new(right_guard.data_mut(), self.key_size);
            let mut parent = InternalPage::new(parent_guard.data_mut(), self.key_size);

            if from_left {
                let (key, rid) = left.pop_last();
                right.push_front(&key, rid);
                parent.set_key_at(separator_index, &key);
            } else {
                let (key, rid) = right.pop_first();
                left.push_back(&key, rid);
                let new_separator = right.key_at(0).to_vec();
                parent.set_key_at(separator_index, &new_separator);
            }
        } else {
            let separator = {
                let parent = InternalPageRef::new(parent_guard.data(), self.key_size);
                parent.key_at(separator_index).to_vec()
            };

            if from_left {
                let moved_child;
                let new_separator;
                {
                    let mut left = InternalPage::new(left_guard.data_mut(), self.key_size);
                    let (key, child) = left.pop_last();
                    moved_child = child;
                    new_separator = key;
                }
                {
                    let mut right = InternalPage::new(right_guard.data_mut(), self.key_size);
                    right.push_front(moved_child, &separator);
                }
                InternalPage::new(parent_guard.data_mut(), self.key_size)
                    .set_key_at(separator_index, &new_separator);

                let mut child_guard = self.buffer_pool.fetch_page_write(moved_child)?;
                set_parent_page_id(child_guard.data_mut(), Some(right_guard.page_id()));
            } else {
                let moved_child;
                let new_separator;
                {
                    let mut right = InternalPage::new(right_guard.data_mut(), self.key_size);
                    moved_child = right.pop_first();
                    new_separator = right.key_at(0).to_vec();
                }
                {
                    let mut left = InternalPage::new(left_guard.data_mut(), self.key_size);
                    left.push_back(&separator, moved_child);
                }
                InternalPage::new(parent_guard.data_mut(), self.key_size)
                    .set_key_at(separator_index, &new_separator);

                let mut child_guard = self.buffer_pool.fetch_page_write(moved_child)?;
                set_parent_page_id(child_guard.data_mut(), Some(left_guard.page_id()));
            }
        }
        Ok(())
    }

    /// Folds the right node into the left one, drops the separator from
    /// the parent and retires the right page.
    fn merge(
        &self,
        parent_guard: &mut WritePageGuard,
        left_guard: &mut WritePageGuard,
        mut right_guard: WritePageGuard,
        separator_index: usize,
        is_leaf: bool,
    ) -> Result<()> {
        let right_page_id = right_guard.page_id();

        if is_leaf {
            let mut left = LeafPage::new(left_guard.data_mut(), self.key_size);
            let right = LeafPage::new(right_guard.data_mut(), self.key_size);
            let right_next = right.next_page_id();
            left.merge_from(&right);
            left.set_next_page_id(right_next);
        } else {
            let separator = {
                let parent = InternalPageRef::new(parent_guard.data(), self.key_size);
                parent.key_at(separator_index).to_vec()
            };
            let adopted = {
                let mut left = InternalPage::new(left_guard.data_mut(), self.key_size);
                let right = InternalPage::new(right_guard.data_mut(), self.key_size);
                left.merge_from(&right, &separator)
            };
            let left_page_id = left_guard.page_id();
            for child in adopted {
                let mut child_guard = self.buffer_pool.fetch_page_write(child)?;
                set_parent_page_id(child_guard.data_mut(), Some(left_page_id));
            }
        }

        InternalPage::new(parent_guard.data_mut(), self.key_size).remove_at(separator_index);

        drop(right_guard);
        // A racing fetch may still pin the retired page; it is unlinked
        // either way and deallocation is deferred.
        let _ = self.buffer_pool.delete_page(right_page_id);
        debug!(tree = %self.name, page = %right_page_id, "merged tree page");
        Ok(())
    }

    /// Collapses the root when it became trivial: an internal root with a
    /// single child promotes that child; an emptied leaf root clears the
    /// tree.
    fn adjust_root(&self, root: &mut PageId, node_guard: WritePageGuard) -> Result<()> {
        let (is_leaf, size) = {
            let node = BTreePageRef::new(node_guard.data());
            (node.is_leaf(), node.size())
        };
        let old_root_page_id = node_guard.page_id();

        if !is_leaf && size == 1 {
            let child =
                InternalPageRef::new(node_guard.data(), self.key_size).leftmost_child();
            {
                let mut child_guard = self.buffer_pool.fetch_page_write(child)?;
                set_parent_page_id(child_guard.data_mut(), None);
            }
            drop(node_guard);
            self.set_root(root, child)?;
            let _ = self.buffer_pool.delete_page(old_root_page_id);
            debug!(tree = %self.name, new_root = %child, "root collapsed");
        } else if is_leaf && size == 0 {
            drop(node_guard);
            self.set_root(root, INVALID_PAGE_ID)?;
            let _ = self.buffer_pool.delete_page(old_root_page_id);
            debug!(tree = %self.name, "tree emptied");
        }
        Ok(())
    }

    /// Updates the in-memory root and the header-page registration.
    fn set_root(&self, root: &mut PageId, new_root: PageId) -> Result<()> {
        *root = new_root;
        let mut guard = self.buffer_pool.fetch_page_write(HEADER_PAGE_ID)?;
        HeaderPage::new(guard.data_mut()).update_record(&self.name, new_root)
    }

    /// Walks the whole tree checking structural invariants: keys strictly
    /// increasing in every node, occupancy within bounds, parent hints
    /// consistent, all leaves at the same depth and the leaf chain sorted.
    /// Test support; runs unlatched against a quiescent tree.
    pub fn verify(&self) -> Result<TreeSummary> {
        let root = *self.root.lock();
        if root == INVALID_PAGE_ID {
            return Ok(TreeSummary {
                height: 0,
                leaf_pages: 0,
                key_count: 0,
            });
        }

        let mut summary = TreeSummary {
            height: 0,
            leaf_pages: 0,
            key_count: 0,
        };
        let mut first_leaf = None;
        self.verify_node(root, true, None, &mut summary, 1, &mut first_leaf)?;

        // The leaf chain must cover exactly the counted leaves, in order.
        let mut chained = 0;
        let mut previous_last_key: Option<Vec<u8>> = None;
        let mut current = first_leaf;
        while let Some(page_id) = current {
            let guard = self.buffer_pool.fetch_page_read(page_id)?;
            let leaf = LeafPageRef::new(guard.data(), self.key_size);
            if leaf.size() > 0 {
                if let Some(prev) = &previous_last_key {
                    if self.comparator.compare(prev, leaf.key_at(0))
                        != std::cmp::Ordering::Less
                    {
                        return Err(QuarryError::Corruption(format!(
                            "leaf chain out of order at page {}",
                            page_id
                        )));
                    }
                }
                previous_last_key = Some(leaf.key_at(leaf.size() - 1).to_vec());
            }
            chained += 1;
            if chained > summary.leaf_pages {
                return Err(QuarryError::Corruption(
                    "leaf chain longer than the tree (cycle?)".to_string(),
                ));
            }
            current = leaf.next_page_id();
        }
        if chained != summary.leaf_pages {
            return Err(QuarryError::Corruption(format!(
                "leaf chain covers {} of {} leaves",
                chained, summary.leaf_pages
            )));
        }

        Ok(summary)
    }

    fn verify_node(
        &self,
        page_id: PageId,
        is_root: bool,
        expected_parent: Option<PageId>,
        summary: &mut TreeSummary,
        depth: usize,
        first_leaf: &mut Option<PageId>,
    ) -> Result<()> {
        let guard = self.buffer_pool.fetch_page_read(page_id)?;
        let header = BTreePageRef::new(guard.data());

        if header.parent_page_id() != expected_parent {
            return Err(QuarryError::Corruption(format!(
                "parent hint of {} is {:?}, expected {:?}",
                page_id,
                header.parent_page_id(),
                expected_parent
            )));
        }

        if header.is_leaf() {
            let leaf = LeafPageRef::new(guard.data(), self.key_size);
            let size = leaf.size();

            let min = if is_root { 1 } else { self.leaf_min() };
            if size < min || size > self.order - 1 {
                return Err(QuarryError::Corruption(format!(
                    "leaf {} holds {} keys outside [{}, {}]",
                    page_id,
                    size,
                    min,
                    self.order - 1
                )));
            }
            for i in 1..size {
                if self.comparator.compare(leaf.key_at(i - 1), leaf.key_at(i))
                    != std::cmp::Ordering::Less
                {
                    return Err(QuarryError::Corruption(format!(
                        "keys out of order in leaf {}",
                        page_id
                    )));
                }
            }

            if summary.height == 0 {
                summary.height = depth;
            } else if summary.height != depth {
                return Err(QuarryError::Corruption(format!(
                    "leaf {} at depth {}, others at {}",
                    page_id, depth, summary.height
                )));
            }
            if first_leaf.is_none() {
                *first_leaf = Some(page_id);
            }
            summary.leaf_pages += 1;
            summary.key_count += size;
            return Ok(());
        }

        let node = InternalPageRef::new(guard.data(), self.key_size);
        let size = node.size();

        let min = if is_root { 2 } else { self.internal_min() };
        if size < min || size > self.order {
            return Err(QuarryError::Corruption(format!(
                "internal {} holds {} children outside [{}, {}]",
                page_id, size, min, self.order
            )));
        }
        for i in 2..size {
            if self.comparator.compare(node.key_at(i - 1), node.key_at(i))
                != std::cmp::Ordering::Less
            {
                return Err(QuarryError::Corruption(format!(
                    "keys out of order in internal {}",
                    page_id
                )));
            }
        }

        let children: Vec<PageId> = (0..size).map(|i| node.child_at(i)).collect();
        drop(guard);
        for child in children {
            self.verify_node(child, false, Some(page_id), summary, depth + 1, first_leaf)?;
        }
        Ok(())
    }
}
