use std::sync::Arc;

use quarry::buffer::BufferPoolManager;
use quarry::common::{INVALID_PAGE_ID, PAGE_SIZE};
use quarry::index::{BPlusTree, IntegerComparator};
use quarry::storage::disk::DiskManager;
use quarry::{PageId, QuarryError, RecordId, SlotId};

use tempfile::NamedTempFile;

fn create_tree(pool_size: usize, order: usize) -> (BPlusTree, Arc<BufferPoolManager>, NamedTempFile)
{
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, disk_manager));
    let tree = BPlusTree::new(
        "test_index",
        Arc::clone(&bpm),
        Arc::new(IntegerComparator),
        4,
        order,
    )
    .unwrap();
    (tree, bpm, temp_file)
}

fn key(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}

fn rid(v: u32) -> RecordId {
    RecordId::new(PageId::new(v), SlotId::new(v % 16))
}

fn scan_from(tree: &BPlusTree, start: u32) -> Vec<u32> {
    tree.iter_from(&key(start))
        .unwrap()
        .map(|item| u32::from_le_bytes(item.unwrap().0.try_into().unwrap()))
        .collect()
}

fn full_scan(tree: &BPlusTree) -> Vec<u32> {
    tree.iter()
        .unwrap()
        .map(|item| u32::from_le_bytes(item.unwrap().0.try_into().unwrap()))
        .collect()
}

#[test]
fn test_empty_tree() {
    let (tree, _bpm, _temp) = create_tree(10, 3);

    assert!(tree.is_empty());
    assert_eq!(tree.root_page_id(), INVALID_PAGE_ID);
    assert_eq!(tree.get_value(&key(1)).unwrap(), None);
    assert_eq!(full_scan(&tree), Vec::<u32>::new());
}

#[test]
fn test_order_out_of_range() {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(10, disk_manager));

    let too_small = BPlusTree::new("t", Arc::clone(&bpm), Arc::new(IntegerComparator), 4, 1);
    assert!(matches!(
        too_small,
        Err(QuarryError::OrderOutOfRange { .. })
    ));

    // A 4-byte key plus an 8-byte RID cannot fit thousands of pairs in 4 KB.
    let too_large = BPlusTree::new(
        "t",
        Arc::clone(&bpm),
        Arc::new(IntegerComparator),
        4,
        PAGE_SIZE,
    );
    assert!(matches!(
        too_large,
        Err(QuarryError::OrderOutOfRange { .. })
    ));
}

#[test]
fn test_duplicate_key_rejected() {
    let (tree, _bpm, _temp) = create_tree(10, 3);

    tree.insert(&key(1), rid(1)).unwrap();
    assert!(matches!(
        tree.insert(&key(1), rid(2)),
        Err(QuarryError::DuplicateKey)
    ));
    assert_eq!(tree.get_value(&key(1)).unwrap(), Some(rid(1)));
}

// Scenario: sequential inserts at order 3 grow the tree leaf-first.
#[test]
fn test_leaf_split_order_three() {
    let (tree, _bpm, _temp) = create_tree(10, 3);

    tree.insert(&key(1), rid(1)).unwrap();
    tree.insert(&key(2), rid(2)).unwrap();
    assert_eq!(tree.verify().unwrap().height, 1);

    tree.insert(&key(3), rid(3)).unwrap();
    assert_eq!(tree.verify().unwrap().height, 2);

    tree.insert(&key(4), rid(4)).unwrap();
    assert_eq!(tree.verify().unwrap().height, 2);

    tree.insert(&key(5), rid(5)).unwrap();
    assert_eq!(tree.verify().unwrap().height, 3);

    assert_eq!(scan_from(&tree, 1), vec![1, 2, 3, 4, 5]);
    for v in 1..=5 {
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)));
    }
}

// Scenario: the same keys arriving in reverse order build an equivalent tree.
#[test]
fn test_reverse_insert_order_three() {
    let (tree, _bpm, _temp) = create_tree(10, 3);

    for v in (1..=5).rev() {
        tree.insert(&key(v), rid(v)).unwrap();
    }

    assert_eq!(scan_from(&tree, 1), vec![1, 2, 3, 4, 5]);
    assert_eq!(scan_from(&tree, 3), vec![3, 4, 5]);
    tree.verify().unwrap();
}

// Scenario: 10,000 distinct keys in random order at order 32.
#[test]
fn test_random_scale() {
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    let (tree, _bpm, _temp) = create_tree(64, 32);

    let mut keys: Vec<u32> = (0..10_000).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    keys.shuffle(&mut rng);

    for &v in &keys {
        tree.insert(&key(v), rid(v)).unwrap();
    }

    for &v in &keys {
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)), "lost {}", v);
    }

    let scanned = full_scan(&tree);
    assert_eq!(scanned.len(), 10_000);
    assert_eq!(scanned, (0..10_000).collect::<Vec<u32>>());

    let summary = tree.verify().unwrap();
    assert_eq!(summary.key_count, 10_000);
}

// Scenario: inserting 1..100 then deleting everything empties the tree
// and unpins every frame.
#[test]
fn test_delete_all_then_scan() {
    let (tree, bpm, _temp) = create_tree(32, 4);

    for v in 1..=100 {
        tree.insert(&key(v), rid(v)).unwrap();
    }
    for v in 1..=100 {
        tree.remove(&key(v)).unwrap();
        tree.verify().unwrap();
    }

    for v in 1..=100 {
        assert_eq!(tree.get_value(&key(v)).unwrap(), None);
    }
    assert_eq!(tree.root_page_id(), INVALID_PAGE_ID);
    assert!(tree.is_empty());

    // Every cached page is unpinned once the operations return.
    assert_eq!(bpm.page_table_len(), bpm.replacer_size());
}

// Scenario: deletions at order 3 cascade merges down to a single leaf.
#[test]
fn test_delete_causes_merge() {
    let (tree, _bpm, _temp) = create_tree(10, 3);

    for v in 1..=5 {
        tree.insert(&key(v), rid(v)).unwrap();
    }
    for v in [1, 5, 3, 4] {
        tree.remove(&key(v)).unwrap();
        tree.verify().unwrap();
    }

    assert_eq!(scan_from(&tree, 2), vec![2]);
    let summary = tree.verify().unwrap();
    assert_eq!(summary.leaf_pages, 1);
    assert_eq!(summary.key_count, 1);
}

#[test]
fn test_remove_missing_key() {
    let (tree, _bpm, _temp) = create_tree(10, 3);

    assert!(matches!(
        tree.remove(&key(9)),
        Err(QuarryError::KeyNotFound)
    ));

    tree.insert(&key(1), rid(1)).unwrap();
    assert!(matches!(
        tree.remove(&key(9)),
        Err(QuarryError::KeyNotFound)
    ));
    assert_eq!(tree.get_value(&key(1)).unwrap(), Some(rid(1)));
}

#[test]
fn test_interleaved_insert_delete() {
    let (tree, _bpm, _temp) = create_tree(32, 4);

    for v in 0..200u32 {
        tree.insert(&key(v), rid(v)).unwrap();
        if v % 3 == 0 {
            tree.remove(&key(v / 2)).ok();
        }
    }
    tree.verify().unwrap();

    let scanned = full_scan(&tree);
    assert!(scanned.windows(2).all(|w| w[0] < w[1]));
    for &v in &scanned {
        assert!(tree.get_value(&key(v)).unwrap().is_some());
    }
}

#[test]
fn test_iter_from_midpoint() {
    let (tree, _bpm, _temp) = create_tree(32, 4);

    for v in (0..100).map(|v| v * 10) {
        tree.insert(&key(v), rid(v)).unwrap();
    }

    // Positioned on a present key
    assert_eq!(scan_from(&tree, 200).first(), Some(&200));
    // Positioned between keys
    assert_eq!(scan_from(&tree, 205).first(), Some(&210));
    // Positioned past the end
    assert_eq!(scan_from(&tree, 10_000), Vec::<u32>::new());
}

#[test]
fn test_tree_survives_reopen() {
    let temp_file = NamedTempFile::new().unwrap();

    {
        let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(16, disk_manager));
        let tree = BPlusTree::new(
            "orders_pk",
            Arc::clone(&bpm),
            Arc::new(IntegerComparator),
            4,
            4,
        )
        .unwrap();
        for v in 0..50 {
            tree.insert(&key(v), rid(v)).unwrap();
        }
        bpm.flush_all_dirty_pages().unwrap();
    }

    {
        let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(16, disk_manager));
        let tree = BPlusTree::new(
            "orders_pk",
            Arc::clone(&bpm),
            Arc::new(IntegerComparator),
            4,
            4,
        )
        .unwrap();
        for v in 0..50 {
            assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)));
        }
        tree.verify().unwrap();
    }
}

#[test]
fn test_concurrent_readers_during_inserts() {
    let (tree, _bpm, _temp) = create_tree(64, 8);
    let tree = Arc::new(tree);

    for v in 0..500 {
        tree.insert(&key(v), rid(v)).unwrap();
    }

    let mut handles = Vec::new();
    for t in 0..4 {
        let tree = Arc::clone(&tree);
        handles.push(std::thread::spawn(move || {
            for v in (t * 125)..((t + 1) * 125) {
                assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)));
            }
        }));
    }
    let writer = {
        let tree = Arc::clone(&tree);
        std::thread::spawn(move || {
            for v in 500..600 {
                tree.insert(&key(v), rid(v)).unwrap();
            }
        })
    };

    for handle in handles {
        handle.join().unwrap();
    }
    writer.join().unwrap();

    let summary = tree.verify().unwrap();
    assert_eq!(summary.key_count, 600);
}
