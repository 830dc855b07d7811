use std::sync::Arc;

use quarry::buffer::BufferPoolManager;
use quarry::common::PAGE_SIZE;
use quarry::storage::disk::DiskManager;
use quarry::{PageId, QuarryError};

use tempfile::NamedTempFile;

fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, disk_manager));
    (bpm, temp_file)
}

fn assert_conservation(bpm: &BufferPoolManager, pinned: usize) {
    assert_eq!(
        bpm.page_table_len() + bpm.free_frame_count(),
        bpm.pool_size(),
        "cached + free must cover the pool"
    );
    assert_eq!(
        bpm.page_table_len(),
        bpm.replacer_size() + pinned,
        "cached pages are either evictable or pinned"
    );
}

#[test]
fn test_data_survives_heavy_eviction() {
    let (bpm, _temp) = create_bpm(5);

    let mut page_ids = Vec::new();
    for i in 0..50u32 {
        let mut guard = bpm.new_page().unwrap();
        guard.data_mut()[0..4].copy_from_slice(&i.to_le_bytes());
        guard.data_mut()[PAGE_SIZE - 1] = i as u8;
        page_ids.push(guard.page_id());
    }

    for (i, &page_id) in page_ids.iter().enumerate() {
        let guard = bpm.fetch_page_read(page_id).unwrap();
        let stored = u32::from_le_bytes(guard.data()[0..4].try_into().unwrap());
        assert_eq!(stored, i as u32);
        assert_eq!(guard.data()[PAGE_SIZE - 1], i as u8);
    }

    assert_conservation(&bpm, 0);
}

#[test]
fn test_conservation_through_mixed_workload() {
    let (bpm, _temp) = create_bpm(8);

    let mut guards = Vec::new();
    for _ in 0..4 {
        guards.push(bpm.new_page().unwrap());
    }
    assert_conservation(&bpm, 4);

    // Unpin two, delete one of them.
    let unpinned_a = guards.remove(0).page_id();
    let unpinned_b = guards.remove(0).page_id();
    assert_conservation(&bpm, 2);

    assert!(bpm.delete_page(unpinned_a).unwrap());
    assert_conservation(&bpm, 2);

    // Refetch the other; it is pinned again.
    let refetched = bpm.fetch_page_read(unpinned_b).unwrap();
    assert_conservation(&bpm, 3);

    drop(refetched);
    drop(guards);
    assert_conservation(&bpm, 0);
}

#[test]
fn test_pin_count_tracks_concurrent_readers() {
    let (bpm, _temp) = create_bpm(4);

    let page_id = bpm.new_page().unwrap().page_id();

    let g1 = bpm.fetch_page_read(page_id).unwrap();
    let g2 = bpm.fetch_page_read(page_id).unwrap();
    assert_eq!(bpm.pin_count(page_id), Some(2));

    drop(g1);
    assert_eq!(bpm.pin_count(page_id), Some(1));
    drop(g2);
    assert_eq!(bpm.pin_count(page_id), Some(0));
    assert_eq!(bpm.replacer_size(), 1);
}

#[test]
fn test_pool_exhaustion_and_recovery() {
    let (bpm, _temp) = create_bpm(3);

    let guards: Vec<_> = (0..3).map(|_| bpm.new_page().unwrap()).collect();
    assert!(matches!(bpm.new_page(), Err(QuarryError::BufferPoolFull)));
    assert!(matches!(
        bpm.fetch_page_read(PageId::new(0)),
        Ok(_) // already cached pages stay reachable
    ));

    drop(guards);

    // With everything unpinned the pool serves new pages again.
    let guard = bpm.new_page().unwrap();
    assert_eq!(guard.page_id(), PageId::new(3));
}

#[test]
fn test_flush_page_clears_dirty() {
    let (bpm, temp) = create_bpm(4);

    let page_id = {
        let mut guard = bpm.new_page().unwrap();
        guard.data_mut()[10] = 99;
        guard.page_id()
    };

    assert!(bpm.flush_page(page_id).unwrap());
    assert!(!bpm.flush_page(PageId::new(1234)).unwrap());

    // A fresh pool sees the flushed bytes.
    let dm = Arc::new(DiskManager::new(temp.path()).unwrap());
    let bpm2 = BufferPoolManager::new(4, dm);
    let guard = bpm2.fetch_page_read(page_id).unwrap();
    assert_eq!(guard.data()[10], 99);
}

#[test]
fn test_concurrent_pinning_across_threads() {
    let (bpm, _temp) = create_bpm(16);

    let mut page_ids = Vec::new();
    for i in 0..8u32 {
        let mut guard = bpm.new_page().unwrap();
        guard.data_mut()[0] = i as u8;
        page_ids.push(guard.page_id());
    }
    let page_ids = Arc::new(page_ids);

    let mut handles = Vec::new();
    for t in 0..4 {
        let bpm = Arc::clone(&bpm);
        let page_ids = Arc::clone(&page_ids);
        handles.push(std::thread::spawn(move || {
            for round in 0..100 {
                let idx = (t + round) % page_ids.len();
                let guard = bpm.fetch_page_read(page_ids[idx]).unwrap();
                assert_eq!(guard.data()[0], idx as u8);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_conservation(&bpm, 0);
}
