use std::sync::Arc;

use quarry::table::TableHeap;
use quarry::{PageId, QuarryError, RecordId, StorageEngine};

use tempfile::tempdir;

// Durability: after a crash, committed effects are observable and the
// effects of in-flight transactions are not.
#[test]
fn test_committed_effects_survive_crash() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("crash.db");

    let (first_page_id, rid_a, rid_b, rid_ghost): (PageId, RecordId, RecordId, RecordId);
    {
        let engine = StorageEngine::open_with_pool_size(&db_path, 32).unwrap();
        engine.enable_logging();
        let txn_manager = engine.transaction_manager();

        let setup = txn_manager.begin();
        let heap = TableHeap::new(
            Arc::clone(engine.buffer_pool()),
            Arc::clone(engine.lock_manager()),
            Some(Arc::clone(engine.log_manager())),
            &setup,
        )
        .unwrap();
        first_page_id = heap.first_page_id();
        txn_manager.commit(&setup).unwrap();

        let t1 = txn_manager.begin();
        rid_a = heap.insert_tuple(b"committed-one", &t1).unwrap();
        txn_manager.commit(&t1).unwrap();

        let t2 = txn_manager.begin();
        rid_b = heap.insert_tuple(b"committed-two", &t2).unwrap();
        txn_manager.commit(&t2).unwrap();

        // In flight at crash time: never committed.
        let t3 = txn_manager.begin();
        rid_ghost = heap.insert_tuple(b"ghost", &t3).unwrap();

        // Crash: stop the log, never flush the data pages.
        engine.log_manager().stop_flush_thread();
    }

    {
        let engine = StorageEngine::open_with_pool_size(&db_path, 32).unwrap();
        engine.recover().unwrap();

        let heap = TableHeap::open(
            Arc::clone(engine.buffer_pool()),
            Arc::clone(engine.lock_manager()),
            None,
            first_page_id,
        );

        let txn = engine.transaction_manager().begin();
        assert_eq!(heap.get_tuple(rid_a, &txn).unwrap(), b"committed-one");
        assert_eq!(heap.get_tuple(rid_b, &txn).unwrap(), b"committed-two");
        assert!(matches!(
            heap.get_tuple(rid_ghost, &txn),
            Err(QuarryError::TupleNotFound(_))
        ));
        engine.transaction_manager().commit(&txn).unwrap();
        engine.close().unwrap();
    }
}

// A committed delete stays deleted, a committed update stays updated, and
// an aborted transaction leaves no trace, all across a crash.
#[test]
fn test_recovery_replays_deletes_updates_and_aborts() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("replay.db");

    let (first_page_id, rid_kept, rid_deleted, rid_updated): (
        PageId,
        RecordId,
        RecordId,
        RecordId,
    );
    {
        let engine = StorageEngine::open_with_pool_size(&db_path, 32).unwrap();
        engine.enable_logging();
        let txn_manager = engine.transaction_manager();

        let setup = txn_manager.begin();
        let heap = TableHeap::new(
            Arc::clone(engine.buffer_pool()),
            Arc::clone(engine.lock_manager()),
            Some(Arc::clone(engine.log_manager())),
            &setup,
        )
        .unwrap();
        first_page_id = heap.first_page_id();
        rid_kept = heap.insert_tuple(b"kept", &setup).unwrap();
        rid_deleted = heap.insert_tuple(b"deleted", &setup).unwrap();
        rid_updated = heap.insert_tuple(b"before", &setup).unwrap();
        txn_manager.commit(&setup).unwrap();

        let t1 = txn_manager.begin();
        heap.mark_delete(rid_deleted, &t1).unwrap();
        heap.update_tuple(rid_updated, b"after!", &t1).unwrap();
        txn_manager.commit(&t1).unwrap();

        // This one rolls back before the crash.
        let t2 = txn_manager.begin();
        heap.update_tuple(rid_kept, b"scribble", &t2).unwrap();
        txn_manager.abort(&t2).unwrap();

        engine.log_manager().stop_flush_thread();
    }

    {
        let engine = StorageEngine::open_with_pool_size(&db_path, 32).unwrap();
        engine.recover().unwrap();

        let heap = TableHeap::open(
            Arc::clone(engine.buffer_pool()),
            Arc::clone(engine.lock_manager()),
            None,
            first_page_id,
        );

        let txn = engine.transaction_manager().begin();
        assert_eq!(heap.get_tuple(rid_kept, &txn).unwrap(), b"kept");
        assert!(heap.get_tuple(rid_deleted, &txn).is_err());
        assert_eq!(heap.get_tuple(rid_updated, &txn).unwrap(), b"after!");
        engine.transaction_manager().commit(&txn).unwrap();
        engine.close().unwrap();
    }
}

// Recovery also rebuilds heap pages that never reached the data file.
#[test]
fn test_recovery_materializes_unflushed_pages() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("newpage.db");

    let first_page_id: PageId;
    let mut rids = Vec::new();
    {
        let engine = StorageEngine::open_with_pool_size(&db_path, 64).unwrap();
        engine.enable_logging();
        let txn_manager = engine.transaction_manager();

        let txn = txn_manager.begin();
        let heap = TableHeap::new(
            Arc::clone(engine.buffer_pool()),
            Arc::clone(engine.lock_manager()),
            Some(Arc::clone(engine.log_manager())),
            &txn,
        )
        .unwrap();
        first_page_id = heap.first_page_id();

        // Big tuples force several linked pages, all volatile.
        let payload = vec![3u8; 1500];
        for _ in 0..8 {
            rids.push(heap.insert_tuple(&payload, &txn).unwrap());
        }
        txn_manager.commit(&txn).unwrap();

        engine.log_manager().stop_flush_thread();
    }

    {
        let engine = StorageEngine::open_with_pool_size(&db_path, 64).unwrap();
        engine.recover().unwrap();

        let heap = TableHeap::open(
            Arc::clone(engine.buffer_pool()),
            Arc::clone(engine.lock_manager()),
            None,
            first_page_id,
        );

        let txn = engine.transaction_manager().begin();
        for rid in &rids {
            assert_eq!(heap.get_tuple(*rid, &txn).unwrap(), vec![3u8; 1500]);
        }
        engine.transaction_manager().commit(&txn).unwrap();
        engine.close().unwrap();
    }
}
