//! End-to-end tests for the file-backed page store:
//! - round-trips through flush, close, and reopen
//! - cache pressure with dirty-page protection
//! - background flush without a clean shutdown
//! - header durability and monotonicity

use bytes::Bytes;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use keel_common::page::{MAX_LEAF_CELLS, PAGE_SIZE};
use keel_common::{KeelError, StorageConfig};
use keel_storage::{FileStore, LeafNode, Node, PageStore};

fn config(dir: &tempfile::TempDir, capacity: usize) -> StorageConfig {
    StorageConfig {
        path: dir.path().join("keel.db"),
        cache_capacity: capacity,
        flush_interval: Duration::from_secs(3600),
        fsync_enabled: false,
    }
}

fn leaf_page(pairs: &[(u32, &str)]) -> keel_storage::PageRef {
    let mut leaf = LeafNode::new();
    for &(key, value) in pairs {
        leaf.append_cell(key, Bytes::copy_from_slice(value.as_bytes()))
            .unwrap();
    }
    Node::from(leaf).into_ref()
}

// =============================================================================
// Round-trips
// =============================================================================

#[test]
fn minimal_round_trip() {
    let dir = tempdir().unwrap();

    {
        let store = FileStore::open(config(&dir, 4)).unwrap();
        let page = leaf_page(&[(1, "a"), (2, "bb"), (3, "ccc")]);
        store.append(&page).unwrap();
        assert_eq!(page.read().file_offset(), PAGE_SIZE as u64);

        store.incr_lsn();
        page.write().mark_dirty(store.next_lsn());

        store.flush().unwrap();
        store.close().unwrap();
    }

    let store = FileStore::open(config(&dir, 4)).unwrap();
    let page = store.fetch(4096).unwrap();
    let node = page.read();

    assert_eq!(node.last_lsn(), 1);
    assert!(!node.is_dirty());

    let leaf = node.as_leaf().unwrap();
    let cells: Vec<(u32, Vec<u8>)> = leaf.iter().map(|c| (c.key, c.value.to_vec())).collect();
    assert_eq!(
        cells,
        vec![
            (1, b"a".to_vec()),
            (2, b"bb".to_vec()),
            (3, b"ccc".to_vec()),
        ]
    );

    drop(node);
    store.close().unwrap();
}

#[test]
fn oversized_row_is_rejected_without_mutation() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(config(&dir, 4)).unwrap();

    let page = leaf_page(&[(1, "a")]);
    store.append(&page).unwrap();

    let mut node = page.write();
    let leaf = node.as_leaf_mut().unwrap();
    let result = leaf.insert_cell(1, 2, Bytes::from(vec![0u8; 401]));
    assert!(matches!(result, Err(KeelError::RowTooLarge { size: 401, max: 400 })));

    assert_eq!(leaf.cell_count(), 1);
    assert_eq!(leaf.value_at(0), b"a");

    drop(node);
    store.close().unwrap();
}

#[test]
fn leaf_split_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let separator;

    {
        let store = FileStore::open(config(&dir, 8)).unwrap();

        let mut leaf = LeafNode::new();
        for key in 0..MAX_LEAF_CELLS as u32 {
            leaf.append_cell(key, Bytes::from(key.to_string())).unwrap();
        }
        assert!(leaf.is_full());
        let page = Node::from(leaf).into_ref();
        store.append(&page).unwrap();

        let (sep, right) = page.write().as_leaf_mut().unwrap().split();
        separator = sep;
        let right_page = Node::from(right).into_ref();
        store.append(&right_page).unwrap();

        store.incr_lsn();
        let lsn = store.next_lsn();
        page.write().mark_dirty(lsn);
        right_page.write().mark_dirty(lsn);

        store.flush().unwrap();
        store.close().unwrap();
    }

    let store = FileStore::open(config(&dir, 8)).unwrap();

    let left = store.fetch(4096).unwrap();
    let right = store.fetch(8192).unwrap();
    let left_node = left.read();
    let right_node = right.read();
    let left_leaf = left_node.as_leaf().unwrap();
    let right_leaf = right_node.as_leaf().unwrap();

    assert_eq!(left_leaf.cell_count(), MAX_LEAF_CELLS / 2);
    assert_eq!(
        left_leaf.cell_count() + right_leaf.cell_count(),
        MAX_LEAF_CELLS
    );
    assert_eq!(right_leaf.key_at(0), separator);

    // The two halves partition the key space.
    let mut keys: Vec<u32> = left_leaf
        .iter()
        .chain(right_leaf.iter())
        .map(|c| c.key)
        .collect();
    keys.sort_unstable();
    assert_eq!(keys, (0..MAX_LEAF_CELLS as u32).collect::<Vec<_>>());

    drop(left_node);
    drop(right_node);
    store.close().unwrap();
}

#[test]
fn durability_after_flush_many_pages() {
    let dir = tempdir().unwrap();
    let mut rng = rand::thread_rng();

    let mut expected: Vec<Vec<(u32, Vec<u8>)>> = Vec::new();

    {
        let store = FileStore::open(config(&dir, 64)).unwrap();

        for p in 0..20u32 {
            let mut leaf = LeafNode::new();
            let mut cells = Vec::new();
            for i in 0..5u32 {
                let key = p * 10 + i;
                let len = rng.gen_range(0..=400);
                let value: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                leaf.append_cell(key, Bytes::from(value.clone())).unwrap();
                cells.push((key, value));
            }
            expected.push(cells);

            let page = Node::from(leaf).into_ref();
            store.append(&page).unwrap();
            store.incr_lsn();
            let lsn = store.next_lsn();
            page.write().mark_dirty(lsn);
        }

        store.flush().unwrap();
        store.close().unwrap();
    }

    let store = FileStore::open(config(&dir, 64)).unwrap();
    for (p, cells) in expected.iter().enumerate() {
        let offset = 4096 * (p as u64 + 1);
        let page = store.fetch(offset).unwrap();
        let node = page.read();
        let leaf = node.as_leaf().unwrap();

        let got: Vec<(u32, Vec<u8>)> = leaf.iter().map(|c| (c.key, c.value.to_vec())).collect();
        assert_eq!(&got, cells, "page at offset {offset}");
        assert_eq!(node.file_offset(), offset);
    }
    store.close().unwrap();
}

// =============================================================================
// Cache pressure
// =============================================================================

#[test]
fn cache_full_of_dirty_pages_recovers_after_flush() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(config(&dir, 4)).unwrap();

    for i in 0..4u32 {
        let page = leaf_page(&[(i, "v")]);
        store.append(&page).unwrap();
        store.incr_lsn();
        let lsn = store.next_lsn();
        page.write().mark_dirty(lsn);
    }

    // Every resident page is dirty, so nothing may be evicted.
    let extra = leaf_page(&[(99, "x")]);
    let result = store.append(&extra);
    assert!(matches!(result, Err(KeelError::CacheFull)));

    // A flush makes pages clean and therefore evictable.
    store.flush().unwrap();
    store.append(&extra).unwrap();
    assert_eq!(extra.read().file_offset(), 4096 * 5);

    store.close().unwrap();
}

#[test]
fn dirty_page_survives_cache_pressure() {
    let dir = tempdir().unwrap();
    let store = FileStore::open(config(&dir, 2)).unwrap();

    let dirty = leaf_page(&[(1, "keep")]);
    store.append(&dirty).unwrap();
    store.incr_lsn();
    let lsn = store.next_lsn();
    dirty.write().mark_dirty(lsn);

    // Clean traffic that churns the second cache slot.
    for i in 0..5u32 {
        let clean = leaf_page(&[(100 + i, "c")]);
        store.append(&clean).unwrap();
        store.update(&clean).unwrap();
    }

    // The dirty page was never evicted: fetch returns the same object.
    let fetched = store.fetch(4096).unwrap();
    assert!(Arc::ptr_eq(&dirty, &fetched));
    assert!(fetched.read().is_dirty());

    store.close().unwrap();
}

// =============================================================================
// Background flush
// =============================================================================

#[test]
fn background_flush_persists_without_close() {
    let dir = tempdir().unwrap();
    let fast = StorageConfig {
        flush_interval: Duration::from_millis(50),
        ..config(&dir, 8)
    };

    {
        let store = FileStore::open(fast).unwrap();
        let page = leaf_page(&[(7, "seven")]);
        store.append(&page).unwrap();
        store.incr_lsn();
        let lsn = store.next_lsn();
        page.write().mark_dirty(lsn);

        // Wait out at least one tick, then drop without close to simulate a
        // crash. The periodic flush must already have persisted the page.
        std::thread::sleep(Duration::from_millis(400));
        assert!(!page.read().is_dirty());
    }

    let store = FileStore::open(config(&dir, 8)).unwrap();
    let page = store.fetch(4096).unwrap();
    let node = page.read();
    let leaf = node.as_leaf().unwrap();
    assert_eq!(leaf.cell_count(), 1);
    assert_eq!(leaf.key_at(0), 7);
    assert_eq!(leaf.value_at(0), b"seven");

    drop(node);
    store.close().unwrap();
}

// =============================================================================
// Header
// =============================================================================

#[test]
fn header_fields_never_decrease_across_flushes() {
    let dir = tempdir().unwrap();
    let mut seen_offset = 0u64;
    let mut seen_lsn = 0u64;

    for round in 0..3u32 {
        let store = FileStore::open(config(&dir, 8)).unwrap();

        let page = leaf_page(&[(round, "r")]);
        store.append(&page).unwrap();
        store.incr_lsn();
        let lsn = store.next_lsn();
        page.write().mark_dirty(lsn);
        store.flush().unwrap();

        assert!(store.next_lsn() >= seen_lsn);
        assert!(page.read().file_offset() >= seen_offset);
        seen_lsn = store.next_lsn();
        seen_offset = page.read().file_offset();

        store.close().unwrap();
    }

    // Three single-page rounds allocate three consecutive frames.
    assert_eq!(seen_offset, 4096 * 3);
    assert_eq!(seen_lsn, 3);
}

#[test]
fn key_generator_and_page_table_root_persist() {
    let dir = tempdir().unwrap();

    {
        let store = FileStore::open(config(&dir, 8)).unwrap();
        assert_eq!(store.increment_last_key(), 1);
        assert_eq!(store.increment_last_key(), 2);

        let root = leaf_page(&[(1, "root")]);
        store.append(&root).unwrap();
        store.incr_lsn();
        let lsn = store.next_lsn();
        root.write().mark_dirty(lsn);
        store.set_page_table_root(&root).unwrap();

        store.close().unwrap();
    }

    let store = FileStore::open(config(&dir, 8)).unwrap();
    assert_eq!(store.last_key(), 2);
    assert_eq!(store.page_table_root(), 4096);
    store.close().unwrap();
}
