//! Integration tests for B+ tree insertion and point lookup

use std::sync::Arc;

use taproot::buffer::BufferPoolManager;
use taproot::common::INVALID_PAGE_ID;
use taproot::index::{BTreeIndex, BTreePageRef, IntegerComparator};
use taproot::storage::disk::DiskManager;
use taproot::{IndexKey, PageId, RecordId, SlotId};
use tempfile::NamedTempFile;

fn key(n: u64) -> IndexKey {
    n.to_le_bytes()
}

fn rid(n: u64) -> RecordId {
    RecordId::new(PageId::new(n as u32), SlotId::new((n % 100) as u16))
}

fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, dm));
    (bpm, temp_file)
}

fn collect_keys(index: &BTreeIndex) -> Vec<u64> {
    index
        .begin()
        .unwrap()
        .map(|item| u64::from_le_bytes(item.unwrap().0))
        .collect()
}

#[test]
fn test_btree_insert_ascending_small_pool() {
    // 1000 ascending keys through a 10-frame pool: constant eviction
    // while the tree grows.
    let (bpm, _temp) = create_bpm(10);
    let index = BTreeIndex::new(bpm, Arc::new(IntegerComparator));

    for n in 1..=1000u64 {
        assert!(index.insert(&key(n), rid(n)).unwrap(), "insert {} failed", n);
    }

    for n in 1..=1000u64 {
        assert_eq!(
            index.get_value(&key(n)).unwrap(),
            Some(rid(n)),
            "lookup {} failed",
            n
        );
    }

    let keys = collect_keys(&index);
    assert_eq!(keys, (1..=1000u64).collect::<Vec<_>>());
}

#[test]
fn test_btree_insert_descending_forces_split_and_root_promotion() {
    // With a leaf max of 4 and internal max of 5, [5,4,3,2,1] must split
    // the first leaf and promote a new internal root.
    let (bpm, _temp) = create_bpm(10);
    let index = BTreeIndex::with_max_sizes(bpm.clone(), Arc::new(IntegerComparator), 4, 5);

    for n in [5u64, 4, 3, 2, 1] {
        assert!(index.insert(&key(n), rid(n)).unwrap());
    }

    let root_id = index.root_page_id();
    assert_ne!(root_id, INVALID_PAGE_ID);
    {
        let guard = bpm.fetch_page_read(root_id).unwrap();
        assert!(
            !BTreePageRef::new(guard.data()).is_leaf(),
            "root should have been promoted to an internal node"
        );
    }

    assert_eq!(index.get_value(&key(3)).unwrap(), Some(rid(3)));
    assert_eq!(collect_keys(&index), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_btree_insert_many_with_small_nodes() {
    let (bpm, _temp) = create_bpm(20);
    let index = BTreeIndex::with_max_sizes(bpm, Arc::new(IntegerComparator), 4, 5);

    for n in 1..=1000u64 {
        assert!(index.insert(&key(n), rid(n)).unwrap());
    }

    for n in 1..=1000u64 {
        assert_eq!(index.get_value(&key(n)).unwrap(), Some(rid(n)));
    }
    assert_eq!(index.get_value(&key(0)).unwrap(), None);
    assert_eq!(index.get_value(&key(1001)).unwrap(), None);

    assert_eq!(collect_keys(&index), (1..=1000u64).collect::<Vec<_>>());
}

#[test]
fn test_btree_insert_reverse_order() {
    let (bpm, _temp) = create_bpm(20);
    let index = BTreeIndex::with_max_sizes(bpm, Arc::new(IntegerComparator), 4, 5);

    for n in (1..=200u64).rev() {
        assert!(index.insert(&key(n), rid(n)).unwrap());
    }

    for n in 1..=200u64 {
        assert_eq!(index.get_value(&key(n)).unwrap(), Some(rid(n)));
    }
    assert_eq!(collect_keys(&index), (1..=200u64).collect::<Vec<_>>());
}

#[test]
fn test_btree_insert_random_order() {
    use rand::seq::SliceRandom;
    use rand::thread_rng;

    let (bpm, _temp) = create_bpm(50);
    let index = BTreeIndex::with_max_sizes(bpm, Arc::new(IntegerComparator), 8, 8);

    let mut keys: Vec<u64> = (0..500).collect();
    keys.shuffle(&mut thread_rng());

    for &n in &keys {
        assert!(index.insert(&key(n), rid(n)).unwrap(), "insert {} failed", n);
    }

    for &n in &keys {
        assert_eq!(
            index.get_value(&key(n)).unwrap(),
            Some(rid(n)),
            "lookup {} failed",
            n
        );
    }
    assert_eq!(collect_keys(&index), (0..500u64).collect::<Vec<_>>());
}

#[test]
fn test_btree_duplicate_insert_returns_false() {
    let (bpm, _temp) = create_bpm(10);
    let index = BTreeIndex::new(bpm, Arc::new(IntegerComparator));

    assert!(index.insert(&key(7), rid(7)).unwrap());
    assert!(!index.insert(&key(7), rid(8)).unwrap());
    assert_eq!(index.get_value(&key(7)).unwrap(), Some(rid(7)));
}

#[test]
fn test_btree_persistence_across_reopen() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let root_page_id = {
        let dm = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(10, dm));
        let index = BTreeIndex::new(bpm.clone(), Arc::new(IntegerComparator));

        for n in 0..50u64 {
            index.insert(&key(n), rid(n)).unwrap();
        }

        bpm.flush_all_pages().unwrap();
        index.root_page_id()
    };

    {
        let dm = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(10, dm));
        let index = BTreeIndex::open(bpm, Arc::new(IntegerComparator), root_page_id);

        for n in 0..50u64 {
            assert_eq!(
                index.get_value(&key(n)).unwrap(),
                Some(rid(n)),
                "lookup {} failed after reopen",
                n
            );
        }
    }
}
