//! Integration tests for the B+Tree index

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use cinder::buffer::BufferPoolManager;
use cinder::common::{BTreeConfig, CinderError, PageId, RecordId, SlotId};
use cinder::index::{BPlusTree, BytewiseComparator, I64Comparator, IntegerComparator};
use cinder::storage::disk::DiskManager;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tempfile::NamedTempFile;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    init_logger();
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, 2, disk_manager));
    (bpm, temp_file)
}

fn create_tree(
    bpm: &Arc<BufferPoolManager>,
    leaf_max: usize,
    internal_max: usize,
) -> BPlusTree {
    BPlusTree::new(
        "test_index",
        Arc::clone(bpm),
        Arc::new(IntegerComparator),
        BTreeConfig::new(4, leaf_max, internal_max),
    )
    .unwrap()
}

fn key(k: u32) -> [u8; 4] {
    k.to_le_bytes()
}

fn rid(k: u32) -> RecordId {
    RecordId::new(PageId::new(k), SlotId::new((k % 100) as u16))
}

fn decode(key: &[u8]) -> u32 {
    u32::from_le_bytes([key[0], key[1], key[2], key[3]])
}

fn collect_keys(tree: &BPlusTree) -> Vec<u32> {
    tree.begin()
        .unwrap()
        .map(|entry| decode(&entry.unwrap().0))
        .collect()
}

#[test]
fn test_btree_insert_many_and_search() {
    let (bpm, _temp) = create_bpm(50);
    let tree = create_tree(&bpm, 16, 16);

    for i in 0..1000 {
        assert!(tree.insert(&key(i), rid(i)).unwrap());
    }
    for i in 0..1000 {
        assert_eq!(tree.get_value(&key(i)).unwrap(), vec![rid(i)], "key {}", i);
    }
    assert!(tree.get_value(&key(1000)).unwrap().is_empty());
    tree.verify_integrity().unwrap();
}

#[test]
fn test_btree_duplicate_insert_rejected() {
    let (bpm, _temp) = create_bpm(20);
    let tree = create_tree(&bpm, 4, 4);

    for i in 0..30 {
        tree.insert(&key(i), rid(i)).unwrap();
    }
    for i in 0..30 {
        assert!(!tree.insert(&key(i), rid(999)).unwrap());
        assert_eq!(tree.get_value(&key(i)).unwrap(), vec![rid(i)]);
    }
}

#[test]
fn test_btree_split_creates_root_with_two_children() {
    let (bpm, _temp) = create_bpm(20);
    let tree = create_tree(&bpm, 4, 4);

    for i in 1..=4 {
        tree.insert(&key(i), rid(i)).unwrap();
    }
    let leaf_root = tree.root_page_id();

    tree.insert(&key(5), rid(5)).unwrap();
    let root = tree.root_page_id();
    assert_ne!(root, leaf_root);

    let guard = bpm.fetch_page_read(root).unwrap();
    let node = cinder::index::InternalNode::new(guard.data());
    assert!(!node.is_leaf());
    assert_eq!(node.size(), 2);
    assert_eq!(node.value_at(0), leaf_root);
}

#[test]
fn test_btree_random_round_trip() {
    let (bpm, _temp) = create_bpm(64);
    let tree = create_tree(&bpm, 5, 5);
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let mut keys: Vec<u32> = (0..2000).map(|i| i * 7 + 3).collect();
    keys.shuffle(&mut rng);
    for &k in &keys {
        assert!(tree.insert(&key(k), rid(k)).unwrap());
    }
    tree.verify_integrity().unwrap();

    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(collect_keys(&tree), sorted);

    keys.shuffle(&mut rng);
    for (n, &k) in keys.iter().enumerate() {
        tree.remove(&key(k)).unwrap();
        if n % 250 == 0 {
            tree.verify_integrity().unwrap();
        }
    }
    assert!(tree.is_empty());
    assert!(tree.begin().unwrap().is_end());
}

#[test]
fn test_btree_remove_absent_is_noop() {
    let (bpm, _temp) = create_bpm(20);
    let tree = create_tree(&bpm, 4, 4);

    for i in (0..40).step_by(2) {
        tree.insert(&key(i), rid(i)).unwrap();
    }
    for i in (1..40).step_by(2) {
        tree.remove(&key(i)).unwrap();
    }
    assert_eq!(collect_keys(&tree), (0..40).step_by(2).collect::<Vec<_>>());
    tree.verify_integrity().unwrap();
}

#[test]
fn test_btree_range_scan() {
    let (bpm, _temp) = create_bpm(50);
    let tree = create_tree(&bpm, 8, 8);

    for i in 0..100 {
        tree.insert(&key(i * 10), rid(i)).unwrap();
    }

    let results = tree.range_scan(&key(95), &key(305)).unwrap();
    let keys: Vec<u32> = results.iter().map(|(k, _)| decode(k)).collect();
    assert_eq!(keys, (10..=30).map(|i| i * 10).collect::<Vec<_>>());
    assert_eq!(results[0].1, rid(10));

    assert!(tree.range_scan(&key(2000), &key(3000)).unwrap().is_empty());
    assert!(tree.range_scan(&key(50), &key(40)).unwrap().is_empty());
}

#[test]
fn test_btree_iterator_from_key() {
    let (bpm, _temp) = create_bpm(30);
    let tree = create_tree(&bpm, 4, 4);

    for i in 0..50 {
        tree.insert(&key(i * 2), rid(i)).unwrap();
    }

    let from_odd: Vec<u32> = tree
        .begin_at(&key(31))
        .unwrap()
        .map(|e| decode(&e.unwrap().0))
        .collect();
    assert_eq!(from_odd, (16..50).map(|i| i * 2).collect::<Vec<_>>());

    let mut it = tree.begin().unwrap();
    let mut steps = 0;
    while it != tree.end() {
        it.advance().unwrap();
        steps += 1;
    }
    assert_eq!(steps, 50);
    assert!(it.current().is_none());
}

#[test]
fn test_btree_persists_across_pools() {
    let temp_file = NamedTempFile::new().unwrap();
    let config = BTreeConfig::new(4, 6, 6);

    {
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(16, 2, dm));
        let tree = BPlusTree::new("persisted", bpm, Arc::new(IntegerComparator), config).unwrap();
        for i in 0..300 {
            tree.insert(&key(i), rid(i)).unwrap();
        }
    }

    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(16, 2, dm));
    let tree = BPlusTree::new("persisted", bpm, Arc::new(IntegerComparator), config).unwrap();
    assert!(!tree.is_empty());
    assert_eq!(collect_keys(&tree), (0..300).collect::<Vec<_>>());
    tree.verify_integrity().unwrap();
}

#[test]
fn test_btree_multiple_indexes_share_pool() {
    let (bpm, _temp) = create_bpm(32);
    let config = BTreeConfig::new(4, 4, 4);
    let a = BPlusTree::new("a", Arc::clone(&bpm), Arc::new(IntegerComparator), config).unwrap();
    let b = BPlusTree::new("b", Arc::clone(&bpm), Arc::new(IntegerComparator), config).unwrap();

    for i in 0..50 {
        a.insert(&key(i), rid(i)).unwrap();
        b.insert(&key(i + 1000), rid(i)).unwrap();
    }
    assert_eq!(collect_keys(&a), (0..50).collect::<Vec<_>>());
    assert_eq!(collect_keys(&b), (1000..1050).collect::<Vec<_>>());
    assert_ne!(a.root_page_id(), b.root_page_id());
}

#[test]
fn test_btree_signed_keys() {
    let (bpm, _temp) = create_bpm(32);
    let tree = BPlusTree::new(
        "signed",
        Arc::clone(&bpm),
        Arc::new(I64Comparator),
        BTreeConfig::new(8, 4, 4),
    )
    .unwrap();

    for k in [-50i64, 7, -3, 0, 1 << 40, -(1 << 40), 12] {
        tree.insert(&k.to_le_bytes(), rid(0)).unwrap();
    }
    let keys: Vec<i64> = tree
        .begin()
        .unwrap()
        .map(|e| {
            let k = e.unwrap().0;
            i64::from_le_bytes(k.as_slice().try_into().unwrap())
        })
        .collect();
    assert_eq!(keys, vec![-(1 << 40), -50, -3, 0, 7, 12, 1 << 40]);
}

#[test]
fn test_btree_bytewise_keys() {
    let (bpm, _temp) = create_bpm(32);
    let tree = BPlusTree::new(
        "names",
        Arc::clone(&bpm),
        Arc::new(BytewiseComparator),
        BTreeConfig::new(8, 4, 4),
    )
    .unwrap();

    let names = ["delta", "alpha", "echo", "bravo", "charlie", "foxtrot"];
    for (i, name) in names.iter().enumerate() {
        let mut k = [0u8; 8];
        k[..name.len().min(8)].copy_from_slice(&name.as_bytes()[..name.len().min(8)]);
        tree.insert(&k, rid(i as u32)).unwrap();
    }

    let first: Vec<u8> = tree.begin().unwrap().next().unwrap().unwrap().0;
    assert!(first.starts_with(b"alpha"));
    tree.verify_integrity().unwrap();
}

#[test]
fn test_btree_invalid_config_rejected() {
    let (bpm, _temp) = create_bpm(8);
    let result = BPlusTree::new(
        "bad",
        bpm,
        Arc::new(IntegerComparator),
        BTreeConfig::new(4, 1, 4),
    );
    assert!(matches!(result, Err(CinderError::InvalidConfig(_))));
}

#[test]
fn test_btree_small_pool_exhaustion_propagates() {
    let (bpm, _temp) = create_bpm(3);
    let tree = create_tree(&bpm, 4, 4);

    for i in 0..4 {
        tree.insert(&key(i), rid(i)).unwrap();
    }
    // Pin every frame so the tree cannot load or allocate pages
    let pinned: Vec<_> = (0..3).map(|_| bpm.new_page().unwrap()).collect();
    assert!(matches!(
        tree.insert(&key(10), rid(10)),
        Err(CinderError::BufferPoolFull)
    ));
    drop(pinned);
    assert_eq!(tree.get_value(&key(3)).unwrap(), vec![rid(3)]);
}

#[test]
fn test_btree_concurrent_inserts() {
    let (bpm, _temp) = create_bpm(128);
    let tree = Arc::new(create_tree(&bpm, 6, 6));

    let handles: Vec<_> = (0..8u32)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for i in 0..250u32 {
                    let k = i * 8 + t;
                    assert!(tree.insert(&key(k), rid(k)).unwrap());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    tree.verify_integrity().unwrap();
    assert_eq!(collect_keys(&tree), (0..2000).collect::<Vec<_>>());
}

#[test]
fn test_btree_concurrent_mixed_workload() {
    let (bpm, _temp) = create_bpm(128);
    let tree = Arc::new(create_tree(&bpm, 5, 5));

    for k in 0..1000 {
        tree.insert(&key(k), rid(k)).unwrap();
    }

    let mut handles = Vec::new();
    // Writers delete disjoint key ranges
    for t in 0..4u32 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for k in (t * 250..(t + 1) * 250).filter(|k| k % 2 == 0) {
                tree.remove(&key(k)).unwrap();
            }
        }));
    }
    // Readers only look up keys nobody removes
    for _ in 0..4 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for k in (1..1000).step_by(2) {
                assert_eq!(tree.get_value(&key(k)).unwrap(), vec![rid(k)]);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    tree.verify_integrity().unwrap();
    let expected: BTreeSet<u32> = (1..1000).step_by(2).collect();
    let actual: BTreeSet<u32> = collect_keys(&tree).into_iter().collect();
    assert_eq!(actual, expected);
}

fn assert_strictly_ascending(keys: &[u32]) {
    for pair in keys.windows(2) {
        assert!(pair[0] < pair[1], "scan went from {} to {}", pair[0], pair[1]);
    }
}

#[test]
fn test_btree_scans_during_overlapping_writes() {
    let (bpm, _temp) = create_bpm(256);
    let tree = Arc::new(create_tree(&bpm, 3, 3));

    for k in (0..500).step_by(2) {
        tree.insert(&key(k), rid(k)).unwrap();
    }

    let mut writers = Vec::new();
    for t in 0..4u64 {
        let tree = Arc::clone(&tree);
        writers.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(0xc0ffee + t);
            for _ in 0..3000 {
                let k = rng.gen_range(0..500u32);
                if rng.gen_bool(0.5) {
                    tree.insert(&key(k), rid(k)).unwrap();
                } else {
                    tree.remove(&key(k)).unwrap();
                }
            }
        }));
    }

    let mut readers = Vec::new();
    for t in 0..4u32 {
        let tree = Arc::clone(&tree);
        readers.push(thread::spawn(move || {
            let mut completed = 0;
            for round in 0..40u32 {
                let scanned: Result<Vec<u32>, CinderError> = if t % 2 == 0 {
                    tree.begin()
                        .and_then(|it| it.map(|e| e.map(|(k, _)| decode(&k))).collect())
                } else {
                    let start = (round * 37) % 400;
                    tree.range_scan(&key(start), &key(start + 100)).map(|entries| {
                        entries.iter().map(|(k, _)| decode(k)).collect()
                    })
                };
                // A scan may give up with an error, but never yields out of order
                if let Ok(keys) = scanned {
                    assert_strictly_ascending(&keys);
                    if t % 2 == 1 {
                        let start = (round * 37) % 400;
                        assert!(keys.iter().all(|&k| k >= start && k <= start + 100));
                    }
                    completed += 1;
                }
            }
            completed
        }));
    }

    for writer in writers {
        writer.join().unwrap();
    }
    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }

    tree.verify_integrity().unwrap();
    let keys = collect_keys(&tree);
    assert_strictly_ascending(&keys);
    for &k in &keys {
        assert_eq!(tree.get_value(&key(k)).unwrap(), vec![rid(k)]);
    }
}
