//! Property tests over the buffer pool, replacer and B+Tree

use std::collections::BTreeSet;
use std::sync::Arc;

use cinder::buffer::{BasicPageGuard, BufferPoolManager, LruKReplacer};
use cinder::common::{BTreeConfig, CinderError, FrameId, PageId, RecordId, SlotId};
use cinder::index::{BPlusTree, IntegerComparator};
use cinder::storage::disk::DiskManager;
use proptest::prelude::*;
use tempfile::NamedTempFile;

fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    (Arc::new(BufferPoolManager::new(pool_size, 2, dm)), temp_file)
}

#[derive(Debug, Clone)]
enum PoolOp {
    New,
    Fetch(usize),
    Release(usize),
}

fn pool_op() -> impl Strategy<Value = PoolOp> {
    prop_oneof![
        Just(PoolOp::New),
        (0usize..16).prop_map(PoolOp::Fetch),
        (0usize..16).prop_map(PoolOp::Release),
    ]
}

#[derive(Debug, Clone)]
enum TreeOp {
    Insert(u32),
    Remove(u32),
}

fn tree_op() -> impl Strategy<Value = TreeOp> {
    prop_oneof![
        3 => (0u32..300).prop_map(TreeOp::Insert),
        2 => (0u32..300).prop_map(TreeOp::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Pinned pages stay resident, and the pool only fails when every frame
    /// is pinned.
    #[test]
    fn prop_pinned_pages_never_evicted(ops in prop::collection::vec(pool_op(), 1..120)) {
        let pool_size = 4;
        let (bpm, _temp) = create_bpm(pool_size);
        let mut pages: Vec<PageId> = Vec::new();
        let mut held: Vec<BasicPageGuard<'_>> = Vec::new();

        for op in ops {
            match op {
                PoolOp::New => match bpm.new_page() {
                    Ok(guard) => {
                        pages.push(guard.page_id());
                        held.push(guard);
                    }
                    Err(CinderError::BufferPoolFull) => {
                        let distinct: BTreeSet<PageId> = held.iter().map(|g| g.page_id()).collect();
                        prop_assert_eq!(distinct.len(), pool_size);
                    }
                    Err(e) => return Err(TestCaseError::fail(e.to_string())),
                },
                PoolOp::Fetch(i) if !pages.is_empty() => {
                    let page_id = pages[i % pages.len()];
                    match bpm.fetch_page(page_id) {
                        Ok(guard) => held.push(guard),
                        Err(CinderError::BufferPoolFull) => {
                            let distinct: BTreeSet<PageId> = held.iter().map(|g| g.page_id()).collect();
                            prop_assert_eq!(distinct.len(), pool_size);
                        }
                        Err(e) => return Err(TestCaseError::fail(e.to_string())),
                    }
                }
                PoolOp::Release(i) if !held.is_empty() => {
                    let index = i % held.len();
                    drop(held.swap_remove(index));
                }
                _ => {}
            }

            for guard in &held {
                let expected = held.iter().filter(|g| g.page_id() == guard.page_id()).count();
                prop_assert_eq!(bpm.get_pin_count(guard.page_id()), Some(expected as u32));
            }
        }
    }

    /// A frame with fewer than k accesses is always chosen over one with k or more.
    #[test]
    fn prop_lru_k_prefers_infinite_distance(
        hot in prop::collection::vec(0u32..8, 0..40),
        cold in 8u32..16,
    ) {
        let replacer = LruKReplacer::new(2, 16);
        for frame in &hot {
            replacer.record_access(FrameId::new(*frame)).unwrap();
            replacer.record_access(FrameId::new(*frame)).unwrap();
        }
        replacer.record_access(FrameId::new(cold)).unwrap();
        for frame in hot.iter().chain(std::iter::once(&cold)) {
            replacer.set_evictable(FrameId::new(*frame), true).unwrap();
        }

        prop_assert_eq!(replacer.evict(), Some(FrameId::new(cold)));
    }

    /// Non-evictable frames are never chosen.
    #[test]
    fn prop_lru_k_skips_pinned(
        accesses in prop::collection::vec(0u32..10, 1..60),
        pinned in prop::collection::btree_set(0u32..10, 0..10),
    ) {
        let replacer = LruKReplacer::new(3, 10);
        for frame in &accesses {
            replacer.record_access(FrameId::new(*frame)).unwrap();
        }
        for frame in 0..10u32 {
            replacer.set_evictable(FrameId::new(frame), !pinned.contains(&frame)).unwrap();
        }
        while let Some(victim) = replacer.evict() {
            prop_assert!(!pinned.contains(&victim.as_u32()));
        }
    }

    /// Any mix of inserts and removes keeps the tree structurally valid and
    /// in step with an ordered set.
    #[test]
    fn prop_btree_matches_model(
        ops in prop::collection::vec(tree_op(), 1..400),
        leaf_max in 2usize..7,
        internal_max in 3usize..7,
    ) {
        let (bpm, _temp) = create_bpm(64);
        let tree = BPlusTree::new(
            "prop",
            Arc::clone(&bpm),
            Arc::new(IntegerComparator),
            BTreeConfig::new(4, leaf_max, internal_max),
        )
        .unwrap();
        let mut model = BTreeSet::new();

        for op in ops {
            match op {
                TreeOp::Insert(k) => {
                    let rid = RecordId::new(PageId::new(k), SlotId::new(0));
                    prop_assert_eq!(tree.insert(&k.to_le_bytes(), rid).unwrap(), model.insert(k));
                }
                TreeOp::Remove(k) => {
                    tree.remove(&k.to_le_bytes()).unwrap();
                    model.remove(&k);
                }
            }
        }

        prop_assert!(tree.verify_integrity().is_ok());
        prop_assert_eq!(tree.is_empty(), model.is_empty());
        let keys: Vec<u32> = tree
            .begin()
            .unwrap()
            .map(|e| {
                let k = e.unwrap().0;
                u32::from_le_bytes([k[0], k[1], k[2], k[3]])
            })
            .collect();
        prop_assert_eq!(keys, model.into_iter().collect::<Vec<_>>());
    }
}
