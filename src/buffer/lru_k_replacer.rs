use std::collections::{HashMap, VecDeque};

use log::trace;
use parking_lot::Mutex;

use crate::common::{CinderError, FrameId, Result, Timestamp};

/// Tracks access history for a single frame
#[derive(Debug)]
struct FrameAccessInfo {
    /// The last (at most) k access timestamps, most recent at back
    history: VecDeque<Timestamp>,
    is_evictable: bool,
}

impl FrameAccessInfo {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    fn record_access(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        while self.history.len() > k {
            self.history.pop_front();
        }
    }

    /// Backward k-distance from `now`, or None (+inf) with fewer than k accesses.
    fn k_distance(&self, now: Timestamp, k: usize) -> Option<Timestamp> {
        if self.history.len() < k {
            None
        } else {
            Some(now - self.history[self.history.len() - k])
        }
    }

    fn most_recent_access(&self) -> Timestamp {
        self.history.back().copied().unwrap_or(0)
    }
}

/// Eviction rank of a candidate frame. Larger ranks are evicted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EvictionRank {
    /// At least k accesses; ranked by backward k-distance
    Finite(Timestamp),
    /// Fewer than k accesses; ranked by how long ago the last access was
    Infinite(std::cmp::Reverse<Timestamp>),
}

struct ReplacerState {
    /// Logical clock, advanced on every recorded access
    current_timestamp: Timestamp,
    frames: HashMap<FrameId, FrameAccessInfo>,
    num_evictable: usize,
}

/// LRU-K Replacement Policy
///
/// The LRU-K algorithm evicts a frame whose backward k-distance is the maximum
/// of all evictable frames. Backward k-distance is the difference in time
/// between the current timestamp and the timestamp of the kth previous access.
///
/// A frame with fewer than k historical accesses is given +inf as its backward
/// k-distance and is always preferred over frames with a finite distance. Among
/// several +inf frames, the one whose most recent access is oldest is evicted
/// (plain LRU).
pub struct LruKReplacer {
    k: usize,
    /// Frame ids must be below this bound
    max_frames: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer with the given k value and maximum frame count.
    pub fn new(k: usize, max_frames: usize) -> Self {
        assert!(k > 0, "k must be at least 1");
        Self {
            k,
            max_frames,
            state: Mutex::new(ReplacerState {
                current_timestamp: 0,
                frames: HashMap::with_capacity(max_frames),
                num_evictable: 0,
            }),
        }
    }

    fn check_frame(&self, frame_id: FrameId) -> Result<()> {
        if frame_id.as_usize() >= self.max_frames {
            return Err(CinderError::InvalidFrameId(frame_id));
        }
        Ok(())
    }

    /// Evicts the evictable frame with the largest backward k-distance and
    /// forgets its history. Returns None if no frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.num_evictable == 0 {
            return None;
        }

        let now = state.current_timestamp;
        let victim = state
            .frames
            .iter()
            .filter(|(_, info)| info.is_evictable)
            .max_by_key(|(_, info)| match info.k_distance(now, self.k) {
                Some(distance) => EvictionRank::Finite(distance),
                None => EvictionRank::Infinite(std::cmp::Reverse(info.most_recent_access())),
            })
            .map(|(frame_id, _)| *frame_id)?;

        state.frames.remove(&victim);
        state.num_evictable -= 1;
        trace!("LRU-K evicted {}", victim);
        Some(victim)
    }

    /// Records that the given frame was accessed at the current timestamp.
    /// Called whenever the buffer pool pins a page into the frame.
    pub fn record_access(&self, frame_id: FrameId) -> Result<()> {
        self.check_frame(frame_id)?;

        let mut state = self.state.lock();
        let timestamp = state.current_timestamp;
        state.current_timestamp += 1;
        state
            .frames
            .entry(frame_id)
            .or_insert_with(FrameAccessInfo::new)
            .record_access(timestamp, self.k);
        Ok(())
    }

    /// Marks or unmarks a frame as an eviction candidate.
    /// Frames without recorded accesses are ignored.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) -> Result<()> {
        self.check_frame(frame_id)?;

        let mut state = self.state.lock();
        let Some(info) = state.frames.get_mut(&frame_id) else {
            return Ok(());
        };
        if info.is_evictable == is_evictable {
            return Ok(());
        }

        info.is_evictable = is_evictable;
        if is_evictable {
            state.num_evictable += 1;
        } else {
            state.num_evictable -= 1;
        }
        Ok(())
    }

    /// Drops all history for a frame whose page is being deleted.
    ///
    /// The frame must have been unmarked with `set_evictable(frame, false)`
    /// first; removing a frame that is still a candidate fails with
    /// `FrameStillEvictable`. Unknown frames are ignored.
    pub fn remove(&self, frame_id: FrameId) -> Result<()> {
        self.check_frame(frame_id)?;

        let mut state = self.state.lock();
        match state.frames.get(&frame_id) {
            None => Ok(()),
            Some(info) if info.is_evictable => Err(CinderError::FrameStillEvictable(frame_id)),
            Some(_) => {
                state.frames.remove(&frame_id);
                Ok(())
            }
        }
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().num_evictable
    }

    /// Returns the k value of this replacer.
    pub fn k(&self) -> usize {
        self.k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(replacer: &LruKReplacer, frame: u32) {
        replacer.record_access(FrameId::new(frame)).unwrap();
    }

    fn evictable(replacer: &LruKReplacer, frame: u32) {
        replacer.set_evictable(FrameId::new(frame), true).unwrap();
    }

    #[test]
    fn test_lru_k_replacer_new() {
        let replacer = LruKReplacer::new(2, 10);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.k(), 2);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_k_replacer_infinite_distance_is_lru() {
        let replacer = LruKReplacer::new(2, 10);

        access(&replacer, 0);
        access(&replacer, 1);
        access(&replacer, 2);
        for frame in 0..3 {
            evictable(&replacer, frame);
        }
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
        assert_eq!(replacer.size(), 2);
    }

    #[test]
    fn test_lru_k_replacer_infinite_tie_uses_most_recent_access() {
        let replacer = LruKReplacer::new(3, 10);

        // Frame 0: t=0, t=3. Frame 1: t=1. Frame 2: t=2.
        access(&replacer, 0);
        access(&replacer, 1);
        access(&replacer, 2);
        access(&replacer, 0);
        for frame in 0..3 {
            evictable(&replacer, frame);
        }

        // All below k accesses; frame 1 has the oldest most recent access
        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.evict(), Some(FrameId::new(2)));
        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    }

    #[test]
    fn test_lru_k_replacer_infinite_beats_finite() {
        let replacer = LruKReplacer::new(2, 10);

        access(&replacer, 0);
        access(&replacer, 0);
        access(&replacer, 1);
        evictable(&replacer, 0);
        evictable(&replacer, 1);

        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    }

    #[test]
    fn test_lru_k_replacer_largest_k_distance() {
        let replacer = LruKReplacer::new(2, 10);

        // Frame 0: t=0,1. Frame 1: t=2,3. Frame 2: t=4,5.
        for frame in 0..3 {
            access(&replacer, frame);
            access(&replacer, frame);
        }
        // Frame 0 touched again: its 2nd most recent access becomes t=1
        access(&replacer, 0);
        for frame in 0..3 {
            evictable(&replacer, frame);
        }

        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.evict(), Some(FrameId::new(2)));
    }

    #[test]
    fn test_lru_k_replacer_not_evictable() {
        let replacer = LruKReplacer::new(2, 10);

        access(&replacer, 0);
        access(&replacer, 1);
        evictable(&replacer, 1);

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_k_replacer_toggle_evictable() {
        let replacer = LruKReplacer::new(2, 10);

        access(&replacer, 0);
        evictable(&replacer, 0);
        evictable(&replacer, 0);
        assert_eq!(replacer.size(), 1);

        replacer.set_evictable(FrameId::new(0), false).unwrap();
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);

        evictable(&replacer, 0);
        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    }

    #[test]
    fn test_lru_k_replacer_unknown_frame_is_ignored() {
        let replacer = LruKReplacer::new(2, 10);
        evictable(&replacer, 3);
        assert_eq!(replacer.size(), 0);
        replacer.remove(FrameId::new(3)).unwrap();
    }

    #[test]
    fn test_lru_k_replacer_remove() {
        let replacer = LruKReplacer::new(2, 10);

        access(&replacer, 0);
        evictable(&replacer, 0);
        assert!(matches!(
            replacer.remove(FrameId::new(0)),
            Err(CinderError::FrameStillEvictable(_))
        ));
        assert_eq!(replacer.size(), 1);

        replacer.set_evictable(FrameId::new(0), false).unwrap();
        replacer.remove(FrameId::new(0)).unwrap();
        assert_eq!(replacer.size(), 0);

        // History is gone, so the frame is not tracked any more
        evictable(&replacer, 0);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_k_replacer_rejects_out_of_range_frames() {
        let replacer = LruKReplacer::new(2, 4);
        assert!(matches!(
            replacer.record_access(FrameId::new(4)),
            Err(CinderError::InvalidFrameId(_))
        ));
        assert!(replacer.set_evictable(FrameId::new(7), true).is_err());
        assert!(replacer.remove(FrameId::new(9)).is_err());
    }
}
