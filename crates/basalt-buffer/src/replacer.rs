//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Marks a frame as evictable (unpinned) or not.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);

    /// Selects a victim frame for eviction and stops tracking it.
    ///
    /// Returns None if no frames are evictable.
    fn evict(&self) -> Option<FrameId>;

    /// Removes a frame from the replacer.
    ///
    /// No-op if the frame is untracked. Panics if the frame is tracked but
    /// not evictable; that indicates a caller bug.
    fn remove(&self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// LRU-K replacement algorithm implementation.
///
/// Frames with fewer than K recorded accesses form the *history* set and are
/// always evicted before frames with K or more accesses (the *cache* set).
/// Within the history set the victim is the frame with the earliest first
/// access (FIFO); within the cache set it is the frame with the smallest
/// k-distance, the timestamp of its K-th most recent access.
pub struct LruKReplacer {
    /// Number of frames this replacer tracks; valid ids are `0..num_frames`.
    num_frames: usize,
    /// The K in LRU-K.
    k: usize,
    /// Internal state protected by the replacer latch.
    inner: Mutex<LruKInner>,
}

struct LruKInner {
    /// Monotonic logical clock, bumped on every access.
    current_timestamp: u64,
    /// Number of tracked frames currently evictable.
    evictable_count: usize,
    /// Per-frame access state.
    frames: HashMap<FrameId, FrameAccess>,
    /// Frames with fewer than K accesses, front = earliest first access.
    history: VecDeque<FrameId>,
    /// Frames with K or more accesses, ascending by k-distance.
    cache: Vec<FrameId>,
}

struct FrameAccess {
    evictable: bool,
    access_count: usize,
    /// The most recent access timestamps, at most K of them, oldest first.
    timestamps: VecDeque<u64>,
}

impl FrameAccess {
    /// Timestamp of the K-th most recent access (the oldest retained).
    fn k_distance(&self) -> u64 {
        *self
            .timestamps
            .front()
            .expect("tracked frame has at least one access")
    }
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer for `num_frames` frames.
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "k must be non-zero");
        Self {
            num_frames,
            k,
            inner: Mutex::new(LruKInner {
                current_timestamp: 0,
                evictable_count: 0,
                frames: HashMap::new(),
                history: VecDeque::new(),
                cache: Vec::new(),
            }),
        }
    }

    /// Returns the number of frames this replacer can track.
    pub fn capacity(&self) -> usize {
        self.num_frames
    }
}

impl Replacer for LruKReplacer {
    fn record_access(&self, frame_id: FrameId) {
        assert!(
            (frame_id.0 as usize) < self.num_frames,
            "invalid frame: {frame_id}"
        );

        let mut inner = self.inner.lock();
        inner.current_timestamp += 1;
        let now = inner.current_timestamp;

        let k = self.k;
        let LruKInner {
            evictable_count,
            frames,
            history,
            cache,
            ..
        } = &mut *inner;

        if !frames.contains_key(&frame_id) {
            // First access: join the history set, evictable by default.
            frames.insert(
                frame_id,
                FrameAccess {
                    evictable: true,
                    access_count: 1,
                    timestamps: VecDeque::from([now]),
                },
            );
            *evictable_count += 1;
            history.push_back(frame_id);
            return;
        }

        let state = frames.get_mut(&frame_id).expect("frame is tracked");
        state.access_count += 1;
        state.timestamps.push_back(now);

        if state.access_count < k {
            // Still in the history set; only the timestamp record changes.
            return;
        }

        let promoted = state.access_count == k;
        if !promoted {
            state.timestamps.pop_front();
        }
        let pivot = state.k_distance();

        if promoted {
            let pos = history
                .iter()
                .position(|f| *f == frame_id)
                .expect("promoted frame tracked in history list");
            history.remove(pos);
        } else {
            let pos = cache
                .iter()
                .position(|f| *f == frame_id)
                .expect("frame tracked in cache list");
            cache.remove(pos);
        }

        let insert_at = cache
            .iter()
            .position(|f| frames[f].k_distance() > pivot)
            .unwrap_or(cache.len());
        cache.insert(insert_at, frame_id);
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut inner = self.inner.lock();
        let LruKInner {
            evictable_count,
            frames,
            ..
        } = &mut *inner;

        let Some(state) = frames.get_mut(&frame_id) else {
            return;
        };

        if !state.evictable && evictable {
            *evictable_count += 1;
        }
        if state.evictable && !evictable {
            *evictable_count -= 1;
        }
        state.evictable = evictable;
    }

    fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        if inner.evictable_count == 0 {
            return None;
        }

        let LruKInner {
            evictable_count,
            frames,
            history,
            cache,
            ..
        } = &mut *inner;

        if let Some(pos) = history.iter().position(|f| frames[f].evictable) {
            let frame_id = history.remove(pos).expect("position within history list");
            frames.remove(&frame_id);
            *evictable_count -= 1;
            return Some(frame_id);
        }

        if let Some(pos) = cache.iter().position(|f| frames[f].evictable) {
            let frame_id = cache.remove(pos);
            frames.remove(&frame_id);
            *evictable_count -= 1;
            return Some(frame_id);
        }

        None
    }

    fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        let k = self.k;
        let LruKInner {
            evictable_count,
            frames,
            history,
            cache,
            ..
        } = &mut *inner;

        let Some(state) = frames.get(&frame_id) else {
            return;
        };
        assert!(
            state.evictable,
            "cannot remove non-evictable frame: {frame_id}"
        );

        if state.access_count >= k {
            let pos = cache
                .iter()
                .position(|f| *f == frame_id)
                .expect("frame tracked in cache list");
            cache.remove(pos);
        } else {
            let pos = history
                .iter()
                .position(|f| *f == frame_id)
                .expect("frame tracked in history list");
            history.remove(pos);
        }

        frames.remove(&frame_id);
        *evictable_count -= 1;
    }

    fn size(&self) -> usize {
        self.inner.lock().evictable_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_k_new() {
        let replacer = LruKReplacer::new(10, 2);
        assert_eq!(replacer.capacity(), 10);
        assert_eq!(replacer.size(), 0);
        assert!(replacer.evict().is_none());
    }

    #[test]
    fn test_new_frames_are_evictable() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));

        assert_eq!(replacer.size(), 2);
    }

    #[test]
    fn test_history_evicts_by_first_access() {
        let replacer = LruKReplacer::new(3, 2);

        // Frame 1 reaches K accesses and joins the cache set; frames 2 and 3
        // stay in history and leave in first-access order before frame 1.
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(2));
        replacer.record_access(FrameId(3));

        assert_eq!(replacer.evict(), Some(FrameId(2)));
        assert_eq!(replacer.evict(), Some(FrameId(3)));
        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_cache_evicts_by_k_distance() {
        let replacer = LruKReplacer::new(4, 2);

        // Timestamps: f0 gets {1,5}, f1 {2,6}, f2 {3,7}, f3 {4,8}
        for _ in 0..2 {
            for id in 0..4 {
                replacer.record_access(FrameId(id));
            }
        }

        // f0 has the smallest k-distance (1)
        assert_eq!(replacer.evict(), Some(FrameId(0)));
        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert_eq!(replacer.evict(), Some(FrameId(2)));
        assert_eq!(replacer.evict(), Some(FrameId(3)));
    }

    #[test]
    fn test_reaccess_moves_frame_back() {
        let replacer = LruKReplacer::new(4, 2);

        // Three rounds over 1..=4, then one more access to frame 1. The K-th
        // most recent timestamps end up 9 (f1), 6 (f2), 7 (f3), 8 (f4), so
        // eviction order is 2, 3, 4, 1.
        for _ in 0..3 {
            for id in 1..=4 {
                replacer.record_access(FrameId(id));
            }
        }
        replacer.record_access(FrameId(1));

        assert_eq!(replacer.evict(), Some(FrameId(2)));
        assert_eq!(replacer.evict(), Some(FrameId(3)));
        assert_eq!(replacer.evict(), Some(FrameId(4)));
        assert_eq!(replacer.evict(), Some(FrameId(1)));
    }

    #[test]
    fn test_history_preferred_over_cache() {
        let replacer = LruKReplacer::new(3, 2);

        // Frame 0 is hot (in the cache set); frame 1 is cold with a single
        // access. The cold frame goes first even though it was touched later.
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));

        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert_eq!(replacer.evict(), Some(FrameId(0)));
    }

    #[test]
    fn test_set_evictable() {
        let replacer = LruKReplacer::new(5, 2);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        assert_eq!(replacer.size(), 2);

        replacer.set_evictable(FrameId(0), false);
        assert_eq!(replacer.size(), 1);

        // Idempotent
        replacer.set_evictable(FrameId(0), false);
        assert_eq!(replacer.size(), 1);

        replacer.set_evictable(FrameId(0), true);
        assert_eq!(replacer.size(), 2);

        // Unknown frames are ignored
        replacer.set_evictable(FrameId(4), true);
        assert_eq!(replacer.size(), 2);
    }

    #[test]
    fn test_evict_skips_pinned_frames() {
        let replacer = LruKReplacer::new(3, 2);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.set_evictable(FrameId(0), false);

        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert_eq!(replacer.evict(), None);

        replacer.set_evictable(FrameId(0), true);
        assert_eq!(replacer.evict(), Some(FrameId(0)));
    }

    #[test]
    fn test_evicted_frame_is_forgotten() {
        let replacer = LruKReplacer::new(3, 2);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(0));
        assert_eq!(replacer.evict(), Some(FrameId(0)));

        // A later access starts a fresh history entry
        replacer.record_access(FrameId(0));
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(FrameId(0)));
    }

    #[test]
    fn test_remove() {
        let replacer = LruKReplacer::new(5, 2);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(1));
        assert_eq!(replacer.size(), 2);

        replacer.remove(FrameId(0)); // history set
        replacer.remove(FrameId(1)); // cache set
        assert_eq!(replacer.size(), 0);
        assert!(replacer.evict().is_none());

        // Removing an untracked frame is a no-op
        replacer.remove(FrameId(3));
    }

    #[test]
    #[should_panic(expected = "non-evictable")]
    fn test_remove_non_evictable_panics() {
        let replacer = LruKReplacer::new(5, 2);

        replacer.record_access(FrameId(0));
        replacer.set_evictable(FrameId(0), false);
        replacer.remove(FrameId(0));
    }

    #[test]
    #[should_panic(expected = "invalid frame")]
    fn test_record_access_out_of_range_panics() {
        let replacer = LruKReplacer::new(5, 2);
        replacer.record_access(FrameId(5));
    }

    #[test]
    fn test_lru_1_degenerates_to_lru() {
        let replacer = LruKReplacer::new(3, 1);

        // With K = 1 every frame is in the cache set immediately, ordered by
        // its single most recent access.
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(2));
        replacer.record_access(FrameId(0));

        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert_eq!(replacer.evict(), Some(FrameId(2)));
        assert_eq!(replacer.evict(), Some(FrameId(0)));
    }
}
