use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Value stored for a clip that has been queued but not picked up yet.
pub const QUEUED: i32 = -1;

type Shard = RwLock<HashMap<i64, i32>>;

/// Percent-complete per clip, split into independently locked shards so
/// unrelated clips never contend. A clip's entry is written by one worker at a
/// time; readers may be anywhere.
pub struct ProgressTracker {
    shards: Box<[Shard]>,
}

impl ProgressTracker {
    pub fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self { shards }
    }

    fn shard(&self, clip_id: i64) -> &Shard {
        let index = clip_id.rem_euclid(self.shards.len() as i64) as usize;
        &self.shards[index]
    }

    // A panicking writer can only leave a whole entry behind, never a torn one.
    fn read(&self, clip_id: i64) -> RwLockReadGuard<'_, HashMap<i64, i32>> {
        self.shard(clip_id)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, clip_id: i64) -> RwLockWriteGuard<'_, HashMap<i64, i32>> {
        self.shard(clip_id)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, clip_id: i64, value: i32) {
        self.write(clip_id).insert(clip_id, value);
    }

    pub fn get(&self, clip_id: i64) -> Option<i32> {
        self.read(clip_id).get(&clip_id).copied()
    }

    pub fn remove(&self, clip_id: i64) {
        self.write(clip_id).remove(&clip_id);
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

/// Write access to a single clip's entry, handed to whoever processes it.
#[derive(Clone)]
pub struct ProgressHandle {
    tracker: Arc<ProgressTracker>,
    clip_id: i64,
}

impl ProgressHandle {
    pub fn new(tracker: Arc<ProgressTracker>, clip_id: i64) -> Self {
        Self { tracker, clip_id }
    }

    pub fn clip_id(&self) -> i64 {
        self.clip_id
    }

    /// Publishes a percentage, clamped into `0..=100`.
    pub fn report(&self, percent: i32) {
        self.tracker.set(self.clip_id, percent.clamp(0, 100));
    }

    pub fn clear(&self) {
        self.tracker.remove(self.clip_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn set_get_remove() {
        let tracker = ProgressTracker::new(4);
        assert_eq!(tracker.get(3), None);

        tracker.set(3, QUEUED);
        assert_eq!(tracker.get(3), Some(QUEUED));

        tracker.set(3, 57);
        assert_eq!(tracker.get(3), Some(57));

        tracker.remove(3);
        assert_eq!(tracker.get(3), None);
        tracker.remove(3);
    }

    #[test]
    fn ids_sharing_a_shard_keep_separate_entries() {
        let tracker = ProgressTracker::new(10);
        tracker.set(1, 10);
        tracker.set(11, 90);
        tracker.set(-9, 5);

        assert_eq!(tracker.get(1), Some(10));
        assert_eq!(tracker.get(11), Some(90));
        assert_eq!(tracker.get(-9), Some(5));
    }

    #[test]
    fn held_shard_does_not_block_other_shards() {
        let tracker = Arc::new(ProgressTracker::new(10));
        tracker.set(2, 20);

        let _held = tracker.write(1);

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&tracker);
        thread::spawn(move || {
            other.set(2, 21);
            tx.send(other.get(2)).unwrap();
        });

        let seen = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("access to another shard blocked");
        assert_eq!(seen, Some(21));
    }

    #[test]
    fn handle_clamps_reported_values() {
        let tracker = Arc::new(ProgressTracker::new(2));
        let handle = ProgressHandle::new(Arc::clone(&tracker), 8);

        handle.report(140);
        assert_eq!(tracker.get(8), Some(100));
        handle.report(-3);
        assert_eq!(tracker.get(8), Some(0));

        handle.clear();
        assert_eq!(tracker.get(8), None);
    }

    #[test]
    fn concurrent_writers_on_distinct_ids() {
        let tracker = Arc::new(ProgressTracker::new(10));
        let threads: Vec<_> = (0..8i64)
            .map(|id| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    for percent in 0..=100 {
                        tracker.set(id, percent);
                        assert_eq!(tracker.get(id), Some(percent));
                    }
                })
            })
            .collect();

        for handle in threads {
            handle.join().unwrap();
        }
        for id in 0..8 {
            assert_eq!(tracker.get(id), Some(100));
        }
    }
}
