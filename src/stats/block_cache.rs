use crate::stats::summary::Success;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Successes found per scanned block, kept for `retention` blocks behind the newest entry.
pub struct BlockCache {
    blocks: Mutex<BTreeMap<u64, Vec<Success>>>,
    retention: u64,
}

impl BlockCache {
    pub fn new(retention: u64) -> Self {
        Self {
            blocks: Mutex::new(BTreeMap::new()),
            retention: retention.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Vec<Success>>> {
        match self.blocks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("[STATS] block cache lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn load(&self, block: u64) -> Option<Vec<Success>> {
        self.lock().get(&block).cloned()
    }

    pub fn store(&self, block: u64, successes: Vec<Success>) {
        let mut blocks = self.lock();
        blocks.insert(block, successes);
        let newest = blocks.keys().next_back().copied().unwrap_or(block);
        let floor = newest.saturating_sub(self.retention);
        if floor > 0 {
            *blocks = blocks.split_off(&floor);
        }
    }

    /// Highest cached block, or 0 when empty.
    pub fn max_key(&self) -> u64 {
        self.lock().keys().next_back().copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_blocks_older_than_retention() {
        let cache = BlockCache::new(10);
        cache.store(5, vec![Success { trigger: 4, included: 5 }]);
        cache.store(12, Vec::new());
        assert!(cache.load(5).is_some());
        cache.store(16, Vec::new());
        assert!(cache.load(5).is_none());
        assert_eq!(cache.load(12), Some(Vec::new()));
        assert_eq!(cache.max_key(), 16);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn late_backfill_of_old_blocks_is_dropped() {
        let cache = BlockCache::new(3);
        cache.store(100, Vec::new());
        cache.store(50, Vec::new());
        assert!(cache.load(50).is_none());
        assert_eq!(cache.max_key(), 100);
    }
}
