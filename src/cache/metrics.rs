//! Operational counters for the cache.

/// Counters accumulated by a [`Cache`](super::Cache) instance and its
/// background compaction worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    /// Reads that returned a page payload.
    pub hits: u64,
    /// Reads with no index entry for the key.
    pub misses: u64,
    /// Reads that returned a memoized known-empty page.
    pub known_empty_hits: u64,
    /// Reads where the index claimed data but the file was gone.
    pub orphan_reads: u64,
    /// Successful writes through `set_page_data`.
    pub writes: u64,
    /// Completed compaction passes.
    pub compactions_performed: u64,
    /// Pages evicted across all compaction passes.
    pub pages_evicted: u64,
    /// Bytes reclaimed across all compaction passes.
    pub bytes_reclaimed: u64,
}

impl CacheMetrics {
    /// Creates a zeroed counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of reads served from the cache (payload or known-empty).
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.known_empty_hits;
        let total = served + self.misses + self.orphan_reads;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }

    /// Resets all counters to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
