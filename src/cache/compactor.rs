//! Size-bounded eviction.
//!
//! The compactor keeps the total on-disk footprint (page files plus the
//! index database) under the configured budget by evicting the oldest and
//! coldest pages. A pass is stateless and idempotent: running it while
//! already under budget is a no-op.
//!
//! Footprint accounting is two-tiered. The cheap index-based estimate gates
//! the pass, so the common already-under-budget case costs one COUNT query.
//! Once eviction is actually needed, the loop is driven by the precise
//! stat-walk of the page files, which is what the logged outcome reports.
//!
//! The background worker runs on its own thread and opens its own index
//! connection for every pass. It never shares the façade's connection: the
//! embedded store has no fine-grained concurrent-writer locking, and a
//! stuck pass must not take down the primary read/write path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;

use super::config::CacheConfig;
use super::index::PageIndex;
use super::metrics::CacheMetrics;
use super::store::PageStore;

/// Fraction of `max_bytes` a pass shaves down to. The 10% headroom avoids
/// immediately re-triggering compaction after shaving exactly to the limit.
const HEADROOM: f64 = 0.9;

enum CompactionMessage {
    Trigger,
    Shutdown,
}

/// Outcome of one compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Pages evicted (files and index rows removed).
    pub pages_evicted: u64,
    /// Footprint shrinkage measured across the whole pass.
    pub bytes_reclaimed: u64,
    /// Evict-and-remeasure rounds the pass needed.
    pub rounds: u64,
}

/// A single stateless eviction pass over one cache directory.
#[derive(Debug, Clone)]
pub struct Compactor {
    dir: PathBuf,
    config: CacheConfig,
}

impl Compactor {
    /// Creates a pass runner for the cache rooted at `dir`. Connections are
    /// opened per [`run`](Self::run), not held.
    pub fn new(dir: &Path, config: CacheConfig) -> Self {
        Self {
            dir: dir.to_path_buf(),
            config,
        }
    }

    /// Runs one pass: while the precise footprint exceeds 90% of the
    /// budget, evict a batch of the least-recently/least-frequently used
    /// pages, reclaim index space, and remeasure.
    pub fn run(&self) -> Result<CompactionStats> {
        let index = PageIndex::open(&self.dir, &self.config)?;
        let store = PageStore::new(&self.dir);
        let settings = index.settings();
        let desired = (settings.max_bytes as f64 * HEADROOM) as u64;
        let mut stats = CompactionStats::default();

        if index.estimated_total_bytes()? <= desired {
            debug!("cache.compaction.noop");
            return Ok(stats);
        }

        let mut current = store.total_bytes()? + index.index_file_bytes();
        let size_before = current;
        while current > desired {
            let overshoot = current - desired;
            let batch = eviction_batch(overshoot, settings.page_size);
            let victims = index.least_recently_used(batch)?;
            if victims.is_empty() {
                break;
            }
            let mut by_channel: BTreeMap<String, Vec<u64>> = BTreeMap::new();
            for victim in victims {
                by_channel.entry(victim.channel).or_default().push(victim.page);
            }
            for (channel, pages) in &by_channel {
                store.delete(channel, pages)?;
                let removed = index.delete(channel, pages)?;
                stats.pages_evicted += removed as u64;
            }
            index.reclaim_space()?;
            stats.rounds += 1;
            current = store.total_bytes()? + index.index_file_bytes();
        }
        stats.bytes_reclaimed = size_before.saturating_sub(current);

        if stats.pages_evicted > 0 {
            info!(
                pages = stats.pages_evicted,
                bytes_reclaimed = stats.bytes_reclaimed,
                rounds = stats.rounds,
                footprint = current,
                "cache.compaction.completed"
            );
        } else {
            debug!(footprint = current, "cache.compaction.noop");
        }
        Ok(stats)
    }
}

/// Candidate eviction count for one round. Intentionally overshoots the
/// theoretical minimum (the `1.5` factor and `+5` floor) to trade a bit of
/// extra eviction for fewer rounds.
fn eviction_batch(overshoot_bytes: u64, page_size: u64) -> usize {
    let per_page = page_size.max(1) as f64;
    ((1.5 * (overshoot_bytes as f64 / 100.0)) / per_page).floor() as usize + 5
}

/// Handle to the background compaction worker.
///
/// Offers both drive modes: [`run_async`](Self::run_async) nudges the
/// worker thread and returns immediately; [`run_sync`](Self::run_sync) runs
/// a pass inline on the caller's thread and blocks until it finishes (used
/// by tests and explicit maintenance calls). Dropping the handle shuts the
/// worker down and joins it.
pub struct CompactorHandle {
    sender: Sender<CompactionMessage>,
    worker: Option<thread::JoinHandle<()>>,
    compactor: Compactor,
    metrics: Arc<Mutex<CacheMetrics>>,
}

impl std::fmt::Debug for CompactorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactorHandle")
            .field("compactor", &self.compactor)
            .finish()
    }
}

impl CompactorHandle {
    /// Spawns the worker thread for the cache rooted at `dir`. When the
    /// config carries a `background_interval_secs`, the worker also runs a
    /// pass on that tick; otherwise it only runs when triggered.
    pub fn spawn(dir: &Path, config: CacheConfig, metrics: Arc<Mutex<CacheMetrics>>) -> Self {
        let (sender, receiver) = mpsc::channel();
        let compactor = Compactor::new(dir, config.clone());
        let worker_compactor = compactor.clone();
        let worker_metrics = Arc::clone(&metrics);
        let interval = config.background_interval_secs;
        let worker = thread::spawn(move || {
            worker_loop(worker_compactor, receiver, interval, worker_metrics);
        });
        Self {
            sender,
            worker: Some(worker),
            compactor,
            metrics,
        }
    }

    /// Asks the worker to run a pass and returns immediately.
    pub fn run_async(&self) {
        if self.sender.send(CompactionMessage::Trigger).is_err() {
            warn!("cache.compaction.worker_gone");
        }
    }

    /// Runs a pass inline, with its own connections, and blocks until done.
    pub fn run_sync(&self) -> Result<CompactionStats> {
        let stats = self.compactor.run()?;
        merge_stats(&self.metrics, stats);
        Ok(stats)
    }
}

impl Drop for CompactorHandle {
    fn drop(&mut self) {
        let _ = self.sender.send(CompactionMessage::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    compactor: Compactor,
    receiver: Receiver<CompactionMessage>,
    interval_secs: Option<u64>,
    metrics: Arc<Mutex<CacheMetrics>>,
) {
    loop {
        let message = match interval_secs {
            Some(secs) => match receiver.recv_timeout(Duration::from_secs(secs)) {
                Ok(message) => Some(message),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match receiver.recv() {
                Ok(message) => Some(message),
                Err(_) => return,
            },
        };
        match message {
            Some(CompactionMessage::Shutdown) => return,
            Some(CompactionMessage::Trigger) | None => match compactor.run() {
                Ok(stats) => merge_stats(&metrics, stats),
                // A failed pass only leaves the cache temporarily over
                // budget; the next trigger gets another chance.
                Err(err) => warn!(error = %err, "cache.compaction.failed"),
            },
        }
    }
}

fn merge_stats(metrics: &Arc<Mutex<CacheMetrics>>, stats: CompactionStats) {
    let mut m = metrics.lock();
    m.compactions_performed += 1;
    m.pages_evicted += stats.pages_evicted;
    m.bytes_reclaimed += stats.bytes_reclaimed;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_overshoots_and_never_returns_zero() {
        assert_eq!(eviction_batch(0, 4096), 5);
        assert!(eviction_batch(10 * 1024 * 1024, 4096) > 5);
        // Degenerate page size must not divide by zero.
        assert!(eviction_batch(1024, 0) >= 5);
    }

    #[test]
    fn handle_spawns_and_shuts_down() {
        let dir = tempfile::tempdir().expect("tempdir");
        let metrics = Arc::new(Mutex::new(CacheMetrics::new()));
        let handle = CompactorHandle::spawn(dir.path(), CacheConfig::default(), metrics);
        handle.run_async();
        drop(handle);
    }

    #[test]
    fn pass_on_empty_cache_is_a_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let compactor = Compactor::new(dir.path(), CacheConfig::default());
        let stats = compactor.run().expect("run");
        assert_eq!(stats, CompactionStats::default());
    }
}
