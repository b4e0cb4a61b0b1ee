//! The cache façade.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};

use super::compactor::{CompactionStats, CompactorHandle};
use super::config::CacheConfig;
use super::index::PageIndex;
use super::metrics::CacheMetrics;
use super::store::PageStore;

/// Disk-backed page cache for time-series channel data.
///
/// The only component callers interact with. Construct one instance per
/// process and configuration and pass it to consumers explicitly; there is
/// no global singleton. [`close`](Self::close) (or dropping the instance)
/// shuts down the background compaction worker.
///
/// All read/write operations take `&self` and are safe to call from
/// multiple threads. Writes to the same `(channel, page)` from concurrent
/// callers are last-write-wins at the index level, which is safe because
/// page content for a given key is assumed immutable once correct.
pub struct Cache {
    dir: PathBuf,
    config: CacheConfig,
    index: PageIndex,
    store: PageStore,
    writes_since_inspect: AtomicU64,
    compactor: CompactorHandle,
    metrics: Arc<Mutex<CacheMetrics>>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .field("index", &self.index)
            .finish()
    }
}

impl Cache {
    /// Opens (creating if absent) a cache rooted at `dir` with default
    /// configuration.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(dir, CacheConfig::default())
    }

    /// Opens a cache with an explicit configuration. On an existing cache
    /// directory the persisted `page_size` wins over the configured one
    /// (with a warning); `max_bytes` is retuned to the configured value.
    pub fn open_with_config(dir: impl AsRef<Path>, config: CacheConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let index = PageIndex::open(&dir, &config)?;
        let store = PageStore::new(&dir);
        let metrics = Arc::new(Mutex::new(CacheMetrics::new()));
        let compactor = CompactorHandle::spawn(&dir, config.clone(), Arc::clone(&metrics));
        Ok(Self {
            dir,
            config,
            index,
            store,
            writes_since_inspect: AtomicU64::new(0),
            compactor,
            metrics,
        })
    }

    /// Effective page size for this cache directory (persisted settings
    /// win over configuration).
    pub fn page_size(&self) -> u64 {
        self.index.settings().page_size
    }

    /// True if an index entry exists for the key, whether it carries data
    /// or is a memoized known-empty page.
    pub fn check_page(&self, channel: &str, page: u64) -> Result<bool> {
        self.index.exists(channel, page)
    }

    /// The `has_data` flag for the key, or `None` if the page has never
    /// been cached.
    pub fn page_has_data(&self, channel: &str, page: u64) -> Result<Option<bool>> {
        self.index.has_data(channel, page)
    }

    /// Reads a page.
    ///
    /// - `None`: true cache miss, the caller must fetch from origin.
    /// - `Some(empty)`: the page is memoized as known-empty.
    /// - `Some(payload)`: cache hit.
    ///
    /// A page whose index row claims data but whose file is gone (removed
    /// out-of-band or by a racing eviction) degrades to a miss with a
    /// warning, never an error. The same holds when the index stays locked
    /// past the retry policy's patience: the worst observable symptom of
    /// internal contention is a miss that sends the caller back to origin.
    pub fn get_page_data(&self, channel: &str, page: u64) -> Result<Option<Vec<u8>>> {
        let flag = match self.index.has_data(channel, page) {
            Ok(flag) => flag,
            Err(CacheError::IndexBusy) => {
                warn!(channel, page, "cache.page.read_contended");
                self.metrics.lock().misses += 1;
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        match flag {
            None => {
                self.metrics.lock().misses += 1;
                Ok(None)
            }
            Some(false) => {
                self.touch_best_effort(channel, page, false);
                self.metrics.lock().known_empty_hits += 1;
                Ok(Some(Vec::new()))
            }
            Some(true) => match self.store.read(channel, page)? {
                Some(payload) => {
                    self.touch_best_effort(channel, page, true);
                    self.metrics.lock().hits += 1;
                    Ok(Some(payload))
                }
                None => {
                    warn!(channel, page, "cache.page.missing_file");
                    self.metrics.lock().orphan_reads += 1;
                    Ok(None)
                }
            },
        }
    }

    /// Access-stat bookkeeping is not required for read correctness: a
    /// touch that cannot land (retry exhaustion, contention) is logged and
    /// dropped rather than discarding an already-read payload.
    fn touch_best_effort(&self, channel: &str, page: u64, has_data: bool) {
        if let Err(err) = self.index.touch(channel, page, has_data) {
            warn!(channel, page, error = %err, "cache.page.touch_failed");
        }
    }

    /// Caches a page. An empty `data` records the page as known-empty (a
    /// valid cached fact that avoids re-fetching to discover emptiness).
    ///
    /// The payload file is durably written before the index row is
    /// recorded, so the index never points at data that is not on disk. A
    /// duplicate insert (two callers fetched the same missing page
    /// concurrently) is tolerated silently. With `update = true` an
    /// existing row is refreshed in place.
    ///
    /// Every write counts toward `inspect_interval`; crossing it triggers
    /// an asynchronous compaction pass.
    pub fn set_page_data(
        &self,
        channel: &str,
        page: u64,
        data: &[u8],
        update: bool,
    ) -> Result<()> {
        let has_data = !data.is_empty();
        if has_data {
            self.store.write(channel, page, data)?;
        }
        if update {
            if !self.index.touch(channel, page, has_data)? {
                self.insert_tolerating_duplicate(channel, page, has_data)?;
            }
        } else {
            self.insert_tolerating_duplicate(channel, page, has_data)?;
        }
        self.metrics.lock().writes += 1;

        let writes = self.writes_since_inspect.fetch_add(1, Ordering::SeqCst) + 1;
        if writes >= self.config.inspect_interval.max(1) {
            self.writes_since_inspect.store(0, Ordering::SeqCst);
            self.compactor.run_async();
        }
        Ok(())
    }

    fn insert_tolerating_duplicate(&self, channel: &str, page: u64, has_data: bool) -> Result<()> {
        match self.index.put(channel, page, has_data) {
            Err(CacheError::DuplicateKey) => {
                debug!(channel, page, "cache.page.duplicate_insert");
                Ok(())
            }
            other => other,
        }
    }

    /// Runs a compaction pass. Synchronous mode blocks until the pass
    /// finishes and returns its stats; asynchronous mode nudges the
    /// background worker and returns immediately.
    pub fn start_compaction(&self, synchronous: bool) -> Result<Option<CompactionStats>> {
        if synchronous {
            self.compactor.run_sync().map(Some)
        } else {
            self.compactor.run_async();
            Ok(None)
        }
    }

    /// Precise on-disk footprint: page files plus the index database.
    pub fn size(&self) -> Result<u64> {
        Ok(self.store.total_bytes()? + self.index.index_file_bytes())
    }

    /// Cheap footprint estimate from the index alone.
    pub fn estimated_size(&self) -> Result<u64> {
        self.index.estimated_total_bytes()
    }

    /// Snapshot of the operational counters.
    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.lock().clone()
    }

    /// Deletes the entire cache directory tree and recreates empty state.
    /// Settings are reseeded from the current configuration.
    pub fn clear(&mut self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.index = PageIndex::open(&self.dir, &self.config)?;
        self.writes_since_inspect.store(0, Ordering::SeqCst);
        debug!(dir = %self.dir.display(), "cache.cleared");
        Ok(())
    }

    /// Shuts down the background worker and consumes the cache.
    pub fn close(self) {}
}
