//! Embedded page index.
//!
//! The index is a small SQLite database at the root of the cache directory
//! holding two tables:
//!
//! - `pages(channel, page, access_count, last_access, has_data)` with
//!   primary key `(channel, page)` — one row per cached page, including
//!   known-empty pages (rows with `has_data = 0` and no backing file);
//! - `settings(page_size, max_bytes, modified)` — a singleton row seeded on
//!   first open.
//!
//! `page_size` is immutable for the lifetime of a cache directory: when a
//! newly configured value disagrees with the persisted one, the persisted
//! one wins and a warning is logged. `max_bytes` may be retuned across
//! opens.
//!
//! All statements are parameterized, and every statement — reads included,
//! since the rollback journal blocks readers while a writer commits — runs
//! under the injected [`RetryPolicy`] so that transient lock contention
//! with the compaction worker is absorbed rather than surfaced.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::error::Result;

use super::config::CacheConfig;
use super::retry::RetryPolicy;

/// File name of the index database inside the cache directory.
pub const INDEX_FILE: &str = "index.db";

/// Effective settings after reconciling configuration with the persisted
/// settings row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSettings {
    /// Page payload size in bytes. Persisted value wins on conflict.
    pub page_size: u64,
    /// Eviction budget in bytes.
    pub max_bytes: u64,
}

/// One row of the `pages` table, as returned by eviction queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    /// Channel the page belongs to.
    pub channel: String,
    /// Page number within the channel.
    pub page: u64,
    /// Number of reads since the page was cached.
    pub access_count: u64,
    /// Microseconds since the epoch of the last read or write.
    pub last_access: i64,
}

/// Durable, queryable record of which pages exist and how hot they are.
pub struct PageIndex {
    conn: Mutex<Connection>,
    path: PathBuf,
    settings: IndexSettings,
    retry: RetryPolicy,
}

impl std::fmt::Debug for PageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageIndex")
            .field("path", &self.path)
            .field("settings", &self.settings)
            .finish()
    }
}

impl PageIndex {
    /// Opens (creating if absent) the index inside `dir` and reconciles the
    /// settings row with `config`.
    pub fn open(dir: &Path, config: &CacheConfig) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(INDEX_FILE);
        let conn = Connection::open(&path)?;
        // Default rollback journal, not WAL: the journal disappears after
        // every commit, so the index footprint the compactor accounts for
        // is just the database file. Cross-connection contention surfaces
        // as SQLITE_BUSY and is absorbed by the retry policy.
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        // Backoff is owned by the retry policy; SQLite's own busy handler
        // would just add an opaque wait in front of it.
        conn.busy_timeout(Duration::ZERO)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pages (
                channel      TEXT    NOT NULL,
                page         INTEGER NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                last_access  INTEGER NOT NULL,
                has_data     INTEGER NOT NULL,
                PRIMARY KEY (channel, page)
            );
            CREATE TABLE IF NOT EXISTS settings (
                id        INTEGER PRIMARY KEY CHECK (id = 0),
                page_size INTEGER NOT NULL,
                max_bytes INTEGER NOT NULL,
                modified  INTEGER NOT NULL
            );",
        )?;
        let settings = reconcile_settings(&conn, config)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            settings,
            retry: config.retry.clone(),
        })
    }

    /// Effective settings for this cache directory.
    pub fn settings(&self) -> IndexSettings {
        self.settings
    }

    /// Inserts a new page row with `access_count = 0` and a fresh
    /// `last_access`. Fails with [`CacheError::DuplicateKey`] if the row
    /// already exists.
    ///
    /// [`CacheError::DuplicateKey`]: crate::error::CacheError::DuplicateKey
    pub fn put(&self, channel: &str, page: u64, has_data: bool) -> Result<()> {
        self.retry.run("index.put", || {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO pages (channel, page, access_count, last_access, has_data)
                 VALUES (?1, ?2, 0, ?3, ?4)",
                params![channel, page as i64, now_micros(), has_data],
            )?;
            Ok(())
        })
    }

    /// Whether any row (data or known-empty) exists for the key.
    pub fn exists(&self, channel: &str, page: u64) -> Result<bool> {
        self.retry.run("index.exists", || {
            let conn = self.conn.lock();
            let row: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM pages WHERE channel = ?1 AND page = ?2",
                    params![channel, page as i64],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(row.is_some())
        })
    }

    /// The `has_data` flag for the key, or `None` if no row exists.
    pub fn has_data(&self, channel: &str, page: u64) -> Result<Option<bool>> {
        self.retry.run("index.has_data", || {
            let conn = self.conn.lock();
            let flag: Option<bool> = conn
                .query_row(
                    "SELECT has_data FROM pages WHERE channel = ?1 AND page = ?2",
                    params![channel, page as i64],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(flag)
        })
    }

    /// Increments `access_count`, refreshes `last_access`, and updates
    /// `has_data`. Returns `false` when no row exists for the key.
    pub fn touch(&self, channel: &str, page: u64, has_data: bool) -> Result<bool> {
        self.retry.run("index.touch", || {
            let conn = self.conn.lock();
            let updated = conn.execute(
                "UPDATE pages
                 SET access_count = access_count + 1, last_access = ?3, has_data = ?4
                 WHERE channel = ?1 AND page = ?2",
                params![channel, page as i64, now_micros(), has_data],
            )?;
            Ok(updated > 0)
        })
    }

    /// The `n` oldest-and-coldest rows: ordered by `last_access` ascending,
    /// ties broken by `access_count` ascending, so an old page that is still
    /// heavily reused in bursts loses to genuinely cold data.
    pub fn least_recently_used(&self, n: usize) -> Result<Vec<PageRecord>> {
        self.retry.run("index.lru", || {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT channel, page, access_count, last_access FROM pages
                 ORDER BY last_access ASC, access_count ASC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![n as i64], |row| {
                Ok(PageRecord {
                    channel: row.get(0)?,
                    page: row.get::<_, i64>(1)? as u64,
                    access_count: row.get::<_, i64>(2)? as u64,
                    last_access: row.get(3)?,
                })
            })?;
            let mut records = Vec::new();
            for record in rows {
                records.push(record?);
            }
            Ok(records)
        })
    }

    /// Removes the given pages of one channel in a single transaction.
    /// Returns the number of rows deleted.
    pub fn delete(&self, channel: &str, pages: &[u64]) -> Result<usize> {
        if pages.is_empty() {
            return Ok(0);
        }
        self.retry.run("index.delete", || {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let mut deleted = 0;
            {
                let mut stmt =
                    tx.prepare("DELETE FROM pages WHERE channel = ?1 AND page = ?2")?;
                for page in pages {
                    deleted += stmt.execute(params![channel, *page as i64])?;
                }
            }
            tx.commit()?;
            Ok(deleted)
        })
    }

    /// Compacts the index file after bulk deletes. The file-system-visible
    /// index footprint only shrinks after this step.
    pub fn reclaim_space(&self) -> Result<()> {
        self.retry.run("index.vacuum", || {
            let conn = self.conn.lock();
            conn.execute_batch("VACUUM")?;
            Ok(())
        })
    }

    /// Number of rows with `has_data = 1`.
    pub fn data_page_count(&self) -> Result<u64> {
        self.retry.run("index.count", || {
            let conn = self.conn.lock();
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM pages WHERE has_data = 1",
                [],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Cheap footprint estimate: index file size plus `page_size` for every
    /// row that claims data. Exact page file sizes are not consulted; use
    /// [`PageStore::total_bytes`](super::PageStore::total_bytes) when
    /// precision matters more than speed.
    pub fn estimated_total_bytes(&self) -> Result<u64> {
        let pages = self.data_page_count()?;
        Ok(self.index_file_bytes() + pages * self.settings.page_size)
    }

    /// On-disk size of the index database and any journal sidecars,
    /// best effort.
    pub fn index_file_bytes(&self) -> u64 {
        let mut total = 0;
        for suffix in ["", "-journal", "-wal", "-shm"] {
            let mut path = self.path.clone().into_os_string();
            path.push(suffix);
            if let Ok(meta) = std::fs::metadata(&path) {
                total += meta.len();
            }
        }
        total
    }
}

fn reconcile_settings(conn: &Connection, config: &CacheConfig) -> Result<IndexSettings> {
    let persisted: Option<(i64, i64)> = conn
        .query_row(
            "SELECT page_size, max_bytes FROM settings WHERE id = 0",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match persisted {
        Some((page_size, max_bytes)) => {
            let page_size = page_size as u64;
            if page_size != config.page_size {
                warn!(
                    persisted = page_size,
                    configured = config.page_size,
                    "cache.settings.page_size_conflict"
                );
            }
            if max_bytes as u64 != config.max_bytes {
                conn.execute(
                    "UPDATE settings SET max_bytes = ?1, modified = ?2 WHERE id = 0",
                    params![config.max_bytes as i64, now_micros()],
                )?;
            }
            Ok(IndexSettings {
                page_size,
                max_bytes: config.max_bytes,
            })
        }
        None => {
            conn.execute(
                "INSERT INTO settings (id, page_size, max_bytes, modified)
                 VALUES (0, ?1, ?2, ?3)",
                params![config.page_size as i64, config.max_bytes as i64, now_micros()],
            )?;
            Ok(IndexSettings {
                page_size: config.page_size,
                max_bytes: config.max_bytes,
            })
        }
    }
}

pub(crate) fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
