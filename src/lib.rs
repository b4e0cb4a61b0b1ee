//! Disk-backed page cache for time-series channel data.
//!
//! Pages of time-series data are cached on disk, one file per page under a
//! per-channel directory, with an embedded SQLite index recording which
//! pages exist, an emptiness flag, and access statistics. A background
//! compactor evicts the oldest and coldest pages whenever the on-disk
//! footprint exceeds a configured budget.
//!
//! The entry point is [`Cache`]:
//!
//! ```no_run
//! use tscache::{Cache, Result};
//!
//! fn example() -> Result<()> {
//!     let cache = Cache::open("/var/cache/ts")?;
//!     cache.set_page_data("chan1", 0, b"payload", false)?;
//!     let data = cache.get_page_data("chan1", 0)?;
//!     assert_eq!(data.as_deref(), Some(&b"payload"[..]));
//!     cache.close();
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;
pub mod logging;

pub use cache::{
    Cache, CacheConfig, CacheMetrics, CompactionStats, CompactorHandle, ConfigError, PageIndex,
    PageRecord, PageStore, RetryPolicy,
};
pub use error::{CacheError, Result};
pub use logging::init_logging;
