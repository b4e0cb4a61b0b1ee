//! The cache subsystem: façade, index, page store, and compactor.

mod compactor;
mod config;
mod core;
mod index;
mod metrics;
mod retry;
mod store;

pub use compactor::{Compactor, CompactionStats, CompactorHandle};
pub use config::{CacheConfig, ConfigError};
pub use core::Cache;
pub use index::{IndexSettings, PageIndex, PageRecord};
pub use metrics::CacheMetrics;
pub use retry::RetryPolicy;
pub use store::PageStore;
