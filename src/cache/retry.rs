//! Backoff policy for transient index-store contention.

use std::thread;
use std::time::Duration;

use tracing::{debug, error};

use crate::error::{CacheError, Result};

/// Exponential-backoff retry strategy for index operations.
///
/// Lock contention on the embedded index store is expected whenever the
/// compaction worker and a caller write concurrently. Contended operations
/// sleep and retry with a doubling backoff, and give up once the next
/// backoff would reach `cap`. Eviction is best-effort, so exhaustion is an
/// error the caller may legitimately ignore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// First sleep duration after a busy result.
    pub initial: Duration,
    /// Give up once the backoff reaches this bound.
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            cap: Duration::from_secs(1024),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps and fails on the first busy result.
    /// Useful for tests and for callers that prefer to handle contention
    /// themselves.
    pub fn immediate() -> Self {
        Self {
            initial: Duration::ZERO,
            cap: Duration::ZERO,
        }
    }

    /// Runs `op`, retrying on [`CacheError::IndexBusy`] until the backoff
    /// reaches the cap. Any other result is returned as-is.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut backoff = self.initial;
        loop {
            match op() {
                Err(CacheError::IndexBusy) => {
                    if backoff >= self.cap {
                        error!(op = what, "cache.index.retries_exhausted");
                        return Err(CacheError::IndexBusy);
                    }
                    debug!(op = what, backoff_ms = backoff.as_millis() as u64, "cache.index.busy");
                    thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_first_success() {
        let policy = RetryPolicy::immediate();
        let result = policy.run("test", || Ok(7u32)).expect("success");
        assert_eq!(result, 7);
    }

    #[test]
    fn retries_busy_then_succeeds() {
        let policy = RetryPolicy {
            initial: Duration::from_millis(1),
            cap: Duration::from_millis(64),
        };
        let mut attempts = 0;
        let result = policy.run("test", || {
            attempts += 1;
            if attempts < 3 {
                Err(CacheError::IndexBusy)
            } else {
                Ok(attempts)
            }
        });
        assert_eq!(result.expect("eventual success"), 3);
    }

    #[test]
    fn gives_up_once_backoff_reaches_cap() {
        let policy = RetryPolicy {
            initial: Duration::from_millis(1),
            cap: Duration::from_millis(4),
        };
        let mut attempts = 0;
        let result: Result<()> = policy.run("test", || {
            attempts += 1;
            Err(CacheError::IndexBusy)
        });
        assert!(matches!(result, Err(CacheError::IndexBusy)));
        // 1ms, 2ms sleeps, then 4ms reaches the cap and gives up.
        assert_eq!(attempts, 3);
    }

    #[test]
    fn other_errors_pass_through_without_retry() {
        let policy = RetryPolicy::default();
        let mut attempts = 0;
        let result: Result<()> = policy.run("test", || {
            attempts += 1;
            Err(CacheError::DuplicateKey)
        });
        assert!(matches!(result, Err(CacheError::DuplicateKey)));
        assert_eq!(attempts, 1);
    }
}
