//! Time sources for [`crate::RollingCounter`].
//!
//! Buckets are keyed by whole Unix seconds. The counter reads "now" through the
//! [`Clock`] trait so that callers and tests can supply their own notion of
//! time.

use std::time::{SystemTime, UNIX_EPOCH};

/// The `Clock` used by every counter
pub trait Clock: Send + Sync {
    /// The current time, floored to whole Unix seconds.
    fn now_seconds(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
/// A clock that operates with respect to wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_seconds(&self) -> i64 {
        unix_seconds(SystemTime::now())
    }
}

/// Convert `time` into whole Unix seconds, flooring toward negative infinity.
///
/// Instants too far from the epoch to fit saturate at the `i64` bounds.
#[must_use]
pub fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => i64::try_from(since.as_secs()).unwrap_or(i64::MAX),
        Err(err) => {
            // Before the epoch. A partial second belongs to the earlier
            // second, i.e. -0.5s is second -1.
            let before = err.duration();
            let secs = i64::try_from(before.as_secs()).unwrap_or(i64::MAX);
            if before.subsec_nanos() > 0 {
                secs.saturating_neg().saturating_sub(1)
            } else {
                secs.saturating_neg()
            }
        }
    }
}

#[cfg(any(test, loom))]
pub(crate) use manual::ManualClock;

#[cfg(any(test, loom))]
mod manual {
    use std::sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    };

    use super::Clock;

    /// A clock that only moves when told to. Clones share the same time.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct ManualClock {
        now: Arc<AtomicI64>,
    }

    impl ManualClock {
        pub(crate) fn new(now: i64) -> Self {
            Self {
                now: Arc::new(AtomicI64::new(now)),
            }
        }

        pub(crate) fn set(&self, now: i64) {
            self.now.store(now, Ordering::SeqCst);
        }

        pub(crate) fn advance(&self, seconds: i64) {
            self.now.fetch_add(seconds, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_seconds(&self) -> i64 {
            self.now.load(Ordering::SeqCst)
        }
    }
}
