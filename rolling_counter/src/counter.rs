//! The rolling counter
//!
//! [`RollingCounter`] keeps a sparse map from Unix second to a bucket holding
//! one `u64`. Writers touch only the bucket for the current second, readers
//! aggregate every bucket inside the window. The map sits behind a single
//! `RwLock`; bucket values are atomics so that the common case, a write into a
//! bucket that already exists, needs only shared access.
//!
//! Locking discipline:
//!
//! * Bucket values change only while the map's read or write lock is held.
//!   Eviction takes the write lock, so it can never remove a bucket from under
//!   an in-flight update.
//! * A bucket is created under the write lock with create-if-absent. Two
//!   writers racing to create the same second both land in one bucket.
//! * Readers hold the read lock for the whole scan and never upgrade.
//!
//! The bound of `W + 1` buckets holds in steady state only. A writer that reads
//! its second and then stalls may create that bucket after another writer has
//! swept past it. The straggler is removed by the next mutation.
//!
//! Buckets are keyed by the clock's own reading. A clock that steps backward
//! is logged but otherwise trusted, so a step forward and back leaves at most
//! one stray bucket ahead of the corrected time.

use std::{fmt, time::SystemTime};

#[cfg(not(loom))]
use std::sync::{
    RwLock,
    atomic::{AtomicI64, AtomicU64, Ordering},
};

#[cfg(loom)]
use loom::sync::{
    RwLock,
    atomic::{AtomicI64, AtomicU64, Ordering},
};

use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::{
    Config, Error,
    clock::{Clock, SystemClock, unix_seconds},
};

/// Accumulated activity for one second of wall-clock time.
struct Bucket {
    value: AtomicU64,
}

impl Bucket {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    #[inline]
    fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn update_max(&self, sample: u64) {
        self.value.fetch_max(sample, Ordering::Relaxed);
    }

    #[inline]
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A time-windowed counter bucketed by second.
///
/// Safe to share between threads, typically behind an `Arc`. See the crate
/// documentation for window semantics.
pub struct RollingCounter<C = SystemClock> {
    buckets: RwLock<FxHashMap<i64, Bucket>>,
    /// Window length in seconds. Stored signed to keep the key arithmetic in
    /// one domain.
    window: i64,
    /// The latest second any mutation has written to. Diagnostic only.
    latest: AtomicI64,
    clock: C,
}

impl RollingCounter<SystemClock> {
    /// Create a new, empty counter retaining `window_seconds` of history
    /// against the system clock.
    #[must_use]
    pub fn new(window_seconds: u32) -> Self {
        Self::with_clock(window_seconds, SystemClock)
    }

    /// Create a new, empty counter from `config` against the system clock.
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self::new(config.window_seconds)
    }
}

impl Default for RollingCounter<SystemClock> {
    fn default() -> Self {
        Self::from_config(Config::default())
    }
}

impl<C> RollingCounter<C>
where
    C: Clock,
{
    /// Create a new, empty counter that reads the time from `clock`.
    #[must_use]
    pub fn with_clock(window_seconds: u32, clock: C) -> Self {
        Self {
            buckets: RwLock::new(FxHashMap::default()),
            window: i64::from(window_seconds),
            latest: AtomicI64::new(i64::MIN),
            clock,
        }
    }

    /// The retention window in seconds.
    #[must_use]
    pub fn window_seconds(&self) -> u32 {
        u32::try_from(self.window).unwrap_or(u32::MAX)
    }

    /// Add one to the bucket for the current second.
    ///
    /// Concurrent increments are never lost.
    ///
    /// # Panics
    ///
    /// Function will panic if the interior lock is poisoned.
    pub fn increment(&self) {
        let now = self.with_current_bucket(Bucket::increment);
        self.evict(now);
    }

    /// Raise the bucket for the current second to `sample` if `sample` is
    /// larger than what it holds.
    ///
    /// The bucket ends up holding the maximum of every sample submitted in
    /// that second, regardless of order.
    ///
    /// # Panics
    ///
    /// Function will panic if the interior lock is poisoned.
    pub fn update_max(&self, sample: u64) {
        let now = self.with_current_bucket(|bucket| bucket.update_max(sample));
        self.evict(now);
    }

    /// As [`RollingCounter::update_max`] for signed samples.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NegativeSample`] if `sample` is below zero. The counter
    /// is left untouched and no eviction is performed.
    ///
    /// # Panics
    ///
    /// Function will panic if the interior lock is poisoned.
    pub fn try_update_max(&self, sample: i64) -> Result<(), Error> {
        let sample = u64::try_from(sample).map_err(|_| Error::NegativeSample { sample })?;
        self.update_max(sample);
        Ok(())
    }

    /// Sum of every bucket inside the window ending at `now`.
    ///
    /// Pure read: no buckets are created or evicted. Saturates at `u64::MAX`.
    ///
    /// # Panics
    ///
    /// Function will panic if the interior lock is poisoned.
    #[must_use]
    pub fn sum(&self, now: SystemTime) -> u64 {
        self.sum_at(unix_seconds(now))
    }

    /// Maximum bucket value inside the window ending at `now`, zero if the
    /// window is empty.
    ///
    /// # Panics
    ///
    /// Function will panic if the interior lock is poisoned.
    #[must_use]
    pub fn max(&self, now: SystemTime) -> u64 {
        self.max_at(unix_seconds(now))
    }

    /// As [`RollingCounter::sum`] with `now` given in Unix seconds.
    ///
    /// # Panics
    ///
    /// Function will panic if the interior lock is poisoned.
    #[must_use]
    pub fn sum_at(&self, now: i64) -> u64 {
        let buckets = self.buckets.read().expect("lock poisoned");
        buckets
            .iter()
            .filter(|(second, _)| self.in_window(**second, now))
            .fold(0_u64, |acc, (_, bucket)| acc.saturating_add(bucket.get()))
    }

    /// As [`RollingCounter::max`] with `now` given in Unix seconds.
    ///
    /// # Panics
    ///
    /// Function will panic if the interior lock is poisoned.
    #[must_use]
    pub fn max_at(&self, now: i64) -> u64 {
        let buckets = self.buckets.read().expect("lock poisoned");
        buckets
            .iter()
            .filter(|(second, _)| self.in_window(**second, now))
            .map(|(_, bucket)| bucket.get())
            .max()
            .unwrap_or(0)
    }

    /// Sum over the window ending at the counter's own clock.
    ///
    /// # Panics
    ///
    /// Function will panic if the interior lock is poisoned.
    #[must_use]
    pub fn current_sum(&self) -> u64 {
        self.sum_at(self.clock.now_seconds())
    }

    /// Maximum over the window ending at the counter's own clock.
    ///
    /// # Panics
    ///
    /// Function will panic if the interior lock is poisoned.
    #[must_use]
    pub fn current_max(&self) -> u64 {
        self.max_at(self.clock.now_seconds())
    }

    /// Number of buckets currently held, including stale buckets not yet
    /// swept.
    ///
    /// # Panics
    ///
    /// Function will panic if the interior lock is poisoned.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().expect("lock poisoned").len()
    }

    #[inline]
    fn horizon(&self, now: i64) -> i64 {
        now.saturating_sub(self.window)
    }

    #[inline]
    fn in_window(&self, second: i64, now: i64) -> bool {
        self.horizon(now) <= second && second <= now
    }

    /// The second mutations write to, as read from the clock.
    fn current_second(&self) -> i64 {
        let now = self.clock.now_seconds();
        let latest = self.latest.fetch_max(now, Ordering::Relaxed);
        if latest > now {
            warn!(
                clock_second = now,
                latest_second = latest,
                delta = latest.saturating_sub(now),
                "Clock moved backward"
            );
        }
        now
    }

    /// Apply `op` to the bucket for the current second, creating it if need
    /// be. Returns the second written to.
    fn with_current_bucket<F>(&self, op: F) -> i64
    where
        F: FnOnce(&Bucket),
    {
        let now = self.current_second();

        {
            let buckets = self.buckets.read().expect("lock poisoned");
            if let Some(bucket) = buckets.get(&now) {
                op(bucket);
                return now;
            }
        }

        // Another writer may have created the bucket between our read and
        // this write. `entry` re-checks under the exclusive lock.
        let mut buckets = self.buckets.write().expect("lock poisoned");
        let bucket = buckets.entry(now).or_insert_with(|| {
            debug!(second = now, "Creating bucket");
            Bucket::new()
        });
        op(bucket);
        now
    }

    /// Remove every bucket older than the window ending at `now`.
    fn evict(&self, now: i64) {
        let horizon = self.horizon(now);

        {
            let buckets = self.buckets.read().expect("lock poisoned");
            if !buckets.keys().any(|second| *second < horizon) {
                return;
            }
        }

        let mut buckets = self.buckets.write().expect("lock poisoned");
        let before = buckets.len();
        buckets.retain(|second, _| *second >= horizon);
        trace!(
            evicted = before - buckets.len(),
            horizon = horizon,
            "Evicted stale buckets"
        );
    }
}

impl<C> fmt::Debug for RollingCounter<C>
where
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollingCounter")
            .field("window", &self.window)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
