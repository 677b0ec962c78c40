//! A time-windowed, concurrency-safe numeric accumulator.
//!
//! This library provides [`RollingCounter`], the metrics primitive behind
//! reliability controls such as circuit breakers. It answers "how many events
//! happened, and what was the peak observed value, in the last `W` seconds?"
//! while many threads write to and read from the same instance.
//!
//! Activity is recorded into per-second buckets keyed by Unix second. Buckets
//! are sparse: a second with no activity has no entry. There is no background
//! task. Every mutating call sweeps buckets that have fallen out of the window,
//! so memory is bounded by the window length for as long as the counter keeps
//! receiving writes.
//!
//! # Window
//!
//! A bucket for second `t` is inside the window at `now` if and only if
//! `now - W <= t <= now`. The same rule drives eviction: any bucket with
//! `t < now - W` is removed by the next mutation. With the default `W` of 10 a
//! bucket written at `T` is still counted at `T + 10` and gone at `T + 11`.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

use serde::{Deserialize, Serialize};

pub mod clock;
pub mod counter;

pub use clock::{Clock, SystemClock, unix_seconds};
pub use counter::RollingCounter;

fn default_window_seconds() -> u32 {
    10
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
/// Configuration of a [`RollingCounter`].
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// The retention window, in seconds, over which sums and maxima are
    /// computed. Zero restricts queries to the current second.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
        }
    }
}

/// Errors produced by [`RollingCounter`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A maximum sample was negative. Samples are unsigned quantities.
    #[error("Sample must not be negative: {sample}")]
    NegativeSample {
        /// The rejected sample
        sample: i64,
    },
}
