//! Retry utilities: backoff builders for transient failures.
//!
//! Uses `backon` for exponential backoff with jitter. Provides the standard
//! backoff configuration for endpoint connection retries.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Backoff for endpoint connection retries at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
///
/// Callers that must never give up (the traffic monitor) keep retrying at
/// the max delay once the schedule is exhausted.
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}
