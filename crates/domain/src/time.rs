//! Time and timestamp helpers.

use chrono::{DateTime, Utc};

/// UTC timestamp used for `received_at`, `fired_at` and other event times.
///
/// Wall-clock only: scheduling decisions use a monotonic clock in the
/// application layer.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}
