//! Interval — the period of a schedule rule.
//!
//! Accepted syntax is an optional `@every ` prefix followed by one or more
//! `<integer><unit>` segments, where unit is `ms`, `s`, `m` or `h`:
//! `10s`, `1m30s`, `@every 250ms`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const EVERY_PREFIX: &str = "@every";

/// Longest accepted period.
pub const MAX_INTERVAL: Duration = Duration::from_secs(366 * 86_400);

/// A strictly positive period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval(Duration);

impl Interval {
    /// Wrap a duration, rejecting zero.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::ZeroInterval`] when `duration` is zero
    /// - [`ValidationError::IntervalTooLong`] when `duration` exceeds
    ///   [`MAX_INTERVAL`]
    pub fn new(duration: Duration) -> Result<Self, ValidationError> {
        if duration.is_zero() {
            return Err(ValidationError::ZeroInterval);
        }
        if duration > MAX_INTERVAL {
            return Err(ValidationError::IntervalTooLong);
        }
        Ok(Self(duration))
    }

    #[must_use]
    pub fn from_secs(secs: u64) -> Option<Self> {
        Self::new(Duration::from_secs(secs)).ok()
    }

    #[must_use]
    pub fn as_duration(self) -> Duration {
        self.0
    }
}

impl FromStr for Interval {
    type Err = ValidationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let malformed = || ValidationError::MalformedInterval(input.to_string());

        let trimmed = input.trim();
        let body = match trimmed.strip_prefix(EVERY_PREFIX) {
            Some(rest) if rest.starts_with(char::is_whitespace) => rest.trim_start(),
            Some(_) => return Err(malformed()),
            None => trimmed,
        };
        if body.is_empty() {
            return Err(malformed());
        }

        let mut total = Duration::ZERO;
        let mut rest = body;
        while !rest.is_empty() {
            let digits = rest.find(|c: char| !c.is_ascii_digit()).ok_or_else(malformed)?;
            if digits == 0 {
                return Err(malformed());
            }
            let value: u64 = rest[..digits].parse().map_err(|_| malformed())?;
            rest = &rest[digits..];

            let unit_len = rest
                .find(|c: char| c.is_ascii_digit())
                .unwrap_or(rest.len());
            let segment = match &rest[..unit_len] {
                "ms" => Duration::from_millis(value),
                "s" => Duration::from_secs(value),
                "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(malformed)?),
                "h" => Duration::from_secs(value.checked_mul(3600).ok_or_else(malformed)?),
                _ => return Err(malformed()),
            };
            rest = &rest[unit_len..];
            total = total.checked_add(segment).ok_or_else(malformed)?;
        }

        Self::new(total)
    }
}

impl TryFrom<String> for Interval {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.to_string()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut secs = self.0.as_secs();
        let millis = self.0.subsec_millis();

        let hours = secs / 3600;
        secs %= 3600;
        let minutes = secs / 60;
        secs %= 60;

        if hours > 0 {
            write!(f, "{hours}h")?;
        }
        if minutes > 0 {
            write!(f, "{minutes}m")?;
        }
        if secs > 0 {
            write!(f, "{secs}s")?;
        }
        if millis > 0 {
            write!(f, "{millis}ms")?;
        }
        Ok(())
    }
}
