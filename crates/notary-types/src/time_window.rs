//! The declared validity interval of a transaction.
//!
//! ```text
//!   from_time                 until_time
//!   ────┬──────────────────────────┬────▶ t
//!       │◀──── transaction valid ─▶│
//! ```
//!
//! Both bounds are inclusive and independently optional. A window with
//! `from_time > until_time` cannot be constructed, and is rejected on
//! deserialization as well, so checkers never re-check ordering.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{NotaryError, Result};

/// Validity interval of a transaction, checked by the notary against its clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimeWindow")]
pub struct TimeWindow {
    from_time: Option<DateTime<Utc>>,
    until_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawTimeWindow {
    from_time: Option<DateTime<Utc>>,
    until_time: Option<DateTime<Utc>>,
}

impl TryFrom<RawTimeWindow> for TimeWindow {
    type Error = NotaryError;

    fn try_from(raw: RawTimeWindow) -> Result<Self> {
        Self::new(raw.from_time, raw.until_time)
    }
}

impl TimeWindow {
    /// Build a window from optional bounds.
    ///
    /// # Errors
    /// Returns [`NotaryError::InvalidTimeWindow`] if both bounds are present
    /// and `from_time > until_time`.
    pub fn new(
        from_time: Option<DateTime<Utc>>,
        until_time: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        if let (Some(from), Some(until)) = (from_time, until_time) {
            if from > until {
                return Err(NotaryError::InvalidTimeWindow {
                    reason: format!("from_time {from} is after until_time {until}"),
                });
            }
        }
        Ok(Self {
            from_time,
            until_time,
        })
    }

    /// Window bounded on both sides.
    pub fn between(from_time: DateTime<Utc>, until_time: DateTime<Utc>) -> Result<Self> {
        Self::new(Some(from_time), Some(until_time))
    }

    /// Valid from `from_time` onwards.
    #[must_use]
    pub fn from_only(from_time: DateTime<Utc>) -> Self {
        Self {
            from_time: Some(from_time),
            until_time: None,
        }
    }

    /// Valid up to and including `until_time`.
    #[must_use]
    pub fn until_only(until_time: DateTime<Utc>) -> Self {
        Self {
            from_time: None,
            until_time: Some(until_time),
        }
    }

    /// No time constraint declared.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            from_time: None,
            until_time: None,
        }
    }

    /// Window centred on `time`, extending `tolerance` either side.
    ///
    /// A negative tolerance is treated as zero.
    #[must_use]
    pub fn with_tolerance(time: DateTime<Utc>, tolerance: Duration) -> Self {
        let tolerance = tolerance.max(Duration::zero());
        Self {
            from_time: Some(time - tolerance),
            until_time: Some(time + tolerance),
        }
    }

    #[must_use]
    pub fn from_time(&self) -> Option<DateTime<Utc>> {
        self.from_time
    }

    #[must_use]
    pub fn until_time(&self) -> Option<DateTime<Utc>> {
        self.until_time
    }
}
