//! Time-window admission check.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use notary_types::{Clock, NotaryError, Result, TimeWindow, TransactionId};

/// Decide whether `window` admits `now` give or take `tolerance`.
///
/// A missing bound is unconstrained. The window is rejected when `now` is
/// more than `tolerance` past `until_time` or more than `tolerance` before
/// `from_time`; exactly `tolerance` away is still admitted.
#[must_use]
pub fn is_valid_at(window: &TimeWindow, now: DateTime<Utc>, tolerance: Duration) -> bool {
    let too_late = window.until_time().is_some_and(|until| now - until > tolerance);
    let too_early = window.from_time().is_some_and(|from| from - now > tolerance);
    !too_late && !too_early
}

/// Checks declared windows against an injected clock.
#[derive(Clone)]
pub struct TimeWindowChecker {
    clock: Arc<dyn Clock>,
    tolerance: Duration,
}

impl TimeWindowChecker {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, tolerance: Duration) -> Self {
        Self { clock, tolerance }
    }

    /// Tolerance given in milliseconds, as it appears in configuration.
    #[must_use]
    pub fn from_millis(clock: Arc<dyn Clock>, tolerance_ms: u64) -> Self {
        let millis = i64::try_from(tolerance_ms).unwrap_or(i64::MAX);
        Self::new(clock, Duration::milliseconds(millis))
    }

    #[must_use]
    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    #[must_use]
    pub fn is_valid(&self, window: &TimeWindow) -> bool {
        is_valid_at(window, self.clock.now(), self.tolerance)
    }

    /// `Ok` for an absent or admissible window.
    pub fn check(&self, window: Option<&TimeWindow>, tx_id: TransactionId) -> Result<()> {
        match window {
            Some(window) if !self.is_valid(window) => Err(NotaryError::TimeWindowInvalid(tx_id)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use notary_types::FixedClock;

    use super::*;

    fn checker(now: DateTime<Utc>) -> TimeWindowChecker {
        TimeWindowChecker::new(Arc::new(FixedClock::at(now)), Duration::seconds(30))
    }

    #[test]
    fn expiry_boundary() {
        let now = Utc::now();
        let c = checker(now);
        assert!(c.is_valid(&TimeWindow::until_only(now - Duration::seconds(29))));
        assert!(c.is_valid(&TimeWindow::until_only(now - Duration::seconds(30))));
        assert!(!c.is_valid(&TimeWindow::until_only(now - Duration::seconds(31))));
    }

    #[test]
    fn start_boundary() {
        let now = Utc::now();
        let c = checker(now);
        assert!(c.is_valid(&TimeWindow::from_only(now + Duration::seconds(29))));
        assert!(c.is_valid(&TimeWindow::from_only(now + Duration::seconds(30))));
        assert!(!c.is_valid(&TimeWindow::from_only(now + Duration::seconds(31))));
    }

    #[test]
    fn unbounded_and_enclosing_windows_pass() {
        let now = Utc::now();
        let c = checker(now);
        assert!(c.is_valid(&TimeWindow::unbounded()));
        assert!(c.is_valid(&TimeWindow::with_tolerance(now, Duration::seconds(1))));
        let past = TimeWindow::between(now - Duration::hours(2), now - Duration::hours(1)).unwrap();
        assert!(!c.is_valid(&past));
    }

    #[test]
    fn check_maps_to_typed_error() {
        let now = Utc::now();
        let c = checker(now);
        let tx = TransactionId::from_bytes([7; 32]);
        assert!(c.check(None, tx).is_ok());
        let late = TimeWindow::until_only(now - Duration::minutes(5));
        assert!(matches!(c.check(Some(&late), tx), Err(NotaryError::TimeWindowInvalid(id)) if id == tx));
    }

    #[test]
    fn follows_the_clock() {
        let now = Utc::now();
        let clock = FixedClock::at(now);
        let c = TimeWindowChecker::from_millis(Arc::new(clock.clone()), 30_000);
        let window = TimeWindow::until_only(now);
        assert!(c.is_valid(&window));
        clock.advance(Duration::seconds(31));
        assert!(!c.is_valid(&window));
    }
}
