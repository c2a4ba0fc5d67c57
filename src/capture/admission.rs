//! Frame admission control
//!
//! Decides per incoming frame whether it enters the analysis pipeline or is
//! released straight away.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::analysis::ScanState;

/// Default minimum spacing between admitted frames
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(160);

/// Why a frame was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// A date is already accepted (frozen or manually entered)
    Frozen,
    /// A previous frame is still being recognized
    InFlight,
    /// Too soon after the last admitted frame
    Throttled,
    /// The worker queue was full when the frame arrived
    QueueFull,
    /// The session has shut down
    Closed,
}

/// Rate limiter and single-flight lock for incoming frames
#[derive(Debug, Clone)]
pub struct FrameAdmission {
    min_interval: Duration,
    last_admitted: Option<Instant>,
    in_flight: bool,
}

impl Default for FrameAdmission {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

impl FrameAdmission {
    /// Create a controller with the given minimum interval
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_admitted: None,
            in_flight: false,
        }
    }

    /// Minimum spacing between admitted frames
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Whether an admitted frame has not completed yet
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Check the admission rules in order and admit the frame if all pass.
    ///
    /// On success the frame is marked in flight and its timestamp becomes the
    /// reference for the throttle.
    pub fn try_admit(&mut self, state: &ScanState, timestamp: Instant) -> Result<(), DropReason> {
        if state.is_locked() {
            return Err(DropReason::Frozen);
        }

        if self.in_flight {
            return Err(DropReason::InFlight);
        }

        if let Some(last) = self.last_admitted {
            if timestamp.saturating_duration_since(last) < self.min_interval {
                return Err(DropReason::Throttled);
            }
        }

        self.last_admitted = Some(timestamp);
        self.in_flight = true;
        Ok(())
    }

    /// Clear the in-flight flag. Returns whether a frame was in flight.
    pub fn complete(&mut self) -> bool {
        std::mem::replace(&mut self.in_flight, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ParsedDate;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_first_frame_admitted() {
        let mut admission = FrameAdmission::default();
        assert!(admission.try_admit(&ScanState::Scanning, Instant::now()).is_ok());
        assert!(admission.is_in_flight());
    }

    #[test]
    fn test_throttle_interval() {
        let mut admission = FrameAdmission::new(ms(160));
        let t0 = Instant::now();

        assert!(admission.try_admit(&ScanState::Scanning, t0).is_ok());
        admission.complete();

        assert_eq!(
            admission.try_admit(&ScanState::Scanning, t0 + ms(100)),
            Err(DropReason::Throttled)
        );
        assert!(admission.try_admit(&ScanState::Scanning, t0 + ms(200)).is_ok());
    }

    #[test]
    fn test_dropped_frame_does_not_reset_throttle() {
        let mut admission = FrameAdmission::new(ms(160));
        let t0 = Instant::now();

        assert!(admission.try_admit(&ScanState::Scanning, t0).is_ok());
        admission.complete();
        assert!(admission.try_admit(&ScanState::Scanning, t0 + ms(150)).is_err());

        // Measured from the last admitted frame, not the last dropped one
        assert!(admission.try_admit(&ScanState::Scanning, t0 + ms(160)).is_ok());
    }

    #[test]
    fn test_single_flight_ignores_elapsed_time() {
        let mut admission = FrameAdmission::new(ms(160));
        let t0 = Instant::now();

        assert!(admission.try_admit(&ScanState::Scanning, t0).is_ok());
        assert_eq!(
            admission.try_admit(&ScanState::Analyzing, t0 + Duration::from_secs(10)),
            Err(DropReason::InFlight)
        );
    }

    #[test]
    fn test_locked_states_drop_first() {
        let date = ParsedDate::new(15, 6, 2026).unwrap();
        let mut admission = FrameAdmission::default();
        let t0 = Instant::now();

        assert_eq!(
            admission.try_admit(&ScanState::Frozen(date.clone()), t0),
            Err(DropReason::Frozen)
        );
        assert_eq!(
            admission.try_admit(&ScanState::ManualOverride(date), t0),
            Err(DropReason::Frozen)
        );
        assert!(!admission.is_in_flight());
    }

    #[test]
    fn test_complete_clears_once() {
        let mut admission = FrameAdmission::default();
        assert!(!admission.complete());

        admission.try_admit(&ScanState::Scanning, Instant::now()).unwrap();
        assert!(admission.complete());
        assert!(!admission.complete());
    }
}
