//! Pipeline session state
//!
//! Everything that must stay consistent across the frame worker and the
//! control path lives here: the state machine, the admission controller, the
//! last accepted date and the epoch that tags in-flight work. All mutation goes
//! through the transition methods below while the caller holds the session lock.

use std::time::{Duration, Instant};

use chrono::Datelike;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::analysis::{DateExtractor, ParsedDate, ScanState, ScanStateMachine, TransitionError};
use crate::capture::{DropReason, FrameAdmission};
use crate::vision::{FrameError, RecognitionError, RecognizedText};

/// Token for one admitted frame
///
/// A completion is applied only if its ticket is still the one in flight.
/// Retry and teardown move the session to a new epoch, which turns any
/// outstanding ticket stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTicket {
    epoch: u64,
    sequence: u64,
}

impl FrameTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// What a completion did to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// New date accepted; the session is now frozen
    Accepted(ParsedDate),
    /// Text contained no valid date
    NoMatch,
    /// The recognizer reported an error
    Failed(RecognitionError),
    /// Same date as the one already accepted; ignored
    Duplicate,
    /// A date was already fixed while this frame was in flight; result ignored
    Superseded,
    /// Ticket from an earlier epoch or a torn down session; ignored
    Stale,
}

/// Per-session counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub frames_received: u64,
    pub frames_admitted: u64,
    pub dropped_frozen: u64,
    pub dropped_in_flight: u64,
    pub dropped_throttled: u64,
    pub dropped_queue_full: u64,
    pub dropped_closed: u64,
    pub frames_unsupported: u64,
    pub recognition_failures: u64,
    pub no_match: u64,
    pub duplicates: u64,
    pub stale_completions: u64,
    pub dates_accepted: u64,
}

impl ScanStats {
    fn record_drop(&mut self, reason: DropReason) {
        match reason {
            DropReason::Frozen => self.dropped_frozen += 1,
            DropReason::InFlight => self.dropped_in_flight += 1,
            DropReason::Throttled => self.dropped_throttled += 1,
            DropReason::QueueFull => self.dropped_queue_full += 1,
            DropReason::Closed => self.dropped_closed += 1,
        }
    }

    /// Total frames dropped before analysis
    pub fn frames_dropped(&self) -> u64 {
        self.dropped_frozen
            + self.dropped_in_flight
            + self.dropped_throttled
            + self.dropped_queue_full
            + self.dropped_closed
    }
}

/// Mutable state of one scanning session
#[derive(Debug)]
pub struct PipelineSession {
    machine: ScanStateMachine,
    admission: FrameAdmission,
    extractor: DateExtractor,
    last_accepted: Option<String>,
    in_flight: Option<FrameTicket>,
    epoch: u64,
    next_sequence: u64,
    torn_down: bool,
    stats: ScanStats,
    publisher: watch::Sender<ScanState>,
}

impl PipelineSession {
    /// Create a session in `Scanning`
    pub fn new(min_interval: Duration, extractor: DateExtractor) -> Self {
        let (publisher, _) = watch::channel(ScanState::Scanning);
        Self {
            machine: ScanStateMachine::new(),
            admission: FrameAdmission::new(min_interval),
            extractor,
            last_accepted: None,
            in_flight: None,
            epoch: 0,
            next_sequence: 0,
            torn_down: false,
            stats: ScanStats::default(),
            publisher,
        }
    }

    /// Current state
    pub fn state(&self) -> &ScanState {
        self.machine.state()
    }

    /// Counters so far
    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Receiver that observes every published state
    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.publisher.subscribe()
    }

    /// Whether a frame is with the recognizer
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Normalized form of the date that currently blocks re-acceptance
    pub fn last_accepted(&self) -> Option<&str> {
        self.last_accepted.as_deref()
    }

    /// Extractor used for recognized text and typed-in dates
    pub fn extractor(&self) -> &DateExtractor {
        &self.extractor
    }

    /// Whether the session has been torn down
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    fn publish(&self) {
        self.publisher.send_replace(self.machine.state().clone());
    }

    fn clear_in_flight(&mut self) {
        self.in_flight = None;
        self.admission.complete();
    }

    /// Count a frame handed in by the frame source
    pub fn record_received(&mut self) {
        self.stats.frames_received += 1;
    }

    /// Count a frame dropped before it reached admission
    pub fn record_drop(&mut self, reason: DropReason) {
        debug!(?reason, "Dropped frame");
        self.stats.record_drop(reason);
    }

    /// Run admission for a frame captured at `timestamp`
    pub fn try_admit(&mut self, timestamp: Instant) -> Result<FrameTicket, DropReason> {
        if self.torn_down {
            self.record_drop(DropReason::Closed);
            return Err(DropReason::Closed);
        }

        if let Err(reason) = self.admission.try_admit(self.machine.state(), timestamp) {
            self.record_drop(reason);
            return Err(reason);
        }

        if let Err(e) = self.machine.frame_admitted() {
            debug!(error = %e, "Admitted frame without a scanning state");
        }

        let ticket = FrameTicket {
            epoch: self.epoch,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.in_flight = Some(ticket);
        self.stats.frames_admitted += 1;
        self.publish();

        debug!(sequence = ticket.sequence, epoch = ticket.epoch, "Admitted frame");
        Ok(ticket)
    }

    fn is_current(&self, ticket: FrameTicket) -> bool {
        !self.torn_down && self.in_flight == Some(ticket)
    }

    /// Give up on an admitted frame that could not be converted
    pub fn abandon(&mut self, ticket: FrameTicket, error: &FrameError) -> bool {
        if !self.is_current(ticket) {
            self.stats.stale_completions += 1;
            return false;
        }

        warn!(error = %error, "Skipping frame");
        self.clear_in_flight();
        self.stats.frames_unsupported += 1;

        if !self.machine.state().is_locked() && self.machine.recognition_completed(None).is_ok() {
            self.publish();
        }
        true
    }

    /// Apply a recognizer completion using today's calendar year
    pub fn complete(
        &mut self,
        ticket: FrameTicket,
        result: Result<RecognizedText, RecognitionError>,
    ) -> CompletionOutcome {
        self.complete_in_year(ticket, result, chrono::Local::now().year())
    }

    /// Apply a recognizer completion; year-less dates resolve to `current_year`
    pub fn complete_in_year(
        &mut self,
        ticket: FrameTicket,
        result: Result<RecognizedText, RecognitionError>,
        current_year: i32,
    ) -> CompletionOutcome {
        if !self.is_current(ticket) {
            debug!(sequence = ticket.sequence, epoch = ticket.epoch, "Ignoring stale completion");
            self.stats.stale_completions += 1;
            return CompletionOutcome::Stale;
        }

        self.clear_in_flight();

        let date = match result {
            Ok(text) => {
                let date = self.extractor.extract(text.as_str(), current_year);
                if date.is_none() {
                    self.stats.no_match += 1;
                }
                date
            }
            Err(e) => {
                warn!(error = %e, "Text recognition failed");
                self.stats.recognition_failures += 1;
                if self.machine.state() == &ScanState::Analyzing {
                    let _ = self.machine.recognition_completed(None);
                    self.publish();
                }
                return CompletionOutcome::Failed(e);
            }
        };

        if let Some(date) = &date {
            if self.last_accepted.as_deref() == Some(date.normalized.as_str()) {
                debug!(date = %date, "Discarding repeated date");
                self.stats.duplicates += 1;
                return CompletionOutcome::Duplicate;
            }
        }

        if self.machine.state().is_locked() {
            debug!(state = self.machine.state().name(), "Date already fixed, ignoring result");
            return CompletionOutcome::Superseded;
        }

        let outcome = match date {
            Some(date) => {
                info!(date = %date, "Expiry date detected");
                self.last_accepted = Some(date.normalized.clone());
                self.stats.dates_accepted += 1;
                CompletionOutcome::Accepted(date)
            }
            None => CompletionOutcome::NoMatch,
        };

        let accepted = match &outcome {
            CompletionOutcome::Accepted(date) => Some(date.clone()),
            _ => None,
        };
        if let Err(e) = self.machine.recognition_completed(accepted) {
            debug!(error = %e, "Completion without an analyzing state");
        }
        self.publish();

        outcome
    }

    /// Leave `Frozen`/`ManualOverride` and scan again.
    ///
    /// Clears the accepted date and the in-flight flag, and starts a new epoch
    /// so a completion still on its way is ignored.
    pub fn retry(&mut self) -> Result<(), TransitionError> {
        self.machine.retry()?;

        self.last_accepted = None;
        self.clear_in_flight();
        self.epoch += 1;
        self.publish();

        info!(epoch = self.epoch, "Scanning restarted");
        Ok(())
    }

    /// Accept a date typed in by the user, from any state
    pub fn manual_override(&mut self, date: ParsedDate) {
        info!(date = %date, "Expiry date entered manually");
        self.last_accepted = Some(date.normalized.clone());
        self.machine.manual_override(date);
        self.publish();
    }

    /// End the session; later completions become no-ops
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.epoch += 1;
        self.clear_in_flight();
        debug!("Session torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YEAR: i32 = 2025;

    fn session() -> PipelineSession {
        PipelineSession::new(Duration::from_millis(160), DateExtractor::default())
    }

    fn text(value: &str) -> Result<RecognizedText, RecognitionError> {
        Ok(RecognizedText::from(value))
    }

    fn date(day: u32, month: u32, year: i32) -> ParsedDate {
        ParsedDate::new(day, month, year).unwrap()
    }

    #[test]
    fn test_admit_then_freeze() {
        let mut session = session();
        let mut rx = session.subscribe();

        let ticket = session.try_admit(Instant::now()).unwrap();
        assert_eq!(session.state(), &ScanState::Analyzing);
        assert!(session.is_in_flight());
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ScanState::Analyzing);

        let outcome = session.complete_in_year(ticket, text("BEST BEFORE 15 06 2026"), YEAR);
        assert_eq!(outcome, CompletionOutcome::Accepted(date(15, 6, 2026)));
        assert_eq!(session.state(), &ScanState::Frozen(date(15, 6, 2026)));
        assert_eq!(*rx.borrow(), ScanState::Frozen(date(15, 6, 2026)));
        assert!(!session.is_in_flight());
        assert_eq!(session.last_accepted(), Some("15/06/2026"));
    }

    #[test]
    fn test_no_match_and_failure_return_to_scanning() {
        let mut session = session();
        let t0 = Instant::now();

        let ticket = session.try_admit(t0).unwrap();
        assert_eq!(session.complete_in_year(ticket, text("LOT 4411"), YEAR), CompletionOutcome::NoMatch);
        assert_eq!(session.state(), &ScanState::Scanning);
        assert!(!session.is_in_flight());

        let ticket = session.try_admit(t0 + Duration::from_millis(200)).unwrap();
        let outcome = session.complete_in_year(
            ticket,
            Err(RecognitionError::Engine("model missing".to_string())),
            YEAR,
        );
        assert!(matches!(outcome, CompletionOutcome::Failed(_)));
        assert_eq!(session.state(), &ScanState::Scanning);
        assert!(!session.is_in_flight());

        let stats = session.stats();
        assert_eq!(stats.no_match, 1);
        assert_eq!(stats.recognition_failures, 1);
        assert_eq!(stats.frames_admitted, 2);
    }

    #[test]
    fn test_out_of_range_year_keeps_scanning() {
        let mut session = session();
        let ticket = session.try_admit(Instant::now()).unwrap();
        assert_eq!(session.complete_in_year(ticket, text("15 06 19"), YEAR), CompletionOutcome::NoMatch);
        assert_eq!(session.state(), &ScanState::Scanning);
    }

    #[test]
    fn test_repeated_delivery_freezes_once() {
        let mut session = session();
        let ticket = session.try_admit(Instant::now()).unwrap();

        let first = session.complete_in_year(ticket, text("15 06 2026"), YEAR);
        let second = session.complete_in_year(ticket, text("15 06 2026"), YEAR);

        assert!(matches!(first, CompletionOutcome::Accepted(_)));
        assert_eq!(second, CompletionOutcome::Stale);
        assert_eq!(session.stats().dates_accepted, 1);
    }

    #[test]
    fn test_duplicate_of_manual_date_is_discarded() {
        let mut session = session();
        let ticket = session.try_admit(Instant::now()).unwrap();

        // User types the date while the frame is still being recognized
        session.manual_override(date(15, 6, 2026));
        let outcome = session.complete_in_year(ticket, text("15/06/2026"), YEAR);

        assert_eq!(outcome, CompletionOutcome::Duplicate);
        assert_eq!(session.state(), &ScanState::ManualOverride(date(15, 6, 2026)));
        assert!(!session.is_in_flight());
        assert_eq!(session.stats().dates_accepted, 0);
        assert_eq!(session.stats().duplicates, 1);
    }

    #[test]
    fn test_manual_date_wins_over_late_result() {
        let mut session = session();
        let ticket = session.try_admit(Instant::now()).unwrap();

        session.manual_override(date(1, 1, 2027));
        let outcome = session.complete_in_year(ticket, text("15 06 2026"), YEAR);

        assert_eq!(outcome, CompletionOutcome::Superseded);
        assert_eq!(session.state(), &ScanState::ManualOverride(date(1, 1, 2027)));
        assert!(!session.is_in_flight());
    }

    #[test]
    fn test_frozen_session_drops_frames() {
        let mut session = session();
        let t0 = Instant::now();
        let ticket = session.try_admit(t0).unwrap();
        session.complete_in_year(ticket, text("15 06 2026"), YEAR);

        assert_eq!(session.try_admit(t0 + Duration::from_secs(5)), Err(DropReason::Frozen));
        assert_eq!(session.stats().dropped_frozen, 1);
    }

    #[test]
    fn test_single_flight() {
        let mut session = session();
        let t0 = Instant::now();
        session.try_admit(t0).unwrap();

        assert_eq!(session.try_admit(t0 + Duration::from_secs(1)), Err(DropReason::InFlight));
        assert_eq!(session.state(), &ScanState::Analyzing);
    }

    #[test]
    fn test_retry_clears_everything_and_stales_old_ticket() {
        let mut session = session();
        let t0 = Instant::now();

        let ticket = session.try_admit(t0).unwrap();
        session.manual_override(date(15, 6, 2026));
        assert!(session.is_in_flight());

        session.retry().unwrap();
        assert_eq!(session.state(), &ScanState::Scanning);
        assert_eq!(session.last_accepted(), None);
        assert!(!session.is_in_flight());

        // The frame admitted before the retry completes late
        assert_eq!(session.complete_in_year(ticket, text("15 06 2026"), YEAR), CompletionOutcome::Stale);
        assert_eq!(session.state(), &ScanState::Scanning);

        // Same date can be accepted again after a retry
        let ticket = session.try_admit(t0 + Duration::from_millis(500)).unwrap();
        assert_eq!(ticket.epoch(), 1);
        assert!(matches!(
            session.complete_in_year(ticket, text("15 06 2026"), YEAR),
            CompletionOutcome::Accepted(_)
        ));
    }

    #[test]
    fn test_retry_rejected_while_scanning() {
        let mut session = session();
        assert!(session.retry().is_err());
        assert_eq!(session.state(), &ScanState::Scanning);
    }

    #[test]
    fn test_abandon_returns_to_scanning() {
        let mut session = session();
        let ticket = session.try_admit(Instant::now()).unwrap();

        let error = FrameError::Unsupported { planes: 3, pixel_stride: 1 };
        assert!(session.abandon(ticket, &error));
        assert_eq!(session.state(), &ScanState::Scanning);
        assert!(!session.is_in_flight());
        assert!(!session.abandon(ticket, &error));
        assert_eq!(session.stats().frames_unsupported, 1);
    }

    #[test]
    fn test_teardown_ignores_late_completion() {
        let mut session = session();
        let ticket = session.try_admit(Instant::now()).unwrap();

        session.teardown();
        assert!(session.is_torn_down());
        assert!(!session.is_in_flight());
        assert_eq!(session.complete_in_year(ticket, text("15 06 2026"), YEAR), CompletionOutcome::Stale);
        assert_eq!(session.state(), &ScanState::Analyzing);
        assert_eq!(session.try_admit(Instant::now()), Err(DropReason::Closed));
    }
}
