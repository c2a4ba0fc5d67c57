//! Scan state machine
//!
//! The single source of truth for what the scanner is doing. Every transition
//! goes through one of the event methods below; anything else is rejected.

use serde::Serialize;
use thiserror::Error;

use super::date::ParsedDate;

/// Scanner state observed by the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "state", content = "date", rename_all = "snake_case")]
pub enum ScanState {
    /// Waiting for the next admissible frame
    #[default]
    Scanning,
    /// One frame is with the recognizer
    Analyzing,
    /// A recognized date was accepted
    Frozen(ParsedDate),
    /// The user typed the date in
    ManualOverride(ParsedDate),
}

impl ScanState {
    /// Whether frames are no longer admitted in this state
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Frozen(_) | Self::ManualOverride(_))
    }

    /// The accepted date, if any
    pub fn date(&self) -> Option<&ParsedDate> {
        match self {
            Self::Frozen(date) | Self::ManualOverride(date) => Some(date),
            Self::Scanning | Self::Analyzing => None,
        }
    }

    /// Short state name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scanning => "scanning",
            Self::Analyzing => "analyzing",
            Self::Frozen(_) => "frozen",
            Self::ManualOverride(_) => "manual_override",
        }
    }
}

/// Event that drives a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEvent {
    FrameAdmitted,
    RecognitionCompleted,
    Retry,
    ManualOverride,
}

/// An event arrived in a state that does not accept it
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{event:?} is not valid while {state}")]
pub struct TransitionError {
    pub event: ScanEvent,
    pub state: &'static str,
}

/// Strict finite state machine over [`ScanState`]
#[derive(Debug, Clone, Default)]
pub struct ScanStateMachine {
    state: ScanState,
}

impl ScanStateMachine {
    /// Create a machine in `Scanning`
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> &ScanState {
        &self.state
    }

    fn reject(&self, event: ScanEvent) -> TransitionError {
        TransitionError {
            event,
            state: self.state.name(),
        }
    }

    /// `Scanning -> Analyzing`
    pub fn frame_admitted(&mut self) -> Result<&ScanState, TransitionError> {
        match self.state {
            ScanState::Scanning => {
                self.state = ScanState::Analyzing;
                Ok(&self.state)
            }
            _ => Err(self.reject(ScanEvent::FrameAdmitted)),
        }
    }

    /// `Analyzing -> Frozen(date)` when a new date was found, otherwise
    /// `Analyzing -> Scanning`
    pub fn recognition_completed(
        &mut self,
        accepted: Option<ParsedDate>,
    ) -> Result<&ScanState, TransitionError> {
        if self.state != ScanState::Analyzing {
            return Err(self.reject(ScanEvent::RecognitionCompleted));
        }

        self.state = match accepted {
            Some(date) => ScanState::Frozen(date),
            None => ScanState::Scanning,
        };
        Ok(&self.state)
    }

    /// `Frozen | ManualOverride -> Scanning`
    pub fn retry(&mut self) -> Result<&ScanState, TransitionError> {
        if !self.state.is_locked() {
            return Err(self.reject(ScanEvent::Retry));
        }

        self.state = ScanState::Scanning;
        Ok(&self.state)
    }

    /// Any state `-> ManualOverride(date)`
    pub fn manual_override(&mut self, date: ParsedDate) -> &ScanState {
        self.state = ScanState::ManualOverride(date);
        &self.state
    }
}
