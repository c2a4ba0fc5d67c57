//! Analysis Layer
//!
//! Turns recognized text into an accepted expiry date and tracks the scan
//! state that the presentation layer renders.

pub mod date;
pub mod state;

pub use date::{DateExtractor, DateInputError, ParsedDate, DEFAULT_MAX_YEAR, DEFAULT_MIN_YEAR};
pub use state::{ScanEvent, ScanState, ScanStateMachine, TransitionError};
