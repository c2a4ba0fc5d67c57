//! Session state and messaging shared by the frame worker and the control path
//!
//! The worker thread runs admission and cropping, the control thread applies
//! recognizer completions. Both go through the same locked [`PipelineSession`].

pub mod messages;
pub mod session;

pub use messages::ControlEvent;
pub use session::{CompletionOutcome, FrameTicket, PipelineSession, ScanStats};
