//! Message types for communication between the frame pipeline and the control path

use crate::shared::session::FrameTicket;
use crate::vision::{RecognitionError, RecognizedText};

/// Messages delivered to the control thread
#[derive(Debug)]
pub enum ControlEvent {
    /// A recognizer call finished for the frame holding `ticket`
    Completed {
        ticket: FrameTicket,
        result: Result<RecognizedText, RecognitionError>,
    },
    /// Stop the control loop
    Shutdown,
}
