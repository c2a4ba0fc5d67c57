//! Frame Intake Layer
//!
//! Frames are pushed in by the camera integration. This layer only decides
//! which of them get analyzed; camera session handling lives outside the crate.

pub mod admission;
pub mod frame;

use std::time::Duration;

pub use admission::{DropReason, FrameAdmission, DEFAULT_MIN_INTERVAL};
pub use frame::{FramePlane, RawFrame, Rotation};

/// Frame intake configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Minimum spacing between admitted frames
    pub min_interval: Duration,
    /// Frames buffered between the frame source and the worker
    pub queue_depth: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            queue_depth: 2,
        }
    }
}
