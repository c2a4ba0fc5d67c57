//! Vision Layer
//!
//! Prepares admitted frames for text recognition:
//! - dense RGBA conversion with recycled storage
//! - rotation-aware crop of the scan window
//! - the async recognizer interface the crop is handed to

pub mod buffer;
pub mod recognizer;
pub mod roi;

pub use buffer::{FrameError, PixelBufferRecycler};
pub use recognizer::{RecognitionError, RecognizedText, ScriptedRecognizer, TextRecognizer};
pub use roi::{compute_crop, CropRect, RegionSpec};
