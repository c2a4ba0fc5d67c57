//! Expiry Scan - live expiry date scanner
//!
//! Camera frames are throttled, cropped to a horizontal scan window, handed
//! to an external text recognizer, and the first plausible date found in the
//! recognized text freezes the scan until the user retries.

pub mod analysis;
pub mod app;
pub mod capture;
pub mod config;
pub mod shared;
pub mod vision;

pub use analysis::{ParsedDate, ScanState};
pub use app::ExpiryScanner;
pub use capture::{FramePlane, RawFrame, Rotation};
pub use config::AppConfig;
pub use vision::{RecognitionError, RecognizedText, TextRecognizer};
