//! Text recognition backend interface
//!
//! OCR itself is provided by the host platform. The scanner only needs an
//! async call that turns a cropped, rotation-tagged image into text.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use image::RgbaImage;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// Text returned by a recognizer for one crop
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecognizedText(pub String);

impl RecognizedText {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecognizedText {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

/// Recognition failure reported by a backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecognitionError {
    #[error("recognition engine error: {0}")]
    Engine(String),

    #[error("recognizer has been closed")]
    Closed,

    #[error("recognition timed out after {0:?}")]
    Timeout(Duration),
}

/// Asynchronous text recognizer
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Recognize text in `image`; `rotation_degrees` tells the engine how the
    /// crop must be turned to read upright.
    async fn recognize(
        &self,
        image: RgbaImage,
        rotation_degrees: u32,
    ) -> Result<RecognizedText, RecognitionError>;

    /// Release engine resources. Called once when the scanner shuts down.
    fn close(&self) {}
}

/// Recognizer that replays a fixed script of responses
///
/// Used by the command line simulator and tests. Once the script runs out it
/// keeps answering with the fallback response.
pub struct ScriptedRecognizer {
    script: Mutex<VecDeque<Result<RecognizedText, RecognitionError>>>,
    fallback: Result<RecognizedText, RecognitionError>,
    delay: Duration,
    calls: Mutex<Vec<(u32, u32, u32)>>,
    closed: Mutex<bool>,
}

impl ScriptedRecognizer {
    /// Replay `script`, then return empty text
    pub fn new(script: impl IntoIterator<Item = Result<RecognizedText, RecognitionError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: Ok(RecognizedText::default()),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            closed: Mutex::new(false),
        }
    }

    /// Replay the given lines of text as successful recognitions
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(lines.into_iter().map(|line| Ok(RecognizedText::from(line))))
    }

    /// Response used once the script is exhausted
    pub fn with_fallback(mut self, fallback: Result<RecognizedText, RecognitionError>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Simulated engine latency per call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// (width, height, rotation) of every crop received so far
    pub fn calls(&self) -> Vec<(u32, u32, u32)> {
        self.calls.lock().clone()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

#[async_trait]
impl TextRecognizer for ScriptedRecognizer {
    async fn recognize(
        &self,
        image: RgbaImage,
        rotation_degrees: u32,
    ) -> Result<RecognizedText, RecognitionError> {
        if self.is_closed() {
            return Err(RecognitionError::Closed);
        }

        self.calls
            .lock()
            .push((image.width(), image.height(), rotation_degrees));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let response = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        debug!(?response, "Scripted recognition");
        response
    }

    fn close(&self) {
        *self.closed.lock() = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_replays_in_order() {
        let recognizer = ScriptedRecognizer::new([
            Ok(RecognizedText::from("first")),
            Err(RecognitionError::Engine("offline".to_string())),
        ]);

        let image = RgbaImage::new(8, 2);
        assert_eq!(
            recognizer.recognize(image.clone(), 90).await,
            Ok(RecognizedText::from("first"))
        );
        assert!(matches!(
            recognizer.recognize(image.clone(), 90).await,
            Err(RecognitionError::Engine(_))
        ));
        assert_eq!(recognizer.recognize(image, 90).await, Ok(RecognizedText::default()));
        assert_eq!(recognizer.calls(), vec![(8, 2, 90); 3]);
    }

    #[tokio::test]
    async fn test_closed_recognizer_fails() {
        let recognizer = ScriptedRecognizer::from_lines(["15 06 2026"]);
        recognizer.close();

        assert!(recognizer.is_closed());
        assert_eq!(
            recognizer.recognize(RgbaImage::new(1, 1), 0).await,
            Err(RecognitionError::Closed)
        );
        assert!(recognizer.calls().is_empty());
    }
}
