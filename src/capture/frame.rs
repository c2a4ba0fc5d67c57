//! Frame data structures for camera frames delivered by the frame source

use std::fmt;
use std::time::Instant;

use tracing::warn;

/// Sensor rotation needed to bring a raw frame upright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Map a raw rotation value onto one of the four supported orientations.
    ///
    /// Values other than 0/90/180/270 fall back to `Deg0`. This keeps the frame
    /// usable but can crop the wrong area for an unexpected sensor orientation.
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees {
            0 => Self::Deg0,
            90 => Self::Deg90,
            180 => Self::Deg180,
            270 => Self::Deg270,
            other => {
                warn!(degrees = other, "Unsupported frame rotation, using identity mapping");
                Self::Deg0
            }
        }
    }

    /// Rotation in degrees
    pub fn degrees(self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Whether width and height swap when the frame is turned upright
    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

/// One plane of pixel data
#[derive(Debug, Clone)]
pub struct FramePlane {
    /// Plane bytes, `row_stride` bytes per row (the last row may be unpadded)
    pub data: Vec<u8>,
    /// Bytes between the starts of consecutive rows
    pub row_stride: usize,
    /// Bytes between horizontally adjacent pixels
    pub pixel_stride: usize,
}

impl FramePlane {
    /// A packed RGBA plane with no row padding
    pub fn packed_rgba(data: Vec<u8>, width: u32) -> Self {
        Self {
            data,
            row_stride: width as usize * 4,
            pixel_stride: 4,
        }
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// A frame delivered by the camera
///
/// The frame is released exactly once: when it is dropped, whatever path the
/// pipeline took with it. Frame sources that need to recycle the underlying
/// camera buffer attach a hook with [`RawFrame::on_release`].
pub struct RawFrame {
    /// Pixel planes
    pub planes: Vec<FramePlane>,
    /// Frame width in pixels (sensor orientation)
    pub width: u32,
    /// Frame height in pixels (sensor orientation)
    pub height: u32,
    /// Rotation in degrees reported by the sensor
    pub rotation_degrees: i32,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
    release: Option<ReleaseHook>,
}

impl RawFrame {
    /// Create a frame from a single packed RGBA plane
    pub fn new(plane: FramePlane, width: u32, height: u32, rotation_degrees: i32) -> Self {
        Self::with_planes(vec![plane], width, height, rotation_degrees, Instant::now())
    }

    /// Create a frame with explicit planes and capture timestamp
    pub fn with_planes(
        planes: Vec<FramePlane>,
        width: u32,
        height: u32,
        rotation_degrees: i32,
        timestamp: Instant,
    ) -> Self {
        Self {
            planes,
            width,
            height,
            rotation_degrees,
            timestamp,
            release: None,
        }
    }

    /// Attach a hook that runs when the frame is released
    pub fn on_release(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Rotation mapped onto a supported orientation
    pub fn rotation(&self) -> Rotation {
        Rotation::from_degrees(self.rotation_degrees)
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("planes", &self.planes.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("rotation_degrees", &self.rotation_degrees)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(0), Rotation::Deg0);
        assert_eq!(Rotation::from_degrees(90), Rotation::Deg90);
        assert_eq!(Rotation::from_degrees(180), Rotation::Deg180);
        assert_eq!(Rotation::from_degrees(270), Rotation::Deg270);
        assert_eq!(Rotation::from_degrees(45), Rotation::Deg0);
        assert_eq!(Rotation::from_degrees(-90), Rotation::Deg0);
    }

    #[test]
    fn test_rotation_swaps_axes() {
        assert!(!Rotation::Deg0.swaps_axes());
        assert!(Rotation::Deg90.swaps_axes());
        assert!(!Rotation::Deg180.swaps_axes());
        assert!(Rotation::Deg270.swaps_axes());
    }

    #[test]
    fn test_release_hook_runs_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();

        let frame = RawFrame::new(FramePlane::packed_rgba(vec![0; 16], 2), 2, 2, 0)
            .on_release(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        assert_eq!(frame.dimensions(), (2, 2));
        assert_eq!(released.load(Ordering::SeqCst), 0);

        drop(frame);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
