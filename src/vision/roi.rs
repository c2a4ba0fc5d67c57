//! Region of interest geometry
//!
//! The scan window is defined in upright (display) coordinates and mapped back
//! into the sensor's raw coordinate space, so the crop handed to the recognizer
//! covers what the user lined up on screen.

use image::{imageops, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::capture::Rotation;

/// Scan window shape relative to the upright frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionSpec {
    /// Window width as a fraction of the upright width (0..1]
    pub width_fraction: f64,
    /// Window width divided by window height
    pub aspect: f64,
    /// Vertical center as a fraction of the upright height (0..1)
    pub center_y_fraction: f64,
}

impl Default for RegionSpec {
    fn default() -> Self {
        Self {
            width_fraction: 0.94,
            aspect: 2.8,
            center_y_fraction: 0.40,
        }
    }
}

/// Crop rectangle in raw frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Exclusive right edge
    pub fn right(&self) -> u32 {
        self.left + self.width
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> u32 {
        self.top + self.height
    }

    /// Copy this rectangle out of a dense image
    pub fn crop(&self, image: &RgbaImage) -> RgbaImage {
        imageops::crop_imm(image, self.left, self.top, self.width, self.height).to_image()
    }
}

/// Scan window in upright coordinates: (left, top, width, height)
fn upright_rect(upright_w: i64, upright_h: i64, spec: &RegionSpec) -> (i64, i64, i64, i64) {
    let roi_w = ((upright_w as f64 * spec.width_fraction).floor() as i64).clamp(1, upright_w);
    let roi_h = ((roi_w as f64 / spec.aspect).floor() as i64).clamp(1, upright_h);

    let cx = upright_w as f64 / 2.0;
    let cy = (upright_h as f64 * spec.center_y_fraction).clamp(0.0, upright_h as f64);

    let left = ((cx - roi_w as f64 / 2.0).floor() as i64).clamp(0, upright_w - roi_w);
    let top = ((cy - roi_h as f64 / 2.0).floor() as i64).clamp(0, upright_h - roi_h);

    (left, top, roi_w, roi_h)
}

/// Compute the crop rectangle for a raw frame.
///
/// Pure integer geometry: the result always lies inside
/// `[0, raw_width) x [0, raw_height)` and is at least 1x1.
pub fn compute_crop(raw_width: u32, raw_height: u32, rotation: Rotation, spec: &RegionSpec) -> CropRect {
    let raw_w = i64::from(raw_width.max(1));
    let raw_h = i64::from(raw_height.max(1));

    let (upright_w, upright_h) = if rotation.swaps_axes() {
        (raw_h, raw_w)
    } else {
        (raw_w, raw_h)
    };

    let (left, top, roi_w, roi_h) = upright_rect(upright_w, upright_h, spec);

    let (x, y, w, h) = match rotation {
        Rotation::Deg0 => (left, top, roi_w, roi_h),
        Rotation::Deg180 => (raw_w - (left + roi_w), raw_h - (top + roi_h), roi_w, roi_h),
        Rotation::Deg90 => (top, raw_h - (left + roi_w), roi_h, roi_w),
        Rotation::Deg270 => (raw_w - (top + roi_h), left, roi_h, roi_w),
    };

    let x = x.clamp(0, raw_w - 1);
    let y = y.clamp(0, raw_h - 1);
    let w = w.clamp(1, raw_w - x);
    let h = h.clamp(1, raw_h - y);

    CropRect {
        left: x as u32,
        top: y as u32,
        width: w as u32,
        height: h as u32,
    }
}
