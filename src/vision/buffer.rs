//! Pixel buffer recycling
//!
//! Converts strided camera planes into a dense RGBA image while reusing the
//! same backing storage from frame to frame.

use image::RgbaImage;
use thiserror::Error;
use tracing::debug;

use crate::capture::RawFrame;

const BYTES_PER_PIXEL: usize = 4;

/// Why a frame could not be converted
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Not a single packed 4-byte plane; the caller needs another conversion path
    #[error("unsupported frame layout: {planes} plane(s), pixel stride {pixel_stride}")]
    Unsupported { planes: usize, pixel_stride: usize },

    #[error("frame has zero size ({width}x{height})")]
    Empty { width: u32, height: u32 },

    #[error("row stride {row_stride} is smaller than {row_bytes} bytes per row")]
    StrideTooSmall { row_stride: usize, row_bytes: usize },

    #[error("frame data size mismatch: expected at least {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Reusable dense pixel storage for one analyzer thread
///
/// Takes `&mut self` for every conversion, so two conversions can never run
/// at once, and lends out the image only for the duration of the borrow.
#[derive(Debug, Default)]
pub struct PixelBufferRecycler {
    buffer: Vec<u8>,
    image: Option<RgbaImage>,
    buffer_allocations: usize,
    image_allocations: usize,
}

impl PixelBufferRecycler {
    /// Create an empty recycler; storage is allocated by the first frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Current backing buffer size in bytes
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// How many times the backing buffer was (re)allocated
    pub fn buffer_allocations(&self) -> usize {
        self.buffer_allocations
    }

    /// How many times a new image object was created
    pub fn image_allocations(&self) -> usize {
        self.image_allocations
    }

    /// Convert a frame into a dense `width x height` RGBA image.
    pub fn convert(&mut self, frame: &RawFrame) -> Result<&RgbaImage, FrameError> {
        let plane = match frame.planes.as_slice() {
            [plane] if plane.pixel_stride == BYTES_PER_PIXEL => plane,
            planes => {
                return Err(FrameError::Unsupported {
                    planes: planes.len(),
                    pixel_stride: planes.first().map(|p| p.pixel_stride).unwrap_or(0),
                })
            }
        };

        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(FrameError::Empty { width, height });
        }

        let row_bytes = width as usize * BYTES_PER_PIXEL;
        let rows = height as usize;
        if plane.row_stride < row_bytes {
            return Err(FrameError::StrideTooSmall {
                row_stride: plane.row_stride,
                row_bytes,
            });
        }

        // The last row is allowed to stop right after its pixels
        let expected = plane.row_stride * (rows - 1) + row_bytes;
        if plane.data.len() < expected {
            return Err(FrameError::SizeMismatch {
                expected,
                actual: plane.data.len(),
            });
        }

        let needed = row_bytes * rows;
        if self.buffer.len() < needed {
            debug!(from = self.buffer.len(), to = needed, "Growing pixel buffer");
            self.buffer = vec![0; needed];
            self.buffer_allocations += 1;
        }

        let dense = &mut self.buffer[..needed];
        if plane.row_stride == row_bytes {
            dense.copy_from_slice(&plane.data[..needed]);
        } else {
            for (row, dst) in dense.chunks_exact_mut(row_bytes).enumerate() {
                let start = row * plane.row_stride;
                dst.copy_from_slice(&plane.data[start..start + row_bytes]);
            }
        }
        let dense = &self.buffer[..needed];

        let image = match self.image.take() {
            Some(mut image) if image.dimensions() == (width, height) => {
                image.copy_from_slice(dense);
                image
            }
            _ => {
                debug!(width, height, "Allocating image for new frame dimensions");
                self.image_allocations += 1;
                RgbaImage::from_raw(width, height, dense.to_vec()).ok_or(FrameError::SizeMismatch {
                    expected: needed,
                    actual: dense.len(),
                })?
            }
        };

        Ok(self.image.insert(image))
    }
}
