//! Inbound frame payload → RGB [`Frame`].

use std::io::Cursor;

use base64::{Engine, engine::general_purpose::STANDARD};
use image::{DynamicImage, ImageReader, Limits};
use pulse_core::{DecodeError, Frame, FrameDecoder};

/// Largest frame accepted by [`ImageFrameDecoder::new`]: one 720p image.
pub const DEFAULT_MAX_FRAME_PIXELS: u64 = 1280 * 720;

/// Worst-case decoder bytes per pixel (16-bit RGBA).
const MAX_BYTES_PER_PIXEL: u64 = 8;

/// Headroom for decoder scratch buffers on top of the pixel data.
const ALLOC_SLACK: u64 = 16 * 1024 * 1024;

/// Decodes base64-encoded still images (JPEG, PNG, ...) into RGB frames.
///
/// Browsers send canvas captures as data URLs
/// (`data:image/jpeg;base64,/9j/4AAQ...`); everything up to and including
/// the first `,` is dropped before decoding.
///
/// Images larger than `max_pixels` are rejected from their header, before
/// any pixel data is allocated, so a small compressed payload cannot expand
/// into an oversized frame.
#[derive(Clone, Copy, Debug)]
pub struct ImageFrameDecoder {
    max_pixels: u64,
}

impl ImageFrameDecoder {
    pub fn new() -> Self {
        Self::with_max_pixels(DEFAULT_MAX_FRAME_PIXELS)
    }

    pub fn with_max_pixels(max_pixels: u64) -> Self {
        Self { max_pixels }
    }

    pub fn max_pixels(&self) -> u64 {
        self.max_pixels
    }

    fn limits(&self) -> Limits {
        let side = u32::try_from(self.max_pixels).unwrap_or(u32::MAX);
        let mut limits = Limits::default();
        limits.max_image_width = Some(side);
        limits.max_image_height = Some(side);
        limits.max_alloc = Some(
            self.max_pixels
                .saturating_mul(MAX_BYTES_PER_PIXEL)
                .saturating_add(ALLOC_SLACK),
        );
        limits
    }

    fn read_image(&self, bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
        let (width, height) = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::Image(e.to_string()))?
            .into_dimensions()
            .map_err(|e| DecodeError::Image(e.to_string()))?;
        if u64::from(width) * u64::from(height) > self.max_pixels {
            return Err(DecodeError::Image(format!(
                "frame is {width}x{height}, limit is {} pixels",
                self.max_pixels
            )));
        }

        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::Image(e.to_string()))?;
        reader.limits(self.limits());
        reader
            .decode()
            .map_err(|e| DecodeError::Image(e.to_string()))
    }
}

impl Default for ImageFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip an optional scheme prefix ending at the first `,`.
pub fn strip_prefix(payload: &str) -> &str {
    payload
        .split_once(',')
        .map_or(payload, |(_, body)| body)
        .trim()
}

impl FrameDecoder for ImageFrameDecoder {
    fn decode(&self, payload: &str) -> Result<Frame, DecodeError> {
        let body = strip_prefix(payload);
        if body.is_empty() {
            return Err(DecodeError::Empty);
        }

        let bytes = STANDARD
            .decode(body)
            .map_err(|e| DecodeError::Base64(e.to_string()))?;
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let rgb = self.read_image(&bytes)?.to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(Frame::new(rgb.into_raw(), width, height))
    }
}
