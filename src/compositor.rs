use chrono::{DateTime, Local};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;

use crate::camera::VideoFrame;
use crate::errors::CaptureError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StillFormat {
    Png,
}

/// A captured, composited photo. Always square; the encoded bytes are
/// shared and never change after capture.
#[derive(Debug, Clone)]
pub struct StillImage {
    bytes: Arc<[u8]>,
    side: u32,
    format: StillFormat,
    captured_at: DateTime<Local>,
}

impl StillImage {
    pub fn from_encoded(bytes: impl Into<Arc<[u8]>>, side: u32, format: StillFormat) -> Self {
        Self {
            bytes: bytes.into(),
            side,
            format,
            captured_at: Local::now(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn width(&self) -> u32 {
        self.side
    }

    pub fn height(&self) -> u32 {
        self.side
    }

    pub fn format(&self) -> StillFormat {
        self.format
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }
}

/// Turns live frames into square stills, padding rather than cropping
pub struct PhotoCompositor {
    background: Rgb<u8>,
}

impl Default for PhotoCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl PhotoCompositor {
    pub fn new() -> Self {
        Self {
            background: Rgb([0, 0, 0]),
        }
    }

    pub fn capture(&self, frame: &VideoFrame) -> Result<StillImage, CaptureError> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Err(CaptureError::EmptyFrame { width, height });
        }

        let side = width.max(height);
        let (dx, dy) = centered_offset(width, height, side);

        let mut canvas = RgbImage::from_pixel(side, side, self.background);
        image::imageops::replace(&mut canvas, &frame.pixels, i64::from(dx), i64::from(dy));

        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(canvas).write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;

        log::debug!(
            "Composited {}x{} frame into {}x{} still at offset ({}, {}), {} bytes",
            width, height, side, side, dx, dy, bytes.len()
        );
        Ok(StillImage::from_encoded(bytes, side, StillFormat::Png))
    }
}

/// Top-left offset that centres a `width`x`height` frame on a square of
/// `side`. The odd pixel, if any, lands on the right or bottom.
pub fn centered_offset(width: u32, height: u32, side: u32) -> (u32, u32) {
    ((side - width) / 2, (side - height) / 2)
}
