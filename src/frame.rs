//! Frames and the per-building latest-frame slot.
//!
//! - `Frame`: one decoded RGB frame plus its position in the source.
//! - `FrameSlot`: the most recently annotated frame of a building. Written by the
//!   owning worker only; readers always receive an independent copy.
//! - `encode_jpeg`: still-image encoding for the live stream.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::sync::Mutex;

/// Placeholder size streamed while a building has no frame.
pub const PLACEHOLDER_WIDTH: u32 = 640;
pub const PLACEHOLDER_HEIGHT: u32 = 480;

#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Frame number within the current pass over the source (starts at 1).
    index: u64,
}

impl Frame {
    pub fn new(image: RgbImage, index: u64) -> Self {
        Self { image, index }
    }

    /// All-black frame.
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(RgbImage::new(width, height), 0)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Mirror the frame left-to-right (for cameras mounted facing the other way).
    pub fn flip_horizontal(&mut self) {
        imageops::flip_horizontal_in_place(&mut self.image);
    }
}

/// Latest published frame of one building.
///
/// The lock is held only for the swap or the copy, never across encoding or I/O.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Frame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame.
    pub fn publish(&self, frame: Frame) -> Result<()> {
        let mut guard = self
            .latest
            .lock()
            .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        *guard = Some(frame);
        Ok(())
    }

    /// Mark the building as having no frame (stopped).
    pub fn clear(&self) -> Result<()> {
        let mut guard = self
            .latest
            .lock()
            .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        *guard = None;
        Ok(())
    }

    /// Independent copy of the current frame, if any.
    pub fn snapshot(&self) -> Result<Option<Frame>> {
        let guard = self
            .latest
            .lock()
            .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        Ok(guard.clone())
    }

    pub fn has_frame(&self) -> bool {
        self.latest.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

/// Encode a frame as JPEG, downscaling proportionally when wider than `max_width`.
pub fn encode_jpeg(frame: &Frame, quality: u8, max_width: u32) -> Result<Vec<u8>> {
    let scaled;
    let image = if max_width > 0 && frame.width() > max_width {
        let scale = max_width as f32 / frame.width() as f32;
        let height = ((frame.height() as f32 * scale).round() as u32).max(1);
        scaled = imageops::resize(frame.image(), max_width, height, FilterType::Triangle);
        &scaled
    } else {
        frame.image()
    };

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .context("encode jpeg")?;
    Ok(out)
}
