use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

const DEFAULT_LUMA_THRESHOLD: u8 = 200;
const DEFAULT_MIN_PIXELS: usize = 64;

/// CPU person detector for synthetic and high-contrast feeds.
///
/// Treats the bounding box of all pixels brighter than a luma threshold as a
/// single person. It is not a general detector; real feeds use a model backend.
pub struct CpuBackend {
    luma_threshold: u8,
    min_pixels: usize,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self {
            luma_threshold: DEFAULT_LUMA_THRESHOLD,
            min_pixels: DEFAULT_MIN_PIXELS,
        }
    }
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut count = 0usize;
        let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
        let (mut max_x, mut max_y) = (0u32, 0u32);

        for (x, y, pixel) in frame.image().enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let luma = (u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000;
            if luma >= u32::from(self.luma_threshold) {
                count += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }

        if count < self.min_pixels {
            return Ok(Vec::new());
        }

        let bbox = BoundingBox::new(
            min_x as f32,
            min_y as f32,
            (max_x + 1) as f32,
            (max_y + 1) as f32,
        );
        let fill = count as f32 / bbox.area().max(1.0);
        Ok(vec![Detection::person(bbox, 0.5 + 0.5 * fill.min(1.0))])
    }
}
