//! Frame annotation for the live stream.
//!
//! Draws the doorway zone, its crossing midline and every tracked person onto
//! a frame. Text labels need a TTF/OTF font; without one only shapes are drawn.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::crossing::Observation;
use crate::frame::Frame;
use crate::zone::Zone;

const ZONE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const MIDLINE_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const INSIDE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const OUTSIDE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const LINE_THICKNESS: u32 = 2;
const LABEL_SCALE: f32 = 18.0;

#[derive(Clone, Default)]
pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    /// Annotator without text labels.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font(font: FontArc) -> Self {
        Self { font: Some(font) }
    }

    /// Load a label font from disk.
    pub fn from_font_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read label font {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|_| anyhow!("{} is not a usable TTF/OTF font", path.display()))?;
        Ok(Self::with_font(font))
    }

    pub fn annotate(
        &self,
        frame: &mut Frame,
        building_id: &str,
        zone: &Zone,
        observations: &[Observation],
    ) {
        let image = frame.image_mut();

        draw_box(image, zone.x1, zone.y1, zone.x2, zone.y2, ZONE_COLOR);
        self.label(
            image,
            zone.x1,
            zone.y1,
            &format!("{} - DOOR AREA", building_id),
            ZONE_COLOR,
        );

        let line_y = zone.midline();
        draw_line_segment_mut(image, (zone.x1, line_y), (zone.x2, line_y), MIDLINE_COLOR);

        for observation in observations {
            let color = if observation.inside {
                INSIDE_COLOR
            } else {
                OUTSIDE_COLOR
            };
            let bbox = &observation.bbox;
            draw_box(image, bbox.x1, bbox.y1, bbox.x2, bbox.y2, color);
            if let Some(stable_id) = observation.stable_id {
                self.label(image, bbox.x1, bbox.y1, &format!("ID: {}", stable_id), color);
            }
        }
    }

    fn label(&self, image: &mut RgbImage, x: f32, y: f32, text: &str, color: Rgb<u8>) {
        let Some(font) = &self.font else {
            return;
        };
        let text_y = (y - LABEL_SCALE - 2.0).max(0.0);
        draw_text_mut(
            image,
            color,
            x.max(0.0) as i32,
            text_y as i32,
            PxScale::from(LABEL_SCALE),
            font,
            text,
        );
    }
}

/// Hollow rectangle clamped to the image, `LINE_THICKNESS` pixels wide.
fn draw_box(image: &mut RgbImage, x1: f32, y1: f32, x2: f32, y2: f32, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    let x = x1.max(0.0) as u32;
    let y = y1.max(0.0) as u32;
    let right = (x2.max(0.0) as u32).min(width);
    let bottom = (y2.max(0.0) as u32).min(height);
    let w = right.saturating_sub(x);
    let h = bottom.saturating_sub(y);

    for t in 0..LINE_THICKNESS {
        let inner_w = w.saturating_sub(2 * t);
        let inner_h = h.saturating_sub(2 * t);
        if inner_w > 0 && inner_h > 0 {
            let rect = Rect::at((x + t) as i32, (y + t) as i32).of_size(inner_w, inner_h);
            draw_hollow_rect_mut(image, rect, color);
        }
    }
}
