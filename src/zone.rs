//! Doorway zone geometry.
//!
//! A zone is an axis-aligned rectangle in frame pixel coordinates. It is used
//! as a containment test; the crossing boundary is its horizontal midline.

use serde::{Deserialize, Serialize};

/// Default zone bounds as fractions of the frame size (x1, y1, x2, y2).
const DEFAULT_ZONE_FRACTIONS: (f32, f32, f32, f32) = (0.3, 0.2, 0.7, 0.8);

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Zone {
    /// Build a zone, swapping bounds so that `x1 <= x2` and `y1 <= y2`.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Centered default zone for a frame of the given size, truncated to whole pixels.
    pub fn default_for_frame(width: u32, height: u32) -> Self {
        let (fx1, fy1, fx2, fy2) = DEFAULT_ZONE_FRACTIONS;
        let w = width as f32;
        let h = height as f32;
        Self::new(
            (w * fx1).trunc(),
            (h * fy1).trunc(),
            (w * fx2).trunc(),
            (h * fy2).trunc(),
        )
    }

    /// Strict containment: a point on any edge is outside.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        self.x1 < x && x < self.x2 && self.y1 < y && y < self.y2
    }

    /// Vertical midpoint of the zone; the crossing line.
    pub fn midline(&self) -> f32 {
        (self.y1 + self.y2) / 2.0
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Parse a zone from a loosely-typed JSON object.
    ///
    /// All four of `x1`, `y1`, `x2`, `y2` must be present and numeric; anything
    /// else yields `None` so callers fall back to the default zone.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;
        let get = |key: &str| obj.get(key).and_then(|v| v.as_f64()).map(|v| v as f32);
        let zone = Self::new(get("x1")?, get("y1")?, get("x2")?, get("y2")?);
        if zone.width() <= 0.0 || zone.height() <= 0.0 {
            return None;
        }
        Some(zone)
    }
}
