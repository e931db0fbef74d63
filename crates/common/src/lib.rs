/// Common types shared by the saliency crates
use serde::{Deserialize, Serialize};

/// Axis-aligned box in normalized image coordinates (0-1), corner format
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BoundingBox {
    #[must_use]
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        (self.xmax - self.xmin).max(0.0)
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        (self.ymax - self.ymin).max(0.0)
    }

    /// Scale to pixel coordinates `(x0, y0, x1, y1)`, clamped to the image
    #[must_use]
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        let scale = |v: f32, size: u32, max: f32| (v * size as f32).clamp(0.0, max) as u32;
        (
            scale(self.xmin, width, max_x),
            scale(self.ymin, height, max_y),
            scale(self.xmax, width, max_x),
            scale(self.ymax, height, max_y),
        )
    }
}
