//! Region box geometry.
//!
//! Region proposals arrive as axis-aligned rectangles in image
//! coordinates. Spatial overlap (IoU) between a region and its
//! pseudo-ground-truth seed is what weights the refinement loss, so
//! the IoU here must be exact for degenerate and disjoint boxes too.

use serde::{Deserialize, Serialize};

/// Axis-aligned region proposal box in corner form (x1, y1, x2, y2).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoiBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl RoiBox {
    /// Create a box, normalizing inverted corners.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Intersection-over-union with another box.
    ///
    /// Returns 0.0 for disjoint boxes and for a zero-area union.
    pub fn iou(&self, other: &RoiBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let iw = (ix2 - ix1).max(0.0);
        let ih = (iy2 - iy1).max(0.0);
        let intersection = iw * ih;

        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identity() {
        let b = RoiBox::new(10.0, 10.0, 50.0, 50.0);
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = RoiBox::new(0.0, 0.0, 10.0, 10.0);
        let b = RoiBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = RoiBox::new(0.0, 0.0, 2.0, 2.0);
        let b = RoiBox::new(1.0, 0.0, 3.0, 2.0);
        // Intersection: 1x2 = 2, union: 4 + 4 - 2 = 6
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_inverted_corners_normalized() {
        let b = RoiBox::new(5.0, 8.0, 1.0, 2.0);
        assert_eq!(b.x1, 1.0);
        assert_eq!(b.y2, 8.0);
        assert!(b.area() > 0.0);
    }

    #[test]
    fn test_zero_area_union() {
        let a = RoiBox::new(1.0, 1.0, 1.0, 1.0);
        assert_eq!(a.iou(&a), 0.0);
    }
}
