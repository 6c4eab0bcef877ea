//! Bounding Box Value Object
//!
//! Represents a rectangular person detection region in a video frame.

use serde::{Deserialize, Serialize};

/// A bounding box defining a rectangular region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    x: i32,
    y: i32,
    width: i32,
    height: i32,
}

impl BoundingBox {
    /// Creates a new bounding box.
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Creates a bounding box from corner coordinates.
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x2 - x1).abs(),
            height: (y2 - y1).abs(),
        }
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Returns the center point of the bounding box.
    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    /// Returns the area of the bounding box.
    pub fn area(&self) -> i32 {
        self.width * self.height
    }

    /// Returns the shorter of width and height, used by the scanner's
    /// minimum-size filter.
    pub fn shorter_side(&self) -> i32 {
        self.width.min(self.height)
    }

    /// Returns the right edge x coordinate.
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Returns the bottom edge y coordinate.
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// Euclidean distance from the box center to an arbitrary point.
    pub fn center_distance_to(&self, point: (f32, f32)) -> f32 {
        let (cx, cy) = self.center();
        ((cx - point.0).powi(2) + (cy - point.1).powi(2)).sqrt()
    }

    /// Calculates the intersection over union (IoU) with another bounding box.
    /// Used by the intra-clip tracker to match detections across frames.
    ///
    /// Reference: https://en.wikipedia.org/wiki/Jaccard_index
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;

        if union == 0 {
            return 0.0;
        }

        intersection as f32 / union as f32
    }

    /// Converts to a JSON-compatible array format [x, y, width, height].
    pub fn to_array(&self) -> [i32; 4] {
        [self.x, self.y, self.width, self.height]
    }

    /// Creates from a JSON array [x, y, width, height].
    pub fn from_array(arr: [i32; 4]) -> Self {
        Self::new(arr[0], arr[1], arr[2], arr[3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_is_calculated_correctly() {
        let bbox = BoundingBox::new(10, 20, 100, 100);
        assert_eq!(bbox.center(), (60.0, 70.0));
    }

    #[test]
    fn area_is_calculated_correctly() {
        let bbox = BoundingBox::new(0, 0, 10, 20);
        assert_eq!(bbox.area(), 200);
    }

    #[test]
    fn shorter_side_picks_minimum() {
        let bbox = BoundingBox::new(0, 0, 40, 120);
        assert_eq!(bbox.shorter_side(), 40);
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b1 = BoundingBox::new(0, 0, 100, 100);
        let b2 = BoundingBox::new(0, 0, 100, 100);
        assert!((b1.iou(&b2) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn iou_of_non_overlapping_is_zero() {
        let b1 = BoundingBox::new(0, 0, 100, 100);
        let b2 = BoundingBox::new(200, 200, 100, 100);
        assert!((b1.iou(&b2) - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn iou_of_half_overlap_is_one_third() {
        let b1 = BoundingBox::new(0, 0, 100, 100);
        let b2 = BoundingBox::new(50, 0, 100, 100);
        // intersection 5000, union 15000
        assert!((b1.iou(&b2) - 1.0 / 3.0).abs() < 1e-4);
    }

    #[test]
    fn center_distance_is_euclidean() {
        let bbox = BoundingBox::new(0, 0, 100, 100);
        let dist = bbox.center_distance_to((50.0, 80.0));
        assert!((dist - 30.0).abs() < 1e-4);
    }

    #[test]
    fn array_roundtrip_preserves_values() {
        let original = BoundingBox::new(10, 20, 30, 40);
        let restored = BoundingBox::from_array(original.to_array());
        assert_eq!(original, restored);
    }
}
