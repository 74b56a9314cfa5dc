//! Pixel-space geometry helpers.
//!
//! All functions here are pure and allocation-free. Coordinates are integer
//! pixels with `(x1, y1)` the top-left and `(x2, y2)` the bottom-right corner;
//! every containment and overlap test treats the edges as inclusive.

use serde::{Deserialize, Serialize};

use crate::region::Region;

/// Axis-aligned bounding box in frame pixel space.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// A box is well-formed when its corners are not inverted.
    pub fn is_well_formed(&self) -> bool {
        self.x1 <= self.x2 && self.y1 <= self.y2
    }

    pub fn width(&self) -> i32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> i32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn as_array(&self) -> [i32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Midpoint of a box, floored toward negative infinity.
pub fn center(bbox: &BoundingBox) -> Point {
    let x = (i64::from(bbox.x1) + i64::from(bbox.x2)).div_euclid(2);
    let y = (i64::from(bbox.y1) + i64::from(bbox.y2)).div_euclid(2);
    // The midpoint of two i32 values always fits in an i32.
    Point {
        x: x as i32,
        y: y as i32,
    }
}

pub fn point_in_region(point: Point, region: &Region) -> bool {
    region.x1 <= point.x && point.x <= region.x2 && region.y1 <= point.y && point.y <= region.y2
}

/// True when `a`, grown by `margin` pixels on all four sides, intersects `b`.
///
/// Growing only `a` is equivalent to requiring the gap between the two boxes
/// to be at most `margin` on both axes, so the test is symmetric in `a` and
/// `b`. With `margin == 0` it is plain inclusive rectangle intersection.
pub fn boxes_overlap(a: &BoundingBox, b: &BoundingBox, margin: u32) -> bool {
    let m = i64::from(margin);
    let (ax1, ay1) = (i64::from(a.x1) - m, i64::from(a.y1) - m);
    let (ax2, ay2) = (i64::from(a.x2) + m, i64::from(a.y2) + m);
    let (bx1, by1, bx2, by2) = (
        i64::from(b.x1),
        i64::from(b.y1),
        i64::from(b.x2),
        i64::from(b.y2),
    );

    !(ax2 < bx1 || bx2 < ax1 || ay2 < by1 || by2 < ay1)
}
