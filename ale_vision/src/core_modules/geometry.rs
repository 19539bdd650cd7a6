// THEORY:
// The `geometry` module holds the two tiny value types every other layer speaks
// in: a screen `Point` and an inclusive `BoundingBox`. Everything is integer
// screen space; the tracking layers never work in sub-pixel coordinates, so
// centroids are the integer centre of a bounding box and velocities are integer
// centroid deltas.

use std::fmt;

/// A 2D coordinate on the screen. Ordered by `x`, then `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance between two points.
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Integer per-frame displacement of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Velocity {
    pub dx: i32,
    pub dy: i32,
}

impl Velocity {
    pub fn new(dx: i32, dy: i32) -> Self {
        Self { dx, dy }
    }

    /// Displacement that moves `from` onto `to`.
    pub fn between(from: Point, to: Point) -> Self {
        Self {
            dx: to.x - from.x,
            dy: to.y - from.y,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.dx == 0 && self.dy == 0
    }

    pub fn magnitude(&self) -> f64 {
        ((self.dx * self.dx + self.dy * self.dy) as f64).sqrt()
    }

    /// True when both components differ by at most `epsilon`.
    pub fn within(&self, other: &Velocity, epsilon: i32) -> bool {
        (self.dx - other.dx).abs() <= epsilon && (self.dy - other.dy).abs() <= epsilon
    }

    /// Length of the difference vector.
    pub fn difference(&self, other: &Velocity) -> f64 {
        Velocity::new(self.dx - other.dx, self.dy - other.dy).magnitude()
    }
}

/// Inclusive axis-aligned rectangle: both `min` and `max` pixels are inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl BoundingBox {
    /// A box covering exactly one pixel.
    pub fn at(point: Point) -> Self {
        Self {
            x_min: point.x,
            y_min: point.y,
            x_max: point.x,
            y_max: point.y,
        }
    }

    pub fn width(&self) -> u32 {
        (self.x_max - self.x_min + 1) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y_max - self.y_min + 1) as u32
    }

    pub fn area(&self) -> u32 {
        self.width() * self.height()
    }

    /// Integer centre of the box.
    pub fn center(&self) -> Point {
        Point::new((self.x_min + self.x_max) / 2, (self.y_min + self.y_max) / 2)
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x_min && point.x <= self.x_max && point.y >= self.y_min && point.y <= self.y_max
    }

    /// Grows the box so that it also covers `point`.
    pub fn include(&mut self, point: Point) {
        self.x_min = self.x_min.min(point.x);
        self.y_min = self.y_min.min(point.y);
        self.x_max = self.x_max.max(point.x);
        self.y_max = self.y_max.max(point.y);
    }

    /// Smallest box covering both boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x_min: self.x_min.min(other.x_min),
            y_min: self.y_min.min(other.y_min),
            x_max: self.x_max.max(other.x_max),
            y_max: self.y_max.max(other.y_max),
        }
    }
}
