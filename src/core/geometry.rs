//! Geometry Kernel
//!
//! Points, lines, axis-aligned boxes and circles used by the map and
//! the entity colliders.
//!
//! Angles are in degrees, 0° points east (+x) and angles increase towards
//! +y. `direction(θ)` is therefore `(cos θ, sin θ)`; the raycaster and the
//! movement code both depend on this convention.

use std::ops::{Add, Mul, Neg, Sub};
use serde::{Serialize, Deserialize};

/// Tolerance used by the intersection tests.
pub const EPSILON: f64 = 1e-10;

/// Longest cell walk `Line::cells` will produce.
pub const MAX_CELL_WALK: u64 = 1 << 16;

/// One of the three coordinate axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    /// Horizontal axis
    X,
    /// Vertical map axis
    Y,
    /// Height above the map
    Z,
}

impl Axis {
    /// All axes in resolution order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];
}

// =============================================================================
// POINT
// =============================================================================

/// A point (or displacement) in world space.
///
/// `z` defaults to zero; the simulation is planar unless a box carries a
/// height.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    #[serde(default)]
    pub z: f64,
}

impl Point {
    /// Origin.
    pub const ZERO: Self = Self { x: 0.0, y: 0.0, z: 0.0 };

    /// Create a planar point.
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    /// Create a point with an explicit height.
    #[inline]
    pub const fn new3(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Unit vector for a bearing in degrees.
    #[inline]
    pub fn from_angle(degrees: f64) -> Self {
        let (x, y) = direction(degrees);
        Self::new(x, y)
    }

    /// Component along an axis.
    #[inline]
    pub fn axis(self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Copy with one component replaced.
    #[inline]
    pub fn with_axis(self, axis: Axis, value: f64) -> Self {
        match axis {
            Axis::X => Self { x: value, ..self },
            Axis::Y => Self { y: value, ..self },
            Axis::Z => Self { z: value, ..self },
        }
    }

    /// Planar dot product.
    #[inline]
    pub fn dot(self, other: Self) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Planar cross product (z of the 3D cross product).
    #[inline]
    pub fn cross(self, other: Self) -> f64 {
        self.x * other.y - self.y * other.x
    }

    /// Planar length.
    #[inline]
    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Planar distance to another point.
    #[inline]
    pub fn distance(self, other: Self) -> f64 {
        (self - other).length()
    }

    /// Euclidean distance including height.
    #[inline]
    pub fn distance_3d(self, other: Self) -> f64 {
        let d = self - other;
        (d.x * d.x + d.y * d.y + d.z * d.z).sqrt()
    }

    /// True if every component is finite.
    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Components as an array.
    #[inline]
    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Build from an array.
    #[inline]
    pub fn from_array(a: [f64; 3]) -> Self {
        Self::new3(a[0], a[1], a[2])
    }
}

impl Add for Point {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self::new3(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl Sub for Point {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self::new3(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl Mul<f64> for Point {
    type Output = Self;
    fn mul(self, scalar: f64) -> Self {
        Self::new3(self.x * scalar, self.y * scalar, self.z * scalar)
    }
}

impl Neg for Point {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new3(-self.x, -self.y, -self.z)
    }
}

// =============================================================================
// LINE / SEGMENT
// =============================================================================

/// A line segment between two points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Line {
    /// Start point
    pub start: Point,
    /// End point
    pub end: Point,
}

impl Line {
    /// Create a segment.
    pub const fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    /// Segment starting at `origin` with the given bearing and length.
    pub fn from_bearing(origin: Point, degrees: f64, length: f64) -> Self {
        Self::new(origin, origin + Point::from_angle(degrees) * length)
    }

    /// End minus start.
    #[inline]
    pub fn delta(&self) -> Point {
        self.end - self.start
    }

    /// Planar length.
    #[inline]
    pub fn length(&self) -> f64 {
        self.delta().length()
    }

    /// Cells visited walking from `start` to `end`, in order.
    ///
    /// Coordinates are in cell units (one unit per cell). With a clip of
    /// `(width, height)` cells outside `[0, width) x [0, height)` are dropped.
    ///
    /// Segments with a non-finite endpoint visit nothing. At most
    /// `MAX_CELL_WALK` cells are walked.
    pub fn cells(&self, clip: Option<(i64, i64)>) -> Vec<(i64, i64)> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Vec::new();
        }
        let line = match clip {
            Some((w, h)) => match self.clipped(w as f64, h as f64) {
                Some(inside) => inside,
                None => return Vec::new(),
            },
            None => *self,
        };

        let (sx, sy) = (line.start.x, line.start.y);
        let (dx, dy) = (line.end.x - sx, line.end.y - sy);

        let mut cx = sx.floor() as i64;
        let mut cy = sy.floor() as i64;
        let ex = line.end.x.floor() as i64;
        let ey = line.end.y.floor() as i64;

        let step_x: i64 = if dx > 0.0 { 1 } else if dx < 0.0 { -1 } else { 0 };
        let step_y: i64 = if dy > 0.0 { 1 } else if dy < 0.0 { -1 } else { 0 };

        let t_delta_x = if step_x != 0 { 1.0 / dx.abs() } else { f64::INFINITY };
        let t_delta_y = if step_y != 0 { 1.0 / dy.abs() } else { f64::INFINITY };

        let mut t_max_x = match step_x {
            1 => (cx as f64 + 1.0 - sx) / dx,
            -1 => (sx - cx as f64) / -dx,
            _ => f64::INFINITY,
        };
        let mut t_max_y = match step_y {
            1 => (cy as f64 + 1.0 - sy) / dy,
            -1 => (sy - cy as f64) / -dy,
            _ => f64::INFINITY,
        };

        let steps = ex.abs_diff(cx).saturating_add(ey.abs_diff(cy)).min(MAX_CELL_WALK);
        let mut visited = Vec::with_capacity(steps as usize + 1);
        visited.push((cx, cy));

        for _ in 0..steps {
            // Never overshoot an axis that already reached its end cell.
            let advance_x = if cx == ex {
                false
            } else if cy == ey {
                true
            } else {
                t_max_x < t_max_y
            };

            if advance_x {
                cx += step_x;
                t_max_x += t_delta_x;
            } else {
                cy += step_y;
                t_max_y += t_delta_y;
            }
            visited.push((cx, cy));
        }

        if let Some((w, h)) = clip {
            visited.retain(|&(x, y)| x >= 0 && y >= 0 && x < w && y < h);
        }
        visited
    }

    /// Part of the segment inside `[0, width] x [0, height]` (Liang-Barsky).
    pub fn clipped(&self, width: f64, height: f64) -> Option<Line> {
        let d = self.delta();
        let (mut t0, mut t1) = (0.0f64, 1.0f64);
        let edges = [
            (-d.x, self.start.x),
            (d.x, width - self.start.x),
            (-d.y, self.start.y),
            (d.y, height - self.start.y),
        ];
        for (p, q) in edges {
            if p.abs() < EPSILON {
                if q < 0.0 {
                    return None;
                }
                continue;
            }
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return None;
                }
                t1 = t1.min(r);
            }
        }
        Some(Line::new(self.start + d * t0, self.start + d * t1))
    }
}

// =============================================================================
// AXIS-ALIGNED BOX
// =============================================================================

/// Axis-aligned box anchored at its minimum corner.
///
/// `length` spans x, `width` spans y. A box without `height` is planar and
/// is compared on x/y only.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner
    pub origin: Point,
    /// Extent along x
    pub length: f64,
    /// Extent along y
    pub width: f64,
    /// Extent along z, if any
    pub height: Option<f64>,
}

impl Aabb {
    /// Planar box.
    pub const fn new(origin: Point, length: f64, width: f64) -> Self {
        Self { origin, length, width, height: None }
    }

    /// Box with a height.
    pub const fn with_height(origin: Point, length: f64, width: f64, height: f64) -> Self {
        Self { origin, length, width, height: Some(height) }
    }

    /// Square planar box of half-size `half` centered on `center`.
    pub fn centered(center: Point, half: f64) -> Self {
        Self {
            origin: Point::new3(center.x - half, center.y - half, center.z),
            length: half * 2.0,
            width: half * 2.0,
            height: None,
        }
    }

    /// Minimum x.
    #[inline]
    pub fn min_x(&self) -> f64 {
        self.origin.x
    }

    /// Maximum x.
    #[inline]
    pub fn max_x(&self) -> f64 {
        self.origin.x + self.length
    }

    /// Minimum y.
    #[inline]
    pub fn min_y(&self) -> f64 {
        self.origin.y
    }

    /// Maximum y.
    #[inline]
    pub fn max_y(&self) -> f64 {
        self.origin.y + self.width
    }
}

// =============================================================================
// CIRCLE
// =============================================================================

/// Circle used as an entity's hit-test collider.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    /// Center
    pub origin: Point,
    /// Radius
    pub radius: f64,
}

impl Circle {
    /// Create a circle.
    pub const fn new(origin: Point, radius: f64) -> Self {
        Self { origin, radius }
    }
}

// =============================================================================
// ANGLES
// =============================================================================

/// Unit direction `(cos θ, sin θ)` for a bearing in degrees.
#[inline]
pub fn direction(degrees: f64) -> (f64, f64) {
    let rad = degrees.to_radians();
    (rad.cos(), rad.sin())
}

/// Wrap an angle into `[0, 360)`.
#[inline]
pub fn normalize_angle(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Bearing from `from` towards `to`, in `[0, 360)`.
pub fn angle_between(from: Point, to: Point) -> f64 {
    let d = to - from;
    normalize_angle(d.y.atan2(d.x).to_degrees())
}

/// Rotate `point` around `center` by `degrees`.
pub fn rotate_point(point: Point, center: Point, degrees: f64) -> Point {
    let (cos, sin) = direction(degrees);
    let d = point - center;
    Point::new3(
        center.x + d.x * cos - d.y * sin,
        center.y + d.x * sin + d.y * cos,
        point.z,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_point_ops() {
        let a = Point::new(1.0, 2.0);
        let b = Point::new(3.0, -1.0);
        assert_eq!(a + b, Point::new(4.0, 1.0));
        assert_eq!(b - a, Point::new(2.0, -3.0));
        assert_eq!(a * 2.0, Point::new(2.0, 4.0));
        assert!(close(Point::ZERO.distance(Point::new(3.0, 4.0)), 5.0));
        assert_eq!(Point::new(1.0, 2.0).z, 0.0);
    }

    #[test]
    fn test_direction_convention() {
        let (x, y) = direction(0.0);
        assert!(close(x, 1.0) && close(y, 0.0));
        let (x, y) = direction(90.0);
        assert!(close(x, 0.0) && close(y, 1.0));
        let (x, y) = direction(180.0);
        assert!(close(x, -1.0) && close(y, 0.0));
    }

    #[test]
    fn test_normalize_angle() {
        assert!(close(normalize_angle(370.0), 10.0));
        assert!(close(normalize_angle(-90.0), 270.0));
        assert!(close(normalize_angle(720.0), 0.0));
        assert!(normalize_angle(-1e-20) < 360.0);
    }

    #[test]
    fn test_angle_between_and_rotate() {
        assert!(close(angle_between(Point::ZERO, Point::new(0.0, 5.0)), 90.0));
        assert!(close(angle_between(Point::ZERO, Point::new(-1.0, 0.0)), 180.0));

        let p = rotate_point(Point::new(2.0, 1.0), Point::new(1.0, 1.0), 90.0);
        assert!(close(p.x, 1.0) && close(p.y, 2.0));
    }

    #[test]
    fn test_cells_horizontal() {
        let line = Line::new(Point::new(0.5, 0.5), Point::new(3.5, 0.5));
        assert_eq!(line.cells(None), vec![(0, 0), (1, 0), (2, 0), (3, 0)]);
    }

    #[test]
    fn test_cells_diagonal_is_connected() {
        let line = Line::new(Point::new(0.2, 0.7), Point::new(4.9, 3.1));
        let cells = line.cells(None);
        assert_eq!(cells.first(), Some(&(0, 0)));
        assert_eq!(cells.last(), Some(&(4, 3)));
        for pair in cells.windows(2) {
            let step = (pair[1].0 - pair[0].0).abs() + (pair[1].1 - pair[0].1).abs();
            assert_eq!(step, 1);
        }
    }

    #[test]
    fn test_cells_clipped() {
        let line = Line::new(Point::new(-2.5, 1.5), Point::new(2.5, 1.5));
        assert_eq!(line.cells(Some((2, 2))), vec![(0, 1), (1, 1)]);
    }

    #[test]
    fn test_cells_of_huge_segment_are_clipped_first() {
        let line = Line::new(Point::new(0.0, 0.0), Point::new(1e300, 1e300));
        let cells = line.cells(Some((4, 4)));
        assert_eq!(cells.first(), Some(&(0, 0)));
        assert!(cells.len() <= 8);
        assert!(cells.iter().all(|&(x, y)| (0..4).contains(&x) && (0..4).contains(&y)));
    }

    #[test]
    fn test_cells_outside_clip_or_non_finite() {
        let outside = Line::new(Point::new(-9.0, -9.0), Point::new(-1.0, -5.0));
        assert!(outside.cells(Some((4, 4))).is_empty());
        let broken = Line::new(Point::new(0.0, 0.0), Point::new(f64::NAN, 1.0));
        assert!(broken.cells(None).is_empty());
        let far = Line::new(Point::new(0.0, 0.0), Point::new(1e300, 0.0));
        assert_eq!(far.cells(None).len() as u64, MAX_CELL_WALK + 1);
    }

    #[test]
    fn test_box_extents() {
        let b = Aabb::centered(Point::new(10.0, 10.0), 4.0);
        assert_eq!(b.min_x(), 6.0);
        assert_eq!(b.max_y(), 14.0);
        assert!(b.height.is_none());
    }
}
