//! Collision Primitives
//!
//! Pure intersection and overlap tests between geometry kernel types.
//! `circle_vs_segment` is the hit-scan test used by projectiles and
//! laser beams.

use super::geometry::{Aabb, Circle, Line, Point, EPSILON};

/// Intersection of the infinite lines through `a` and `b`.
///
/// Returns `None` for parallel (or coincident) lines.
pub fn line_intersect(a: &Line, b: &Line) -> Option<Point> {
    let r = a.delta();
    let s = b.delta();
    let denom = r.cross(s);
    if denom.abs() < EPSILON {
        return None;
    }
    let t = (b.start - a.start).cross(s) / denom;
    Some(a.start + r * t)
}

/// Intersection point of two segments.
///
/// Determinant method; parametric bounds are checked with an
/// `EPSILON` tolerance so touching endpoints count as a hit.
pub fn segment_intersect(a: &Line, b: &Line) -> Option<Point> {
    let r = a.delta();
    let s = b.delta();
    let denom = r.cross(s);
    if denom.abs() < EPSILON {
        return None;
    }

    let qp = b.start - a.start;
    let t = qp.cross(s) / denom;
    let u = qp.cross(r) / denom;

    let within = |v: f64| (-EPSILON..=1.0 + EPSILON).contains(&v);
    if within(t) && within(u) {
        Some(a.start + r * t)
    } else {
        None
    }
}

/// Point inside or on a circle.
#[inline]
pub fn circle_vs_point(circle: &Circle, point: Point) -> bool {
    circle.origin.distance(point) <= circle.radius
}

/// Two circles overlap or touch.
#[inline]
pub fn circle_vs_circle(a: &Circle, b: &Circle) -> bool {
    a.origin.distance(b.origin) <= a.radius + b.radius
}

/// Closest point on a segment to `point`.
pub fn closest_point_on_segment(segment: &Line, point: Point) -> Point {
    let d = segment.delta();
    let len_sq = d.dot(d);
    if len_sq < EPSILON {
        return segment.start;
    }
    let t = ((point - segment.start).dot(d) / len_sq).clamp(0.0, 1.0);
    segment.start + d * t
}

/// Circle touches a segment.
///
/// A zero-length segment degrades to `circle_vs_point`.
pub fn circle_vs_segment(circle: &Circle, segment: &Line) -> bool {
    let d = segment.delta();
    if d.dot(d) < EPSILON {
        return circle_vs_point(circle, segment.start);
    }
    circle_vs_point(circle, closest_point_on_segment(segment, circle.origin))
}

/// Boxes overlap on every shared axis.
///
/// Touching faces do not count. The z test is skipped unless both boxes
/// have a height.
pub fn box_vs_box(a: &Aabb, b: &Aabb) -> bool {
    let x = a.min_x() < b.max_x() && b.min_x() < a.max_x();
    let y = a.min_y() < b.max_y() && b.min_y() < a.max_y();
    if !(x && y) {
        return false;
    }
    match (a.height, b.height) {
        (Some(ha), Some(hb)) => a.origin.z < b.origin.z + hb && b.origin.z < a.origin.z + ha,
        _ => true,
    }
}

/// Point inside or on a box.
pub fn box_vs_point(b: &Aabb, p: Point) -> bool {
    let planar = p.x >= b.min_x() && p.x <= b.max_x() && p.y >= b.min_y() && p.y <= b.max_y();
    match b.height {
        Some(h) => planar && p.z >= b.origin.z && p.z <= b.origin.z + h,
        None => planar,
    }
}
