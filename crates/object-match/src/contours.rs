//! Outer-boundary extraction and the polygon helpers used to pick a crop.
//!
//! Points are `(x, y)` pixel coordinates with y pointing down.

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::approximate_polygon_dp;
use vision_capture::Rect;

pub use imageproc::geometry::contour_area;

pub type Point = imageproc::point::Point<i32>;

/// A closed boundary, stored with straight runs collapsed to their end points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contour {
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: (f32, f32),
    pub radius: f32,
}

/// Drop points in the middle of straight horizontal, vertical or diagonal runs.
fn compress_runs(points: Vec<Point>) -> Vec<Point> {
    let n = points.len();
    if n < 3 {
        return points;
    }
    let kept: Vec<Point> = (0..n)
        .filter(|&i| {
            let p = points[i];
            let prev = points[(i + n - 1) % n];
            let next = points[(i + 1) % n];
            (p.x - prev.x, p.y - prev.y) != (next.x - p.x, next.y - p.y)
        })
        .map(|i| points[i])
        .collect();
    if kept.is_empty() {
        vec![points[0]]
    } else {
        kept
    }
}

/// Outer contours of the 8-connected foreground regions of `binary`
/// (non-zero = foreground). Regions lying inside a hole of another region are
/// skipped, and holes contribute nothing. Contours come out in raster order of
/// each region's top-left pixel.
pub fn find_external_contours(binary: &GrayImage) -> Vec<Contour> {
    if binary.width() == 0 || binary.height() == 0 {
        return Vec::new();
    }
    // Top-level outer borders are exactly the ones without a parent hole
    find_contours::<i32>(binary)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| Contour {
            points: compress_runs(c.points),
        })
        .collect()
}

/// Inclusive pixel bounds as a rectangle; negative coordinates clamp to zero.
pub fn bounding_rect(points: &[Point]) -> Option<Rect> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    let (min_x, min_y) = (min_x.max(0), min_y.max(0));
    if max_x < min_x || max_y < min_y {
        return None;
    }
    Some(Rect::new(
        min_x as u32,
        min_y as u32,
        (max_x - min_x + 1) as u32,
        (max_y - min_y + 1) as u32,
    ))
}

/// Douglas-Peucker on a closed polygon. The ring is cut at the vertex
/// farthest from the first one and each half is simplified as an open chain,
/// so both cut points always survive.
pub fn approx_closed_polygon(points: &[Point], epsilon: f64) -> Vec<Point> {
    if points.len() < 3 || epsilon <= 0.0 {
        return points.to_vec();
    }
    let origin = points[0];
    let d2 = |p: &Point| {
        let (dx, dy) = ((p.x - origin.x) as i64, (p.y - origin.y) as i64);
        dx * dx + dy * dy
    };
    let mut far = 0;
    for (i, p) in points.iter().enumerate() {
        if d2(p) > d2(&points[far]) {
            far = i;
        }
    }
    if far == 0 {
        return vec![origin];
    }

    let mut poly = approximate_polygon_dp(&points[..=far], epsilon, false);
    let mut back: Vec<Point> = points[far..].to_vec();
    back.push(origin);
    let back = approximate_polygon_dp(&back, epsilon, false);
    // Both halves share the cut vertex and the origin
    poly.extend_from_slice(&back[1..back.len() - 1]);
    poly
}

fn dist(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

fn circle_from_two(a: (f64, f64), b: (f64, f64)) -> ((f64, f64), f64) {
    let c = ((a.0 + b.0) / 2.0, (a.1 + b.1) / 2.0);
    (c, dist(a, b) / 2.0)
}

fn circle_from_three(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> ((f64, f64), f64) {
    let d = 2.0 * (a.0 * (b.1 - c.1) + b.0 * (c.1 - a.1) + c.0 * (a.1 - b.1));
    if d.abs() < 1e-12 {
        // Collinear: the widest pair spans the rest
        let pairs = [(a, b), (a, c), (b, c)];
        let (p, q) = pairs
            .into_iter()
            .fold((a, b), |best, (p, q)| {
                if dist(p, q) > dist(best.0, best.1) {
                    (p, q)
                } else {
                    best
                }
            });
        return circle_from_two(p, q);
    }
    let (a2, b2, c2) = (
        a.0 * a.0 + a.1 * a.1,
        b.0 * b.0 + b.1 * b.1,
        c.0 * c.0 + c.1 * c.1,
    );
    let ux = (a2 * (b.1 - c.1) + b2 * (c.1 - a.1) + c2 * (a.1 - b.1)) / d;
    let uy = (a2 * (c.0 - b.0) + b2 * (a.0 - c.0) + c2 * (b.0 - a.0)) / d;
    ((ux, uy), dist((ux, uy), a))
}

/// Smallest circle containing every point (incremental Welzl).
pub fn min_enclosing_circle(points: &[Point]) -> Option<Circle> {
    let pts: Vec<(f64, f64)> = points.iter().map(|p| (p.x as f64, p.y as f64)).collect();
    let first = *pts.first()?;
    let inside = |c: &((f64, f64), f64), p: (f64, f64)| dist(c.0, p) <= c.1 + 1e-7;

    let mut c = (first, 0.0);
    for i in 1..pts.len() {
        if inside(&c, pts[i]) {
            continue;
        }
        c = (pts[i], 0.0);
        for j in 0..i {
            if inside(&c, pts[j]) {
                continue;
            }
            c = circle_from_two(pts[i], pts[j]);
            for k in 0..j {
                if !inside(&c, pts[k]) {
                    c = circle_from_three(pts[i], pts[j], pts[k]);
                }
            }
        }
    }
    Some(Circle {
        center: (c.0 .0 as f32, c.0 .1 as f32),
        radius: c.1 as f32,
    })
}
