//! Quadrilateral candidates from a binary mask.
//!
//! Foreground blobs are traced as 8-connected components; each blob's outer
//! shape is its convex hull, simplified to a polygon and kept when it reduces
//! to a plausible convex quadrilateral.

use nalgebra::Point2;

/// One 8-connected foreground blob.
#[derive(Clone, Debug)]
pub(crate) struct Component {
    /// Raster index of the first pixel visited.
    pub seed: usize,
    /// Foreground pixels with at least one 4-neighbour outside the blob.
    pub boundary: Vec<Point2<i32>>,
}

/// Trace components of `mask` (nonzero = foreground) whose bounding box is
/// at least `min_extent` pixels on its longer side.
pub(crate) fn connected_components(
    mask: &[u8],
    width: usize,
    height: usize,
    min_extent: usize,
    visited: &mut Vec<bool>,
) -> Vec<Component> {
    visited.clear();
    visited.resize(width * height, false);
    let fg = |x: i64, y: i64| -> bool {
        x >= 0
            && y >= 0
            && (x as usize) < width
            && (y as usize) < height
            && mask[y as usize * width + x as usize] != 0
    };

    let mut out = Vec::new();
    let mut stack = Vec::new();
    for seed in 0..width * height {
        if mask[seed] == 0 || visited[seed] {
            continue;
        }
        visited[seed] = true;
        stack.push(seed);

        let mut boundary = Vec::new();
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % width, idx / width);
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);

            let (xi, yi) = (x as i64, y as i64);
            if !(fg(xi - 1, yi) && fg(xi + 1, yi) && fg(xi, yi - 1) && fg(xi, yi + 1)) {
                boundary.push(Point2::new(x as i32, y as i32));
            }
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let (nx, ny) = (xi + dx, yi + dy);
                    if (dx, dy) == (0, 0) || !fg(nx, ny) {
                        continue;
                    }
                    let n = ny as usize * width + nx as usize;
                    if !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        let extent = (max_x - min_x).max(max_y - min_y) + 1;
        if extent >= min_extent {
            out.push(Component { seed, boundary });
        }
    }
    out
}

#[inline]
fn cross(o: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull by monotone chain, collinear points dropped.
pub(crate) fn convex_hull(points: &[Point2<i32>]) -> Vec<Point2<f64>> {
    let mut pts: Vec<Point2<f64>> = points
        .iter()
        .map(|p| Point2::new(p.x as f64, p.y as f64))
        .collect();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let mut hull: Vec<Point2<f64>> = Vec::with_capacity(pts.len() + 1);
    let push_chain = |hull: &mut Vec<Point2<f64>>, p: Point2<f64>, start: usize| {
        while hull.len() >= start + 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(p);
    };
    for &p in &pts {
        push_chain(&mut hull, p, 0);
    }
    // The last point of the lower chain starts the upper chain.
    hull.pop();
    let upper_start = hull.len();
    for &p in pts.iter().rev() {
        push_chain(&mut hull, p, upper_start);
    }
    hull.pop();
    hull
}

fn perimeter(poly: &[Point2<f64>]) -> f64 {
    (0..poly.len())
        .map(|i| (poly[(i + 1) % poly.len()] - poly[i]).norm())
        .sum()
}

fn distance_to_line(p: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    let len = (b - a).norm();
    if len < 1e-12 {
        return (p - a).norm();
    }
    cross(a, b, p).abs() / len
}

fn simplify_chain(chain: &[Point2<f64>], i: usize, j: usize, eps: f64, out: &mut Vec<Point2<f64>>) {
    if j <= i + 1 {
        return;
    }
    let (k, d) = (i + 1..j)
        .map(|k| (k, distance_to_line(chain[k], chain[i], chain[j])))
        .fold((i, -1.0), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
    if d > eps {
        simplify_chain(chain, i, k, eps, out);
        out.push(chain[k]);
        simplify_chain(chain, k, j, eps, out);
    }
}

/// Douglas-Peucker simplification of a closed convex polygon.
///
/// The polygon is split at two far-apart vertices: the one farthest from the
/// vertex mean, and the one farthest from that. Both are kept.
pub(crate) fn approx_polygon(poly: &[Point2<f64>], eps: f64) -> Vec<Point2<f64>> {
    let n = poly.len();
    if n < 4 {
        return poly.to_vec();
    }
    let mean = poly.iter().fold(Point2::origin(), |acc: Point2<f64>, p| {
        acc + p.coords / n as f64
    });
    let farthest_from = |c: Point2<f64>| {
        (0..n)
            .max_by(|&a, &b| (poly[a] - c).norm().total_cmp(&(poly[b] - c).norm()))
            .unwrap_or(0)
    };
    let a = farthest_from(mean);
    let b = farthest_from(poly[a]);

    let walk = |from: usize, to: usize| -> Vec<Point2<f64>> {
        let len = (to + n - from) % n;
        (0..=len).map(|s| poly[(from + s) % n]).collect()
    };

    let mut out = Vec::new();
    for chain in [walk(a, b), walk(b, a)] {
        out.push(chain[0]);
        simplify_chain(&chain, 0, chain.len() - 1, eps, &mut out);
    }
    out
}

/// Acceptance limits for quadrilateral candidates, in pixels.
#[derive(Clone, Copy, Debug)]
pub(crate) struct QuadLimits {
    pub min_perimeter: f64,
    pub max_perimeter: f64,
    pub approx_accuracy_rate: f64,
    pub min_corner_distance_rate: f64,
    pub min_distance_to_border: f64,
    pub width: usize,
    pub height: usize,
}

/// A convex quadrilateral with corners clockwise in image coordinates
/// (positive shoelace area with y pointing down).
#[derive(Clone, Copy, Debug)]
pub(crate) struct Quad {
    pub corners: [Point2<f64>; 4],
    pub seed: usize,
}

/// Fit a quadrilateral to a component outline.
pub(crate) fn fit_quad(component: &Component, limits: &QuadLimits) -> Option<Quad> {
    let hull = convex_hull(&component.boundary);
    if hull.len() < 4 {
        return None;
    }
    let hull_perimeter = perimeter(&hull);
    if hull_perimeter < limits.min_perimeter || hull_perimeter > limits.max_perimeter {
        return None;
    }

    let eps = (limits.approx_accuracy_rate * hull_perimeter).max(1.0);
    let poly = approx_polygon(&hull, eps);
    let mut corners: [Point2<f64>; 4] = poly.as_slice().try_into().ok()?;

    let turns: Vec<f64> = (0..4)
        .map(|i| cross(corners[i], corners[(i + 1) % 4], corners[(i + 2) % 4]))
        .collect();
    let convex = turns.iter().all(|&t| t > 0.0) || turns.iter().all(|&t| t < 0.0);
    if !convex {
        return None;
    }
    if turns[0] < 0.0 {
        corners.swap(1, 3);
    }

    let quad_perimeter = perimeter(&corners);
    let min_side = limits.min_corner_distance_rate * quad_perimeter;
    if (0..4).any(|i| (corners[(i + 1) % 4] - corners[i]).norm() < min_side) {
        return None;
    }

    let d = limits.min_distance_to_border;
    let (max_x, max_y) = (limits.width as f64 - 1.0 - d, limits.height as f64 - 1.0 - d);
    if corners
        .iter()
        .any(|c| c.x < d || c.y < d || c.x > max_x || c.y > max_y)
    {
        return None;
    }

    Some(Quad {
        corners,
        seed: component.seed,
    })
}

/// `true` if two quads outline the same square: mean squared corner
/// distance under the best cyclic alignment below `(rate * perimeter)^2`.
pub(crate) fn near_duplicate(a: &[Point2<f64>; 4], b: &[Point2<f64>; 4], limit: f64) -> bool {
    (0..4).any(|shift| {
        let mean_sq = (0..4)
            .map(|i| (a[i] - b[(i + shift) % 4]).norm_squared())
            .sum::<f64>()
            / 4.0;
        mean_sq < limit * limit
    })
}
