use crate::models::detection::Point2;
use imageproc::contours::Contour;

/// Contour points as floating point coordinates
pub fn contour_points(contour: &Contour<i32>) -> Vec<Point2> {
    contour
        .points
        .iter()
        .map(|p| Point2::new(p.x as f32, p.y as f32))
        .collect()
}

fn cross(o: Point2, a: Point2, b: Point2) -> f32 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull (monotone chain), counter-clockwise, without collinear points
pub fn convex_hull(points: &[Point2]) -> Vec<Point2> {
    let mut pts = points.to_vec();
    pts.sort_by(|a, b| {
        a.x.partial_cmp(&b.x)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
    });
    pts.dedup();

    if pts.len() < 3 {
        return pts;
    }

    let mut hull: Vec<Point2> = Vec::with_capacity(pts.len() * 2);
    for &p in &pts {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }

    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len
            && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(p);
    }

    hull.pop();
    hull
}

/// Minimum-area enclosing rectangle of a convex hull (rotating calipers)
///
/// Corners come back as a closed cycle starting at the corner nearest the
/// top-left. Returns `None` when the hull has no area.
pub fn min_area_rect(hull: &[Point2]) -> Option<[Point2; 4]> {
    if hull.len() < 3 {
        return None;
    }

    let n = hull.len();
    let mut best: Option<(f32, [Point2; 4])> = None;

    for i in 0..n {
        let a = hull[i];
        let b = hull[(i + 1) % n];
        let (ex, ey) = (b.x - a.x, b.y - a.y);
        let len = (ex * ex + ey * ey).sqrt();
        if len < f32::EPSILON {
            continue;
        }
        let (nx, ny) = (ex / len, ey / len);
        let (px, py) = (-ny, nx);

        let (mut min_n, mut max_n) = (f32::MAX, f32::MIN);
        let (mut min_p, mut max_p) = (f32::MAX, f32::MIN);
        for q in hull {
            let dx = q.x - a.x;
            let dy = q.y - a.y;
            let pn = nx * dx + ny * dy;
            let pp = px * dx + py * dy;
            min_n = min_n.min(pn);
            max_n = max_n.max(pn);
            min_p = min_p.min(pp);
            max_p = max_p.max(pp);
        }

        let area = (max_n - min_n) * (max_p - min_p);
        if area <= 0.0 {
            continue;
        }
        if best.as_ref().map(|(a, _)| area < *a).unwrap_or(true) {
            let corner = |u: f32, v: f32| Point2::new(a.x + u * nx + v * px, a.y + u * ny + v * py);
            best = Some((
                area,
                [
                    corner(min_n, min_p),
                    corner(max_n, min_p),
                    corner(max_n, max_p),
                    corner(min_n, max_p),
                ],
            ));
        }
    }

    best.map(|(_, corners)| start_top_left(corners))
}

/// Rotate the cycle so the corner with the smallest x + y comes first
fn start_top_left(mut corners: [Point2; 4]) -> [Point2; 4] {
    let first = corners
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (a.x + a.y)
                .partial_cmp(&(b.x + b.y))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
        .unwrap_or(0);
    corners.rotate_left(first);
    corners
}
