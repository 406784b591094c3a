//! Least-squares mean ground plane and the segment metrics derived from it.
//!
//! A mean plane is the line `z = a·x + b` in profile coordinates that best fits
//! a piecewise linear ground cross-section.

use crate::math::DVec2;
use crate::path::SegmentPath;

/// Rate of sound speed change with height used for favorable heights.
pub const ALPHA0: f64 = 2e-4;

/// Fits `(a, b)` minimising the integrated squared height error over the
/// polyline `points`, which must be ordered by increasing x.
pub fn mean_plane_coefficients(points: &[DVec2]) -> (f64, f64) {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return (0.0, 0.0);
    };
    let mut sum_z = 0.0;
    let mut sum_xz = 0.0;
    for w in points.windows(2) {
        let (p0, p1) = (w[0], w[1]);
        let h = p1.x - p0.x;
        sum_z += h * (p0.y + p1.y) / 2.0;
        sum_xz += h / 6.0 * (p0.x * (2.0 * p0.y + p1.y) + p1.x * (p0.y + 2.0 * p1.y));
    }
    let (x0, x1) = (first.x, last.x);
    let s1 = x1 - x0;
    let sx = (x1 * x1 - x0 * x0) / 2.0;
    let sxx = (x1.powi(3) - x0.powi(3)) / 3.0;
    let det = sxx * s1 - sx * sx;
    if !det.is_finite() || det <= 1e-12 * (sxx * s1).abs() || s1 <= 0.0 {
        let mean = points.iter().map(|p| p.y).sum::<f64>() / points.len() as f64;
        return (0.0, mean);
    }
    let a = (sum_xz * s1 - sx * sum_z) / det;
    let b = (sxx * sum_z - sx * sum_xz) / det;
    (a, b)
}

/// Foot of the perpendicular from `c` to the line `y = a·x + b`.
pub fn project_point_on_line(c: DVec2, a: f64, b: f64) -> DVec2 {
    let x = (c.x + a * (c.y - b)) / (1.0 + a * a);
    DVec2::new(x, a * x + b)
}

/// Length of the arc of radius `max(1000, 8·d)` subtending chord `mn`.
pub fn to_curve(mn: f64, d: f64) -> f64 {
    let radius = (8.0 * d).max(1000.0);
    2.0 * radius * (mn / (2.0 * radius)).clamp(-1.0, 1.0).asin()
}

/// Builds the segment between `src` and `rcv` over the mean plane `(a, b)`.
///
/// `g_path` is the ground coefficient along the segment and `g_s` the one at the
/// source; they are mixed when the source is close to the ground.
pub fn compute_segment(
    src: DVec2,
    rcv: DVec2,
    mean_plane: (f64, f64),
    g_path: f64,
    g_s: f64,
) -> SegmentPath {
    let (a, b) = mean_plane;
    let s_mean_plane = project_point_on_line(src, a, b);
    let r_mean_plane = project_point_on_line(rcv, a, b);
    let s_prime = s_mean_plane * 2.0 - src;
    let r_prime = r_mean_plane * 2.0 - rcv;

    let d = src.distance(rcv);
    let dp = s_mean_plane.distance(r_mean_plane);
    let zs_h = src.distance(s_mean_plane);
    let zr_h = rcv.distance(r_mean_plane);
    let heights = zs_h + zr_h;

    let (test_form_h, g_path_prime, zs_f, zr_f, test_form_f) = if heights > 0.0 {
        let test_form_h = dp / (30.0 * heights);
        let g_path_prime = if test_form_h <= 1.0 {
            g_path * test_form_h + g_s * (1.0 - test_form_h)
        } else {
            g_path
        };
        let delta_zt = 6e-3 * dp / heights;
        let delta_zs = ALPHA0 * (zs_h / heights).powi(2) * dp * dp / 2.0;
        let delta_zr = ALPHA0 * (zr_h / heights).powi(2) * dp * dp / 2.0;
        let zs_f = zs_h + delta_zs + delta_zt;
        let zr_f = zr_h + delta_zr + delta_zt;
        let test_form_f = dp / (30.0 * (zs_f + zr_f));
        (test_form_h, g_path_prime, zs_f, zr_f, test_form_f)
    } else {
        // Both ends lie on the mean plane.
        (f64::INFINITY, g_path, zs_h, zr_h, f64::INFINITY)
    };

    SegmentPath {
        s: src,
        r: rcv,
        s_mean_plane,
        r_mean_plane,
        s_prime,
        r_prime,
        a,
        b,
        d,
        dp,
        zs_h,
        zr_h,
        zs_f,
        zr_f,
        test_form_h,
        test_form_f,
        g_path,
        g_path_prime,
        d_prime: 0.0,
        dc: None,
    }
}
