//! Math types for noisepath
//!
//! Scene coordinates are `DVec3` (x east, y north, z altitude). Vertical profiles
//! are `DVec2` with x the horizontal distance along the path and y the altitude.

pub use glam::{DQuat, DVec2, DVec3, EulerRot};

/// Geometric tolerance used by intersection tests.
pub const EPSILON: f64 = 1e-7;

/// Directivity orientation of a source, in degrees.
///
/// `yaw` is measured clockwise from north, `pitch` upward from the horizon and
/// `roll` around the facing direction.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Orientation {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl Orientation {
    pub fn new(yaw: f64, pitch: f64, roll: f64) -> Self {
        Self { yaw, pitch, roll }
    }

    /// Orientation facing along `vector`.
    pub fn from_vector(vector: DVec3, roll: f64) -> Self {
        let v = vector.normalize_or_zero();
        Self {
            yaw: v.x.atan2(v.y).to_degrees(),
            pitch: v.z.clamp(-1.0, 1.0).asin().to_degrees(),
            roll,
        }
    }

    pub fn rotation(&self) -> DQuat {
        DQuat::from_euler(
            EulerRot::ZXY,
            -self.yaw.to_radians(),
            self.pitch.to_radians(),
            self.roll.to_radians(),
        )
    }

    /// Rotates `vector` from the north-facing frame into this orientation.
    pub fn rotate(&self, vector: DVec3) -> DVec3 {
        self.rotation() * vector
    }
}

/// Side of the directed line `p0 -> p1` on which `q` lies: `1` left (above in a
/// profile), `-1` right (below), `0` collinear.
pub fn orientation_index(p0: DVec2, p1: DVec2, q: DVec2) -> i32 {
    let cross = (p1 - p0).perp_dot(q - p0);
    if cross > 0.0 {
        1
    } else if cross < 0.0 {
        -1
    } else {
        0
    }
}

/// Parameters `(t, u)` of the intersection of segments `a0-a1` and `b0-b1`, with
/// the point at `a0 + t (a1 - a0)`. Parallel segments never intersect.
pub fn segment_intersection(a0: DVec2, a1: DVec2, b0: DVec2, b1: DVec2) -> Option<(f64, f64)> {
    let r = a1 - a0;
    let s = b1 - b0;
    let denom = r.perp_dot(s);
    if denom.abs() < EPSILON * EPSILON {
        return None;
    }
    let qp = b0 - a0;
    let t = qp.perp_dot(s) / denom;
    let u = qp.perp_dot(r) / denom;
    let tol = EPSILON;
    if (-tol..=1.0 + tol).contains(&t) && (-tol..=1.0 + tol).contains(&u) {
        Some((t.clamp(0.0, 1.0), u.clamp(0.0, 1.0)))
    } else {
        None
    }
}

/// Shortest horizontal distance from `p` to segment `a-b`.
pub fn distance_to_segment(p: DVec2, a: DVec2, b: DVec2) -> f64 {
    let ab = a.distance_squared(b);
    if ab == 0.0 {
        return p.distance(a);
    }
    let t = ((p - a).dot(b - a) / ab).clamp(0.0, 1.0);
    p.distance(a + (b - a) * t)
}

/// Shortest horizontal distance between segments `a0-a1` and `b0-b1`.
pub fn segment_distance(a0: DVec2, a1: DVec2, b0: DVec2, b1: DVec2) -> f64 {
    if segment_intersection(a0, a1, b0, b1).is_some() {
        return 0.0;
    }
    distance_to_segment(a0, b0, b1)
        .min(distance_to_segment(a1, b0, b1))
        .min(distance_to_segment(b0, a0, a1))
        .min(distance_to_segment(b1, a0, a1))
}

/// Closest point to `p` on the 3D segment `a-b`.
pub fn closest_point_on_segment(p: DVec3, a: DVec3, b: DVec3) -> DVec3 {
    let ab = a.distance_squared(b);
    if ab == 0.0 {
        return a;
    }
    let t = ((p - a).dot(b - a) / ab).clamp(0.0, 1.0);
    a + (b - a) * t
}

/// Altitude at `p` interpolated along `a-b` by horizontal distance from `a`.
pub fn interpolate_z(p: DVec2, a: DVec3, b: DVec3) -> f64 {
    let length = a.truncate().distance(b.truncate());
    if length == 0.0 {
        return a.z;
    }
    a.z + (b.z - a.z) * (p.distance(a.truncate()) / length)
}
