use crate::data::PropagationData;
use crate::error::Result;
use crate::math::{DVec2, DVec3};
use crate::mean_plane::{compute_segment, mean_plane_coefficients};
use crate::path::{PointKind, PointPath, PropagationPath};
use crate::scene::{CutPointKind, CutProfile};

use super::direct::diffraction_terms;
use super::side_hull::{Side, compute_side_hull};

/// A polyline flattened into one distance/height profile, with the ground
/// below each of its legs.
pub(super) struct UnfoldedPath {
    /// Vertices as (distance along the polyline, altitude).
    pub(super) points: Vec<DVec2>,
    pub(super) ground: Vec<DVec2>,
    pub(super) leg_profiles: Vec<CutProfile>,
    pub(super) leg_g: Vec<f64>,
    /// Length-weighted ground coefficient of the whole polyline.
    pub(super) g_path: f64,
}

impl UnfoldedPath {
    pub(super) fn new(data: &PropagationData, coords: &[DVec3]) -> Result<Self> {
        let mut points = Vec::with_capacity(coords.len());
        let mut x = 0.0;
        for (i, c) in coords.iter().enumerate() {
            if i > 0 {
                x += coords[i - 1].truncate().distance(c.truncate());
            }
            points.push(DVec2::new(x, c.z));
        }

        let mut ground: Vec<DVec2> = Vec::new();
        let mut leg_profiles = Vec::with_capacity(coords.len().saturating_sub(1));
        let mut leg_g = Vec::with_capacity(coords.len().saturating_sub(1));
        let mut weighted_g = 0.0;
        for (i, leg) in coords.windows(2).enumerate() {
            let profile = data.scene.profile(leg[0], leg[1], data.settings.g_s)?;
            let offset = points[i].x;
            for (cut, d) in profile.points.iter().zip(profile.distances()) {
                if cut.kind == CutPointKind::GroundEffect {
                    continue;
                }
                let p = DVec2::new(offset + d, cut.z_ground);
                if ground.last().is_some_and(|q| q.x >= p.x) {
                    continue;
                }
                ground.push(p);
            }
            let g = profile.g_path_total();
            weighted_g += g * (points[i + 1].x - offset);
            leg_g.push(g);
            leg_profiles.push(profile);
        }
        let length = points.last().map_or(0.0, |p| p.x);
        let g_path = if length > 0.0 { weighted_g / length } else { 0.0 };
        Ok(Self {
            points,
            ground,
            leg_profiles,
            leg_g,
            g_path,
        })
    }

    pub(super) fn mean_plane(&self) -> (f64, f64) {
        mean_plane_coefficients(&self.ground)
    }
}

/// Diffraction around the vertical edges met on one side of the line `src-rcv`.
///
/// The lateral hull path is unfolded into a single distance/height profile
/// whose ground is the concatenation of the ground below each leg. Returns
/// `Ok(None)` when that side has no usable hull path.
pub fn compute_v_edge_diffraction(
    data: &PropagationData,
    src: DVec3,
    rcv: DVec3,
    side: Side,
) -> Result<Option<PropagationPath>> {
    let settings = &data.settings;
    let coords = compute_side_hull(data.scene.as_ref(), side, src, rcv)?;
    if coords.len() < 3 {
        return Ok(None);
    }
    let last = coords.len() - 1;
    let unfolded = UnfoldedPath::new(data, &coords)?;
    let plane = unfolded.mean_plane();
    let (start, end) = (unfolded.points[0], unfolded.points[last]);

    let dc = src.distance(rcv);
    let mut sr_segment = compute_segment(start, end, plane, unfolded.g_path, settings.g_s);
    sr_segment.dc = Some(dc);
    let mut segments: Vec<_> = unfolded
        .points
        .windows(2)
        .zip(&unfolded.leg_g)
        .map(|(w, &g)| compute_segment(w[0], w[1], plane, g, settings.g_s))
        .collect();

    let hinges = &unfolded.points[1..last];
    let Some(mut terms) = diffraction_terms(&mut sr_segment, &mut segments, hinges) else {
        return Ok(None);
    };
    terms.delta_h = segments[0].d + terms.e + segments[last - 1].d - dc;

    let scene = data.scene.as_ref();
    let leg_g = &unfolded.leg_g;
    let mut points = Vec::with_capacity(coords.len());
    points.push(
        PointPath::new(PointKind::Source, src, scene.z_ground(src)).with_ground_coef(leg_g[0]),
    );
    for (i, &c) in coords[1..last].iter().enumerate() {
        points.push(
            PointPath::new(PointKind::DiffractionV, c, scene.z_ground(c))
                .with_ground_coef(leg_g[i + 1]),
        );
    }
    points.push(
        PointPath::new(PointKind::Receiver, rcv, scene.z_ground(rcv))
            .with_ground_coef(leg_g[last - 1]),
    );

    let mut path = PropagationPath::new(false, points, segments, sr_segment);
    path.diffraction = Some(terms);
    path.difv_points = (1..last).collect();
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::PropagationSettings;
    use crate::scene::{FlatScene, SurfaceMaterial};

    fn data_with_building(x0: f64, x1: f64, half_width: f64) -> PropagationData {
        let mut scene = FlatScene::new(0.0);
        scene
            .add_building(
                &[
                    DVec2::new(x0, -half_width),
                    DVec2::new(x1, -half_width),
                    DVec2::new(x1, half_width),
                    DVec2::new(x0, half_width),
                ],
                10.0,
                SurfaceMaterial::GENERIC,
            )
            .unwrap();
        PropagationData::new(Arc::new(scene), PropagationSettings::default())
    }

    #[test]
    fn test_path_around_building() {
        let data = data_with_building(40.0, 60.0, 10.0);
        let src = DVec3::new(0.0, 0.0, 1.0);
        let rcv = DVec3::new(100.0, 0.0, 4.0);
        for side in [Side::Left, Side::Right] {
            let path = compute_v_edge_diffraction(&data, src, rcv, side)
                .unwrap()
                .unwrap();
            assert!(!path.favorable);
            assert_eq!(path.points.len(), 4);
            assert_eq!(path.points[0].kind, PointKind::Source);
            assert_eq!(path.points[3].kind, PointKind::Receiver);
            assert_eq!(path.difv_points, vec![1, 2]);
            assert_eq!(path.segments.len(), 3);

            let terms = path.diffraction.unwrap();
            let unfolded: f64 = path.segments.iter().map(|s| s.d).sum();
            assert!((terms.delta_h - (unfolded - src.distance(rcv))).abs() < 1e-9);
            assert!(terms.delta_h > 0.0);
            assert!((terms.e - 20.0).abs() < 0.05);
            assert_eq!(path.sr_segment.dc, Some(src.distance(rcv)));
        }
    }

    #[test]
    fn test_no_path_without_obstacle() {
        let data = data_with_building(40.0, 60.0, 10.0);
        let src = DVec3::new(0.0, 50.0, 1.0);
        let rcv = DVec3::new(100.0, 50.0, 4.0);
        let path = compute_v_edge_diffraction(&data, src, rcv, Side::Left).unwrap();
        assert!(path.is_none());
    }
}
