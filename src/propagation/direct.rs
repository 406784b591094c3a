use crate::data::PropagationData;
use crate::error::Result;
use crate::math::{DVec2, DVec3, orientation_index};
use crate::mean_plane::{compute_segment, mean_plane_coefficients, to_curve};
use crate::path::{DiffractionTerms, PointKind, PointPath, PropagationPath, SegmentPath};
use crate::power::wavelengths;
use crate::scene::{CutPoint, CutPointKind, CutProfile};

use super::side_hull::Side;
use super::vertical::compute_v_edge_diffraction;

fn end_point(kind: PointKind, cut: &CutPoint) -> PointPath {
    PointPath::new(kind, cut.coordinate, cut.z_ground).with_ground_coef(cut.ground_coef)
}

/// Path length differences of the chain `sr.s -> hinges -> sr.r`.
///
/// `segments` holds one segment per leg of the chain, so at least two. Sets the
/// mirrored lengths `d_prime` of `sr` and of the outer segments.
pub(super) fn diffraction_terms(
    sr: &mut SegmentPath,
    segments: &mut [SegmentPath],
    hinges: &[DVec2],
) -> Option<DiffractionTerms> {
    let (&first_hinge, &last_hinge) = (hinges.first()?, hinges.last()?);
    let n = segments.len();
    if n < 2 {
        return None;
    }
    let (src, rcv, d) = (sr.s, sr.r, sr.d);
    let s_prime = segments[0].s_prime;
    let r_prime = segments[n - 1].r_prime;

    let e: f64 = hinges.windows(2).map(|w| w[0].distance(w[1])).sum();
    let d_so = src.distance(first_hinge);
    let d_or = last_hinge.distance(rcv);
    let d_spo = s_prime.distance(first_hinge);
    let d_orp = last_hinge.distance(r_prime);
    let d_spr = s_prime.distance(rcv);
    let d_srp = src.distance(r_prime);
    let d_prime = s_prime.distance(r_prime);

    let side = orientation_index(src, rcv, first_hinge);
    let delta_h = side as f64 * (d_so + e + d_or - d);
    let delta_s_prime_r_h =
        orientation_index(s_prime, rcv, first_hinge) as f64 * (d_spo + e + d_or - d_spr);
    let delta_s_r_prime_h =
        orientation_index(src, r_prime, last_hinge) as f64 * (d_so + e + d_orp - d_srp);
    let delta_prime_h =
        orientation_index(s_prime, r_prime, first_hinge) as f64 * (d_spo + e + d_orp - d_prime);

    let delta_s_prime_r_f = to_curve(d_spo, d_spr) + to_curve(e, d_spr) + to_curve(d_or, d_spr)
        - to_curve(d_spr, d_spr);
    let delta_s_r_prime_f = to_curve(d_so, d_srp) + to_curve(e, d_srp) + to_curve(d_orp, d_srp)
        - to_curve(d_srp, d_srp);
    let delta_f = if side == 1 {
        to_curve(d_so, d) + to_curve(e, d) + to_curve(d_or, d) - to_curve(d, d)
    } else {
        // edge below the sight line: compare with the point of the line above it
        let t = if rcv.x != src.x {
            ((first_hinge.x - src.x) / (rcv.x - src.x)).clamp(0.0, 1.0)
        } else {
            0.5
        };
        let p_a = src.lerp(rcv, t);
        2.0 * to_curve(src.distance(p_a), d) + 2.0 * to_curve(p_a.distance(rcv), d)
            - to_curve(d_so, d)
            - to_curve(e, d)
            - to_curve(d_or, d)
            - to_curve(d, d)
    };

    sr.d_prime = d_prime;
    segments[0].d_prime = d_spo;
    segments[n - 1].d_prime = d_orp;

    Some(DiffractionTerms {
        delta_h,
        delta_f,
        delta_prime_h,
        delta_s_prime_r_h,
        delta_s_r_prime_h,
        delta_s_prime_r_f,
        delta_s_r_prime_f,
        e,
    })
}

/// Free-field path over an unobstructed profile.
///
/// With diffraction enabled, ground vertices close enough to the sight line for
/// some octave band become `DiffractionHRayleigh` hinges. Returns `None` for a
/// profile without both ends.
pub fn compute_free_field(data: &PropagationData, profile: &CutProfile) -> Option<PropagationPath> {
    let settings = &data.settings;
    let src_cut = profile.source()?;
    let rcv_cut = profile.receiver()?;
    if profile.points.len() < 2 {
        return None;
    }
    let last_cut = profile.points.len() - 1;

    // ground polyline with strictly increasing distances
    let mut ground: Vec<DVec2> = Vec::new();
    let mut cut_index: Vec<usize> = Vec::new();
    for (i, (cut, x)) in profile.points.iter().zip(profile.distances()).enumerate() {
        if cut.kind == CutPointKind::GroundEffect {
            continue;
        }
        let point = DVec2::new(x, cut.z_ground);
        let duplicate = ground.last().is_some_and(|p| p.x >= x);
        if !duplicate {
            ground.push(point);
            cut_index.push(i);
        } else if i == last_cut {
            // the receiver always closes the polyline
            ground.pop();
            cut_index.pop();
            ground.push(point);
            cut_index.push(i);
        }
    }
    if ground.len() < 2 {
        ground.push(DVec2::new(ground.last().map_or(0.0, |p| p.x), rcv_cut.z_ground));
        cut_index.push(last_cut);
    }
    let last = ground.len() - 1;

    let src = DVec2::new(0.0, src_cut.coordinate.z);
    let rcv = DVec2::new(ground[last].x, rcv_cut.coordinate.z);
    let plane = mean_plane_coefficients(&ground);
    let mut sr_segment = compute_segment(src, rcv, plane, profile.g_path(0, last_cut), settings.g_s);

    let mut hinges: Vec<usize> = Vec::new();
    if settings.compute_diffraction {
        for k in 1..last {
            let o = ground[k];
            let delta_h = orientation_index(src, rcv, o) as f64
                * (src.distance(o) + o.distance(rcv) - sr_segment.d);
            if !wavelengths().any(|lambda| delta_h > -lambda / 20.0) {
                continue;
            }
            let seg_so = compute_segment(src, o, mean_plane_coefficients(&ground[..=k]), 0.0, 0.0);
            let seg_or = compute_segment(o, rcv, mean_plane_coefficients(&ground[k..]), 0.0, 0.0);
            let (s_prime, r_prime) = (seg_so.s_prime, seg_or.r_prime);
            let delta_prime_h = orientation_index(s_prime, r_prime, o) as f64
                * (s_prime.distance(o) + o.distance(r_prime) - s_prime.distance(r_prime));
            if wavelengths().any(|lambda| delta_h > lambda / 4.0 - delta_prime_h) {
                hinges.push(k);
            }
        }
    }

    let mut points = vec![end_point(PointKind::Source, src_cut)];
    let mut segments = Vec::new();
    let mut diffraction = None;
    if hinges.is_empty() {
        segments.push(sr_segment.clone());
    } else {
        let nodes: Vec<usize> = std::iter::once(0)
            .chain(hinges.iter().copied())
            .chain(std::iter::once(last))
            .collect();
        for w in nodes.windows(2) {
            let (i0, i1) = (w[0], w[1]);
            let start = if i0 == 0 { src } else { ground[i0] };
            let end = if i1 == last { rcv } else { ground[i1] };
            let g_path = profile.g_path(cut_index[i0], cut_index[i1]);
            segments.push(compute_segment(
                start,
                end,
                mean_plane_coefficients(&ground[i0..=i1]),
                g_path,
                settings.g_s,
            ));
        }
        let hinge_coords: Vec<DVec2> = hinges.iter().map(|&k| ground[k]).collect();
        diffraction = diffraction_terms(&mut sr_segment, &mut segments, &hinge_coords);
        for &k in &hinges {
            let cut = &profile.points[cut_index[k]];
            let coordinate = DVec3::new(cut.coordinate.x, cut.coordinate.y, cut.z_ground);
            points.push(
                PointPath::new(PointKind::DiffractionHRayleigh, coordinate, cut.z_ground)
                    .with_ground_coef(cut.ground_coef),
            );
        }
    }
    points.push(end_point(PointKind::Receiver, rcv_cut));

    let mut path = PropagationPath::new(false, points, segments, sr_segment);
    path.diffraction = diffraction;
    path.difh_points = (1..=hinges.len()).collect();
    Some(path)
}

/// Diffraction over the upper convex envelope of the profile.
///
/// Returns `None` when nothing rises above the sight line.
pub fn compute_h_edge_diffraction(
    data: &PropagationData,
    profile: &CutProfile,
) -> Option<PropagationPath> {
    let settings = &data.settings;
    let distances = profile.distances();
    let mut pts: Vec<DVec2> = Vec::new();
    let mut support: Vec<DVec2> = Vec::new();
    let mut cut_index: Vec<usize> = Vec::new();
    for (i, cut) in profile.points.iter().enumerate() {
        if cut.kind == CutPointKind::GroundEffect {
            continue;
        }
        pts.push(DVec2::new(distances[i], cut.coordinate.z));
        // roofs carry the ground of the segments running over them
        let ground_z = if cut.kind == CutPointKind::Building {
            cut.coordinate.z
        } else {
            cut.z_ground
        };
        support.push(DVec2::new(distances[i], ground_z));
        cut_index.push(i);
    }
    if pts.len() < 3 {
        return None;
    }

    let mut hull: Vec<usize> = Vec::with_capacity(pts.len());
    for k in 0..pts.len() {
        while hull.len() >= 2 {
            let (a, b) = (hull[hull.len() - 2], hull[hull.len() - 1]);
            if orientation_index(pts[a], pts[k], pts[b]) > 0 {
                break;
            }
            hull.pop();
        }
        hull.push(k);
    }
    if hull.len() < 3 {
        return None;
    }

    let last = pts.len() - 1;
    let mut sr_segment = compute_segment(
        pts[0],
        pts[last],
        mean_plane_coefficients(&support),
        profile.g_path(0, cut_index[last]),
        settings.g_s,
    );
    let mut segments: Vec<SegmentPath> = hull
        .windows(2)
        .map(|w| {
            let (i0, i1) = (w[0], w[1]);
            compute_segment(
                pts[i0],
                pts[i1],
                mean_plane_coefficients(&support[i0..=i1]),
                profile.g_path(cut_index[i0], cut_index[i1]),
                settings.g_s,
            )
        })
        .collect();
    let hinge_ids = &hull[1..hull.len() - 1];
    let hinge_coords: Vec<DVec2> = hinge_ids.iter().map(|&k| pts[k]).collect();
    let diffraction = diffraction_terms(&mut sr_segment, &mut segments, &hinge_coords);

    let src_cut = profile.source()?;
    let rcv_cut = profile.receiver()?;
    let mut points = vec![end_point(PointKind::Source, src_cut)];
    for &k in hinge_ids {
        let cut = &profile.points[cut_index[k]];
        let height = cut
            .building_id
            .and_then(|id| data.scene.building(id))
            .map(|b| b.height);
        points.push(
            PointPath::new(PointKind::DiffractionH, cut.coordinate, cut.z_ground)
                .with_ground_coef(cut.ground_coef)
                .with_absorption(cut.absorption.clone())
                .with_building(cut.building_id, height)
                .with_wall(cut.wall_id),
        );
    }
    points.push(end_point(PointKind::Receiver, rcv_cut));

    let mut path = PropagationPath::new(true, points, segments, sr_segment);
    path.diffraction = diffraction;
    path.difh_points = (1..=hinge_ids.len()).collect();
    Some(path)
}

/// Direct paths from `src` to `rcv`: the free-field path when the line of sight
/// is clear, diffracted variants otherwise.
pub fn direct_path(data: &PropagationData, src: DVec3, rcv: DVec3) -> Result<Vec<PropagationPath>> {
    let settings = &data.settings;
    let profile = data.scene.profile(src, rcv, settings.g_s)?;
    let mut paths = Vec::new();
    if profile.is_free_field() {
        paths.extend(compute_free_field(data, &profile));
    } else if settings.compute_diffraction {
        if settings.compute_horizontal_diffraction {
            paths.extend(compute_h_edge_diffraction(data, &profile));
        }
        if settings.compute_vertical_diffraction {
            for side in [Side::Left, Side::Right] {
                paths.extend(compute_v_edge_diffraction(data, src, rcv, side)?);
            }
        }
    }
    Ok(paths)
}
