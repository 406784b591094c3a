use crate::data::PropagationData;
use crate::error::Result;
use crate::math::{DVec2, DVec3, segment_distance, segment_intersection};
use crate::mean_plane::compute_segment;
use crate::path::{PointKind, PointPath, PropagationPath};
use crate::scene::{TerrainModel, Wall, WallKind};

use super::direct::compute_free_field;
use super::vertical::UnfoldedPath;

/// Distance reflection points are moved away from their wall.
pub const REFLECTION_NUDGE: f64 = 0.01;

/// Image of the receiver across a wall.
///
/// Mirrors form chains through `parent`, from the image of the receiver
/// across the wall reached last by the sound (no parent) up to the wall
/// reached first. `depth` is the number of walls in the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorReceiver {
    pub position: DVec3,
    /// Index of the parent mirror in the list returned by [`mirror_receivers`].
    pub parent: Option<usize>,
    pub wall_id: usize,
    pub building_id: Option<usize>,
    pub depth: usize,
}

/// Reflection of `p` across the vertical plane through `a-b`. Keeps `p.z`.
fn mirror(p: DVec3, a: DVec2, b: DVec2) -> DVec3 {
    let dir = b - a;
    let length_squared = dir.length_squared();
    if length_squared == 0.0 {
        return p;
    }
    let foot = a + dir * ((p.truncate() - a).dot(dir) / length_squared);
    (foot * 2.0 - p.truncate()).extend(p.z)
}

/// True when another facade of the same building stands between `src` and the
/// point where the ray `src-target` meets the wall at fraction `t_wall`.
fn is_masked(scene: &dyn TerrainModel, wall_id: usize, wall: &Wall, src: DVec3, target: DVec3, t_wall: f64) -> bool {
    let Some(building_id) = wall.building_id else {
        return false;
    };
    let (a, b) = (src.truncate(), target.truncate());
    scene
        .processed_walls()
        .iter()
        .enumerate()
        .filter(|(id, other)| *id != wall_id && other.building_id == Some(building_id))
        .any(|(_, other)| {
            let (w0, w1) = other.line();
            segment_intersection(a, b, w0, w1).is_some_and(|(t, _)| {
                let p = a.lerp(b, t);
                t < t_wall && other.top_z_at(p) > src.z + (target.z - src.z) * t
            })
        })
}

/// Builds every chain of mirror receivers over `walls`, up to the configured
/// reflection order.
///
/// A mirror is kept only if the line from `src` to it crosses its wall within
/// the source distance and is not masked by the rest of the building. A wall
/// is never mirrored twice in a row.
pub fn mirror_receivers(
    data: &PropagationData,
    walls: &[usize],
    src: DVec3,
    rcv: DVec3,
) -> Vec<MirrorReceiver> {
    let order = data.settings.reflexion_order;
    let scene = data.scene.as_ref();
    let mut mirrors: Vec<MirrorReceiver> = Vec::new();
    if order == 0 {
        return mirrors;
    }
    let mut pending: Vec<(Option<usize>, DVec3, usize)> = vec![(None, rcv, 1)];
    while let Some((parent, image, depth)) = pending.pop() {
        let parent_wall = parent.map(|p| mirrors[p].wall_id);
        for &wall_id in walls {
            if parent_wall == Some(wall_id) {
                continue;
            }
            let Some(wall) = scene.wall(wall_id) else {
                continue;
            };
            let (w0, w1) = wall.line();
            let position = mirror(image, w0, w1);
            if src.truncate().distance(position.truncate()) > data.settings.max_src_dist {
                continue;
            }
            let Some((t, _)) = segment_intersection(src.truncate(), position.truncate(), w0, w1)
            else {
                continue;
            };
            if is_masked(scene, wall_id, wall, src, position, t) {
                continue;
            }
            mirrors.push(MirrorReceiver {
                position,
                parent,
                wall_id,
                building_id: wall.building_id,
                depth,
            });
            if depth < order {
                pending.push((Some(mirrors.len() - 1), position, depth + 1));
            }
        }
    }
    mirrors
}

/// Reflection vertex found while walking a mirror chain.
struct Bounce {
    coordinate: DVec3,
    wall_id: usize,
}

/// Walks the chain ending at `mirrors[leaf]` from `src`, returning one vertex per
/// wall, or `None` as soon as a hop misses its wall or leaves the wall height.
fn trace_chain(
    scene: &dyn TerrainModel,
    mirrors: &[MirrorReceiver],
    leaf: usize,
    src: DVec3,
) -> Option<Vec<Bounce>> {
    let mut bounces = Vec::with_capacity(mirrors[leaf].depth);
    let mut from = src;
    let mut current = Some(leaf);
    while let Some(index) = current {
        let mirror = &mirrors[index];
        let wall = scene.wall(mirror.wall_id)?;
        let (w0, w1) = wall.line();
        let target = mirror.position;
        let (t, _) = segment_intersection(from.truncate(), target.truncate(), w0, w1)?;
        let hit = from.truncate().lerp(target.truncate(), t);

        let normal = (w1 - w0).perp().normalize_or_zero();
        let towards_from = if (from.truncate() - hit).dot(normal) >= 0.0 {
            normal
        } else {
            -normal
        };
        let point = hit + towards_from * REFLECTION_NUDGE;
        let z = from.z + (target.z - from.z) * t;
        let coordinate = point.extend(z);
        if !(z > scene.z_ground(coordinate) && z < wall.top_z_at(hit)) {
            return None;
        }
        bounces.push(Bounce {
            coordinate,
            wall_id: mirror.wall_id,
        });
        from = coordinate;
        current = mirror.parent;
    }
    Some(bounces)
}

/// Specular reflection paths from `src` to `rcv` on building facades near the
/// straight line between them.
///
/// Returns nothing when the reflection order is zero. A chain is dropped as a
/// whole when any of its legs is blocked by buildings or topography.
pub fn compute_reflexion(
    data: &PropagationData,
    src: DVec3,
    rcv: DVec3,
    favorable: bool,
) -> Result<Vec<PropagationPath>> {
    let settings = &data.settings;
    if settings.reflexion_order == 0 {
        return Ok(Vec::new());
    }
    let scene = data.scene.as_ref();
    let (a, b) = (src.truncate(), rcv.truncate());
    let candidates: Vec<usize> = scene
        .processed_walls()
        .iter()
        .enumerate()
        .filter(|(_, wall)| wall.kind == WallKind::Building)
        .filter(|(_, wall)| {
            let (w0, w1) = wall.line();
            segment_distance(a, b, w0, w1) < settings.max_ref_dist
        })
        .map(|(id, _)| id)
        .collect();
    let mirrors = mirror_receivers(data, &candidates, src, rcv);

    let mut paths = Vec::new();
    for leaf in 0..mirrors.len() {
        let Some(bounces) = trace_chain(scene, &mirrors, leaf, src) else {
            continue;
        };
        let coords: Vec<DVec3> = std::iter::once(src)
            .chain(bounces.iter().map(|b| b.coordinate))
            .chain(std::iter::once(rcv))
            .collect();
        let unfolded = UnfoldedPath::new(data, &coords)?;
        let blocked = unfolded
            .leg_profiles
            .iter()
            .any(|p| p.intersects_building() || p.intersects_topography());
        if blocked {
            continue;
        }
        if let Some(path) = assemble(data, &bounces, &unfolded, favorable) {
            log::trace!(
                "reflection path over {} wall(s) between {:?} and {:?}",
                bounces.len(),
                src,
                rcv
            );
            paths.push(path);
        }
    }
    Ok(paths)
}

/// Joins the free-field legs of a reflection chain into one path.
fn assemble(
    data: &PropagationData,
    bounces: &[Bounce],
    unfolded: &UnfoldedPath,
    favorable: bool,
) -> Option<PropagationPath> {
    let scene = data.scene.as_ref();
    let mut points = Vec::new();
    let mut segments = Vec::new();
    let mut difh_points = Vec::new();
    let last_leg = unfolded.leg_profiles.len().saturating_sub(1);
    for (k, profile) in unfolded.leg_profiles.iter().enumerate() {
        let sub = compute_free_field(data, profile)?;
        let n = sub.points.len();
        if k == 0 {
            points.push(sub.points[0].clone());
        } else {
            let bounce = &bounces[k - 1];
            let wall = scene.wall(bounce.wall_id)?;
            let height = wall
                .building_id
                .and_then(|id| scene.building(id))
                .map(|building| building.height);
            points.push(
                PointPath::new(
                    PointKind::Reflection,
                    bounce.coordinate,
                    scene.z_ground(bounce.coordinate),
                )
                .with_ground_coef(sub.points[0].ground_coef)
                .with_absorption(wall.material.to_vec())
                .with_building(wall.building_id, height)
                .with_wall(Some(bounce.wall_id)),
            );
        }
        for i in 1..n - 1 {
            if sub.points[i].kind == PointKind::DiffractionHRayleigh
                || sub.points[i].kind == PointKind::DiffractionH
            {
                difh_points.push(points.len());
            }
            points.push(sub.points[i].clone());
        }
        if k == last_leg {
            points.push(sub.points[n - 1].clone());
        }
        segments.extend(sub.segments);
    }

    let interior_ok = points[1..points.len() - 1]
        .iter()
        .filter(|p| p.kind == PointKind::Reflection)
        .all(|p| {
            let top = p
                .wall_id
                .and_then(|id| scene.wall(id))
                .map_or(f64::NEG_INFINITY, |w| w.top_z_at(p.coordinate.truncate()));
            p.coordinate.z > p.altitude && p.coordinate.z < top
        });
    if points.len() <= 2 || !interior_ok {
        return None;
    }

    let (start, end) = (unfolded.points[0], unfolded.points[unfolded.points.len() - 1]);
    let sr_segment = compute_segment(
        start,
        end,
        unfolded.mean_plane(),
        unfolded.g_path,
        data.settings.g_s,
    );
    let mut path = PropagationPath::new(favorable, points, segments, sr_segment);
    path.difh_points = difh_points;
    Some(path)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::PropagationSettings;
    use crate::scene::{FlatScene, SurfaceMaterial};

    fn block(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<DVec2> {
        vec![
            DVec2::new(x0, y0),
            DVec2::new(x1, y0),
            DVec2::new(x1, y1),
            DVec2::new(x0, y1),
        ]
    }

    fn data(scene: FlatScene, order: usize) -> PropagationData {
        let settings = PropagationSettings::default().reflexion_order(order);
        PropagationData::new(Arc::new(scene), settings)
    }

    const SRC: DVec3 = DVec3::new(0.0, 0.0, 1.0);
    const RCV: DVec3 = DVec3::new(100.0, 0.0, 4.0);

    #[test]
    fn test_mirror_across_wall() {
        let p = mirror(DVec3::new(3.0, 1.0, 7.0), DVec2::new(0.0, 5.0), DVec2::new(10.0, 5.0));
        assert_eq!(p, DVec3::new(3.0, 9.0, 7.0));
    }

    #[test]
    fn test_single_facade_reflection() {
        let mut scene = FlatScene::new(0.0);
        scene
            .add_building(&block(30.0, 10.0, 70.0, 20.0), 10.0, SurfaceMaterial::uniform(0.2))
            .unwrap();
        let data = data(scene, 1);
        let paths = compute_reflexion(&data, SRC, RCV, false).unwrap();
        assert_eq!(paths.len(), 1);

        let path = &paths[0];
        assert_eq!(path.reflection_count(), 1);
        assert_eq!(path.points.len(), 3);
        assert_eq!(path.points[0].kind, PointKind::Source);
        assert_eq!(path.points[2].kind, PointKind::Receiver);
        let refl = &path.points[1];
        assert_eq!(refl.kind, PointKind::Reflection);
        assert!((refl.coordinate.x - 50.0).abs() < 1e-6);
        assert!((refl.coordinate.y - (10.0 - REFLECTION_NUDGE)).abs() < 1e-6);
        assert!((refl.coordinate.z - 2.5).abs() < 1e-9);
        assert_eq!(refl.alpha_wall, vec![0.2; 8]);
        assert_eq!(refl.building_id, Some(0));
        assert_eq!(refl.building_height, Some(10.0));
        assert_eq!(path.segments.len(), 2);
    }

    #[test]
    fn test_reflection_legs_match_their_free_field() {
        let mut scene = FlatScene::new(0.0);
        scene
            .add_building(&block(30.0, 10.0, 70.0, 20.0), 10.0, SurfaceMaterial::GENERIC)
            .unwrap();
        let data = data(scene, 1);
        let paths = compute_reflexion(&data, SRC, RCV, false).unwrap();
        assert_eq!(paths.len(), 1);
        let refl = paths[0].points[1].coordinate;
        for (segment, (a, b)) in paths[0].segments.iter().zip([(SRC, refl), (refl, RCV)]) {
            let profile = data.scene.profile(a, b, data.settings.g_s).unwrap();
            let leg = compute_free_field(&data, &profile).unwrap();
            assert_eq!(leg.segments.len(), 1);
            assert!((segment.d - leg.segments[0].d).abs() < 1e-9);
        }
    }

    #[test]
    fn test_zero_order_has_no_reflection() {
        let mut scene = FlatScene::new(0.0);
        scene
            .add_building(&block(30.0, 10.0, 70.0, 20.0), 10.0, SurfaceMaterial::GENERIC)
            .unwrap();
        let data = data(scene, 0);
        assert!(compute_reflexion(&data, SRC, RCV, false).unwrap().is_empty());
        assert!(mirror_receivers(&data, &[0, 1, 2, 3], SRC, RCV).is_empty());
    }

    #[test]
    fn test_street_canyon_respects_order() {
        let mut scene = FlatScene::new(0.0);
        scene
            .add_building(&block(-20.0, 10.0, 120.0, 20.0), 10.0, SurfaceMaterial::GENERIC)
            .unwrap();
        scene
            .add_building(&block(-20.0, -20.0, 120.0, -10.0), 10.0, SurfaceMaterial::GENERIC)
            .unwrap();
        let data = data(scene, 2);
        let paths = compute_reflexion(&data, SRC, RCV, false).unwrap();
        assert!(paths.iter().all(|p| p.reflection_count() <= 2));
        assert!(paths.iter().any(|p| p.reflection_count() == 2));
        assert!(paths.iter().any(|p| p.reflection_count() == 1));
        for path in &paths {
            assert_eq!(path.points.first().map(|p| p.kind), Some(PointKind::Source));
            assert_eq!(path.points.last().map(|p| p.kind), Some(PointKind::Receiver));
            for p in path.points.iter().filter(|p| p.kind == PointKind::Reflection) {
                assert!(p.coordinate.z > 0.0 && p.coordinate.z < 10.0);
            }
        }
    }

    #[test]
    fn test_mirror_chains_never_repeat_a_wall() {
        let mut scene = FlatScene::new(0.0);
        scene
            .add_building(&block(-20.0, 10.0, 120.0, 20.0), 10.0, SurfaceMaterial::GENERIC)
            .unwrap();
        scene
            .add_building(&block(-20.0, -20.0, 120.0, -10.0), 10.0, SurfaceMaterial::GENERIC)
            .unwrap();
        let data = data(scene, 3);
        let walls: Vec<usize> = (0..data.scene.processed_walls().len()).collect();
        let mirrors = mirror_receivers(&data, &walls, SRC, RCV);
        assert!(!mirrors.is_empty());
        for m in &mirrors {
            assert!(m.depth <= 3);
            if let Some(parent) = m.parent {
                assert_ne!(mirrors[parent].wall_id, m.wall_id);
                assert_eq!(mirrors[parent].depth + 1, m.depth);
            } else {
                assert_eq!(m.depth, 1);
            }
        }
    }

    #[test]
    fn test_facade_hidden_by_own_building() {
        let mut scene = FlatScene::new(0.0);
        scene
            .add_building(&block(30.0, 10.0, 70.0, 20.0), 10.0, SurfaceMaterial::GENERIC)
            .unwrap();
        let data = data(scene, 1);
        let walls: Vec<usize> = (0..4).collect();
        let mirrors = mirror_receivers(&data, &walls, SRC, RCV);
        // only the facade facing the street is seen from the source
        assert_eq!(mirrors.len(), 1);
        let (w0, w1) = data.scene.wall(mirrors[0].wall_id).unwrap().line();
        assert_eq!(w0.y, 10.0);
        assert_eq!(w1.y, 10.0);
    }
}
