use std::collections::HashSet;
use std::f64::consts::TAU;

use geo::{ConvexHull, Coord, Intersects, Line, MultiPoint, Point};

use crate::error::Result;
use crate::math::{DVec2, DVec3, segment_intersection};
use crate::scene::{TerrainModel, VisitControl};

/// Lateral paths longer than this multiple of the direct distance are dropped.
pub const MAX_RATIO_HULL_DIRECT_PATH: f64 = 4.0;

/// Side of the directed source-receiver line a lateral path passes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

/// Plane through `p1` and `p2` containing the horizontal direction
/// perpendicular to them. Obstacles are cut at its altitude.
#[derive(Debug, Clone, Copy)]
struct SightPlane {
    origin: DVec3,
    direction: DVec2,
    length_squared: f64,
    rise: f64,
}

impl SightPlane {
    fn new(p1: DVec3, p2: DVec3) -> Self {
        let direction = p2.truncate() - p1.truncate();
        Self {
            origin: p1,
            direction,
            length_squared: direction.length_squared(),
            rise: p2.z - p1.z,
        }
    }

    fn z_at(&self, p: DVec2) -> f64 {
        if self.length_squared == 0.0 {
            return self.origin.z;
        }
        let t = (p - self.origin.truncate()).dot(self.direction) / self.length_squared;
        self.origin.z + self.rise * t
    }

    /// Parts of the polyline `roof` rising above the plane, projected on it.
    fn cut(&self, roof: &[DVec3]) -> Vec<DVec3> {
        let on_plane = |p: DVec2| p.extend(self.z_at(p));
        let mut points = Vec::new();
        let mut previous: Option<(DVec3, f64)> = None;
        for &p in roof {
            let offset = p.z - self.z_at(p.truncate());
            if let Some((prev, prev_offset)) = previous {
                if (prev_offset > 0.0 && offset < 0.0) || (prev_offset < 0.0 && offset > 0.0) {
                    let f = prev_offset / (prev_offset - offset);
                    points.push(on_plane(prev.truncate().lerp(p.truncate(), f)));
                }
            }
            if offset >= 0.0 {
                points.push(on_plane(p.truncate()));
            }
            previous = Some((p, offset));
        }
        points
    }
}

fn coord(p: DVec2) -> Coord<f64> {
    Coord { x: p.x, y: p.y }
}

fn edge_key(a: DVec2, b: DVec2) -> [u64; 4] {
    [a.x.to_bits(), a.y.to_bits(), b.x.to_bits(), b.y.to_bits()]
}

fn signed_area(ring: &[DVec2]) -> f64 {
    (0..ring.len())
        .map(|i| ring[i].perp_dot(ring[(i + 1) % ring.len()]))
        .sum::<f64>()
        / 2.0
}

/// Counter-clockwise convex hull ring, without the closing point.
fn convex_hull(points: &[DVec3]) -> Vec<DVec2> {
    let multi: MultiPoint<f64> = points.iter().map(|p| Point::new(p.x, p.y)).collect();
    let hull = multi.convex_hull();
    let mut ring: Vec<DVec2> = hull
        .exterior()
        .0
        .iter()
        .map(|c| DVec2::new(c.x, c.y))
        .collect();
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    if signed_area(&ring) < 0.0 {
        ring.reverse();
    }
    ring
}

fn ring_perimeter(ring: &[DVec2]) -> f64 {
    (0..ring.len())
        .map(|i| ring[i].distance(ring[(i + 1) % ring.len()]))
        .sum()
}

/// Obstacles already contributing points to the hull.
struct HullInput {
    plane: SightPlane,
    points: Vec<DVec3>,
    buildings: HashSet<usize>,
    walls: HashSet<usize>,
}

impl HullInput {
    fn push(&mut self, silhouette: Vec<DVec3>) {
        for p in silhouette {
            if !self.points.iter().any(|q| q.truncate() == p.truncate()) {
                self.points.push(p);
            }
        }
    }

    fn building_silhouette(&self, scene: &dyn TerrainModel, id: usize, a: DVec2, b: DVec2) -> Vec<DVec3> {
        let crosses = scene
            .building(id)
            .is_some_and(|building| Line::new(coord(a), coord(b)).intersects(&building.footprint));
        if !crosses {
            return Vec::new();
        }
        self.plane.cut(&scene.wide_angle_points_by_building(id, 0.0, TAU))
    }

    fn wall_silhouette(&self, scene: &dyn TerrainModel, id: usize, a: DVec2, b: DVec2) -> Vec<DVec3> {
        let Some(wall) = scene.wall(id) else {
            return Vec::new();
        };
        let (w0, w1) = wall.line();
        if segment_intersection(a, b, w0, w1).is_none() {
            return Vec::new();
        }
        self.plane.cut(&[wall.p0, wall.p1])
    }

    /// Adds every obstacle crossing `a-b`.
    fn seed(&mut self, scene: &dyn TerrainModel, a: DVec3, b: DVec3) -> Result<()> {
        let mut ids = Vec::new();
        scene.buildings_on_path(a, b, &mut |id| {
            ids.push(id);
            VisitControl::Continue
        })?;
        for id in ids {
            let silhouette = self.building_silhouette(scene, id, a.truncate(), b.truncate());
            if !silhouette.is_empty() {
                self.buildings.insert(id);
                self.push(silhouette);
            }
        }
        let mut ids = Vec::new();
        scene.walls_on_path(a, b, &mut |id| {
            ids.push(id);
            VisitControl::Continue
        })?;
        for id in ids {
            let silhouette = self.wall_silhouette(scene, id, a.truncate(), b.truncate());
            if !silhouette.is_empty() {
                self.walls.insert(id);
                self.push(silhouette);
            }
        }
        Ok(())
    }

    /// Adds the first obstacle crossing `a-b` that is not in the hull yet.
    /// Returns whether one was found.
    fn insert_first_obstacle(&mut self, scene: &dyn TerrainModel, a: DVec2, b: DVec2) -> Result<bool> {
        let (from, to) = (a.extend(0.0), b.extend(0.0));
        let mut found: Option<(bool, usize, Vec<DVec3>)> = None;
        scene.buildings_on_path(from, to, &mut |id| {
            if self.buildings.contains(&id) {
                return VisitControl::Continue;
            }
            let silhouette = self.building_silhouette(scene, id, a, b);
            if silhouette.is_empty() {
                return VisitControl::Continue;
            }
            found = Some((true, id, silhouette));
            VisitControl::Stop
        })?;
        if found.is_none() {
            scene.walls_on_path(from, to, &mut |id| {
                if self.walls.contains(&id) {
                    return VisitControl::Continue;
                }
                let silhouette = self.wall_silhouette(scene, id, a, b);
                if silhouette.is_empty() {
                    return VisitControl::Continue;
                }
                found = Some((false, id, silhouette));
                VisitControl::Stop
            })?;
        }
        let Some((is_building, id, silhouette)) = found else {
            return Ok(false);
        };
        if is_building {
            self.buildings.insert(id);
        } else {
            self.walls.insert(id);
        }
        self.push(silhouette);
        Ok(true)
    }
}

/// Shortest unobstructed polyline from `p1` to `p2` passing on `side` of the
/// obstacles met, from `p1` to `p2`.
///
/// Intermediate points lie on the sight plane between `p1` and `p2`. Returns an
/// empty path when the ends coincide, when an end drops out of the hull, or
/// when the hull perimeter exceeds [`MAX_RATIO_HULL_DIRECT_PATH`] times the
/// direct distance.
pub fn compute_side_hull(
    scene: &dyn TerrainModel,
    side: Side,
    p1: DVec3,
    p2: DVec3,
) -> Result<Vec<DVec3>> {
    let (a, b) = (p1.truncate(), p2.truncate());
    if a == b {
        return Ok(Vec::new());
    }
    let direct = a.distance(b);
    let mut input = HullInput {
        plane: SightPlane::new(p1, p2),
        points: vec![p1, p2],
        buildings: HashSet::new(),
        walls: HashSet::new(),
    };
    input.seed(scene, p1, p2)?;

    let mut clear_edges: HashSet<[u64; 4]> = HashSet::new();
    loop {
        let mut hull = convex_hull(&input.points);
        let ratio = ring_perimeter(&hull) / direct;
        if ratio > MAX_RATIO_HULL_DIRECT_PATH {
            log::trace!("Side hull dropped, perimeter is {:.1} times the direct path", ratio);
            return Ok(Vec::new());
        }
        let Some(start) = hull.iter().position(|&c| c == a) else {
            return Ok(Vec::new());
        };
        hull.rotate_left(start);
        let Some(end) = hull.iter().position(|&c| c == b) else {
            return Ok(Vec::new());
        };
        // a counter-clockwise walk from p1 keeps the obstacles on its left
        let chain: Vec<DVec2> = match side {
            Side::Right => hull[..=end].to_vec(),
            Side::Left => std::iter::once(hull[0])
                .chain(hull[end..].iter().rev().copied())
                .collect(),
        };

        let mut obstructed = false;
        for w in chain.windows(2) {
            let key = edge_key(w[0], w[1]);
            if clear_edges.contains(&key) {
                continue;
            }
            if input.insert_first_obstacle(scene, w[0], w[1])? {
                obstructed = true;
                break;
            }
            clear_edges.insert(key);
        }
        if obstructed {
            continue;
        }

        let mut path = Vec::with_capacity(chain.len());
        for c in chain {
            let Some(p) = input.points.iter().find(|p| p.truncate() == c) else {
                return Ok(Vec::new());
            };
            if !p.z.is_finite() {
                return Ok(Vec::new());
            }
            path.push(*p);
        }
        return Ok(path);
    }
}
