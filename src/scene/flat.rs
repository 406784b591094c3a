use std::f64::consts::TAU;

use geo::{BoundingRect, Contains, LineString, Point, Polygon};

use super::{
    Building, CutPoint, CutPointKind, CutProfile, SurfaceMaterial, TerrainModel, VisitControl,
    Wall, WallKind,
};
use crate::error::{PathfinderError, Result};
use crate::math::{DVec2, DVec3, EPSILON, segment_intersection};

/// Outward shift applied to building corners so that hull edges clear the roof.
pub const WIDE_ANGLE_TRANSLATION_EPSILON: f64 = 0.01;

/// Area with its own ground coefficient.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundZone {
    pub area: Polygon<f64>,
    pub ground_coef: f64,
}

/// In-memory scene over horizontal ground.
///
/// Building facades are registered as walls when the building is added, so wall
/// ids and building ids are stable for the lifetime of the scene.
#[derive(Debug, Clone, Default)]
pub struct FlatScene {
    ground_z: f64,
    buildings: Vec<Building>,
    walls: Vec<Wall>,
    ground_zones: Vec<GroundZone>,
}

fn polygon_from(points: &[DVec2]) -> Polygon<f64> {
    let ring: Vec<(f64, f64)> = points.iter().map(|p| (p.x, p.y)).collect();
    Polygon::new(LineString::from(ring), vec![])
}

fn ring_edges(ring: &[DVec2]) -> impl Iterator<Item = (DVec2, DVec2)> + '_ {
    (0..ring.len()).map(move |i| (ring[i], ring[(i + 1) % ring.len()]))
}

fn signed_area(ring: &[DVec2]) -> f64 {
    ring_edges(ring).map(|(a, b)| a.perp_dot(b)).sum::<f64>() / 2.0
}

fn boxes_overlap(min_a: DVec2, max_a: DVec2, min_b: DVec2, max_b: DVec2) -> bool {
    min_a.x <= max_b.x && max_a.x >= min_b.x && min_a.y <= max_b.y && max_a.y >= min_b.y
}

impl FlatScene {
    pub fn new(ground_z: f64) -> Self {
        Self {
            ground_z,
            ..Default::default()
        }
    }

    pub fn ground_z(&self) -> f64 {
        self.ground_z
    }

    pub fn buildings(&self) -> &[Building] {
        &self.buildings
    }

    /// Adds a flat-roofed building and its facades. Returns the building id.
    pub fn add_building(
        &mut self,
        footprint: &[DVec2],
        height: f64,
        material: SurfaceMaterial,
    ) -> Result<usize> {
        if footprint.len() < 3 {
            return Err(PathfinderError::Scene(
                "building footprint needs at least 3 vertices".to_string(),
            ));
        }
        if !(height > 0.0) {
            return Err(PathfinderError::Scene(format!(
                "building height must be positive, got {height}"
            )));
        }
        material
            .validate()
            .map_err(|e| PathfinderError::Scene(e.to_string()))?;

        let id = self.buildings.len();
        let roof_z = self.ground_z + height;
        let building = Building {
            footprint: polygon_from(footprint),
            height,
            roof_z,
            material,
        };
        for (a, b) in ring_edges(&building.ring()) {
            self.walls.push(Wall {
                p0: a.extend(roof_z),
                p1: b.extend(roof_z),
                kind: WallKind::Building,
                building_id: Some(id),
                material,
            });
        }
        self.buildings.push(building);
        Ok(id)
    }

    /// Adds a free-standing wall. Returns the wall id.
    pub fn add_wall(
        &mut self,
        p0: DVec2,
        p1: DVec2,
        height: f64,
        material: SurfaceMaterial,
    ) -> Result<usize> {
        if p0 == p1 || !(height > 0.0) {
            return Err(PathfinderError::Scene(
                "wall needs two distinct ends and a positive height".to_string(),
            ));
        }
        material
            .validate()
            .map_err(|e| PathfinderError::Scene(e.to_string()))?;
        let top = self.ground_z + height;
        self.walls.push(Wall {
            p0: p0.extend(top),
            p1: p1.extend(top),
            kind: WallKind::Free,
            building_id: None,
            material,
        });
        Ok(self.walls.len() - 1)
    }

    pub fn add_ground_zone(&mut self, area: &[DVec2], ground_coef: f64) -> Result<()> {
        if area.len() < 3 || !(0.0..=1.0).contains(&ground_coef) {
            return Err(PathfinderError::Scene(
                "ground zone needs 3 vertices and a coefficient within [0, 1]".to_string(),
            ));
        }
        self.ground_zones.push(GroundZone {
            area: polygon_from(area),
            ground_coef,
        });
        Ok(())
    }

    fn ground_coef_at(&self, p: DVec2, default: f64) -> f64 {
        let point = Point::new(p.x, p.y);
        self.ground_zones
            .iter()
            .find(|zone| zone.area.contains(&point))
            .map_or(default, |zone| zone.ground_coef)
    }

    fn crossings(a: DVec2, b: DVec2, ring: &[DVec2]) -> Vec<f64> {
        let mut ts: Vec<f64> = Vec::new();
        for (c0, c1) in ring_edges(ring) {
            if let Some((t, _)) = segment_intersection(a, b, c0, c1) {
                if !ts.iter().any(|x| (x - t).abs() < EPSILON) {
                    ts.push(t);
                }
            }
        }
        ts
    }
}

impl TerrainModel for FlatScene {
    fn profile(&self, from: DVec3, to: DVec3, ground_coef: f64) -> Result<CutProfile> {
        let (a, b) = (from.truncate(), to.truncate());
        let ground = self.ground_z;
        let mut cuts: Vec<(f64, CutPoint)> = Vec::new();

        for (id, building) in self.buildings.iter().enumerate() {
            for t in Self::crossings(a, b, &building.ring()) {
                let p = a.lerp(b, t).extend(building.roof_z);
                let cut = CutPoint::new(CutPointKind::Building, p, ground)
                    .with_building(id)
                    .with_absorption(building.material.to_vec());
                cuts.push((t, cut));
            }
        }

        for (id, wall) in self.walls.iter().enumerate() {
            if wall.kind != WallKind::Free {
                continue;
            }
            let (w0, w1) = wall.line();
            if let Some((t, _)) = segment_intersection(a, b, w0, w1) {
                let p = a.lerp(b, t);
                let cut = CutPoint::new(CutPointKind::Wall, p.extend(wall.top_z_at(p)), ground)
                    .with_wall(id)
                    .with_absorption(wall.material.to_vec());
                cuts.push((t, cut));
            }
        }

        for zone in &self.ground_zones {
            let ring: Vec<DVec2> = zone
                .area
                .exterior()
                .0
                .iter()
                .map(|c| DVec2::new(c.x, c.y))
                .collect();
            for t in Self::crossings(a, b, &ring) {
                let p = a.lerp(b, t).extend(ground);
                cuts.push((t, CutPoint::new(CutPointKind::GroundEffect, p, ground)));
            }
        }

        cuts.sort_by(|x, y| x.0.total_cmp(&y.0));
        let mut points = Vec::with_capacity(cuts.len() + 2);
        points.push(CutPoint::new(CutPointKind::Source, from, ground));
        points.extend(cuts.into_iter().map(|(_, cut)| cut));
        points.push(CutPoint::new(CutPointKind::Receiver, to, ground));

        let coefs: Vec<f64> = points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let here = p.coordinate.truncate();
                let next = points.get(i + 1).map_or(here, |n| n.coordinate.truncate());
                self.ground_coef_at((here + next) / 2.0, ground_coef)
            })
            .collect();
        for (point, coef) in points.iter_mut().zip(coefs) {
            point.ground_coef = coef;
        }
        Ok(CutProfile::new(points))
    }

    fn z_ground(&self, _point: DVec3) -> f64 {
        self.ground_z
    }

    fn buildings_on_path(
        &self,
        from: DVec3,
        to: DVec3,
        visitor: &mut dyn FnMut(usize) -> VisitControl,
    ) -> Result<()> {
        let (min, max) = (from.truncate().min(to.truncate()), from.truncate().max(to.truncate()));
        for (id, building) in self.buildings.iter().enumerate() {
            let Some(rect) = building.footprint.bounding_rect() else {
                continue;
            };
            let (rmin, rmax) = (
                DVec2::new(rect.min().x, rect.min().y),
                DVec2::new(rect.max().x, rect.max().y),
            );
            if boxes_overlap(min, max, rmin, rmax) && visitor(id) == VisitControl::Stop {
                break;
            }
        }
        Ok(())
    }

    fn walls_on_path(
        &self,
        from: DVec3,
        to: DVec3,
        visitor: &mut dyn FnMut(usize) -> VisitControl,
    ) -> Result<()> {
        let (min, max) = (from.truncate().min(to.truncate()), from.truncate().max(to.truncate()));
        for (id, wall) in self.walls.iter().enumerate() {
            if wall.kind != WallKind::Free {
                continue;
            }
            let (w0, w1) = wall.line();
            if boxes_overlap(min, max, w0.min(w1), w0.max(w1)) && visitor(id) == VisitControl::Stop
            {
                break;
            }
        }
        Ok(())
    }

    fn wall(&self, id: usize) -> Option<&Wall> {
        self.walls.get(id)
    }

    fn building(&self, id: usize) -> Option<&Building> {
        self.buildings.get(id)
    }

    fn processed_walls(&self) -> &[Wall] {
        &self.walls
    }

    fn wide_angle_points_by_building(
        &self,
        id: usize,
        angle_from: f64,
        angle_to: f64,
    ) -> Vec<DVec3> {
        let Some(building) = self.buildings.get(id) else {
            return Vec::new();
        };
        let ring = building.ring();
        let n = ring.len();
        if n < 3 {
            return Vec::new();
        }
        let ccw = signed_area(&ring) > 0.0;
        let outward = |a: DVec2, b: DVec2| {
            let d = (b - a).normalize_or_zero();
            if ccw {
                DVec2::new(d.y, -d.x)
            } else {
                DVec2::new(-d.y, d.x)
            }
        };

        let mut points = Vec::with_capacity(n + 1);
        for i in 0..n {
            let (prev, v, next) = (ring[(i + n - 1) % n], ring[i], ring[(i + 1) % n]);
            let (to_prev, to_next) = (prev - v, next - v);
            let (from_dir, to_dir) = if ccw { (to_next, to_prev) } else { (to_prev, to_next) };
            let mut interior = from_dir.perp_dot(to_dir).atan2(from_dir.dot(to_dir));
            if interior < 0.0 {
                interior += TAU;
            }
            let exterior = TAU - interior;
            if exterior < angle_from || exterior > angle_to {
                continue;
            }
            let shift = (outward(prev, v) + outward(v, next)).normalize_or_zero();
            points.push((v + shift * WIDE_ANGLE_TRANSLATION_EPSILON).extend(building.roof_z));
        }
        if let Some(first) = points.first().copied() {
            points.push(first);
        }
        points
    }
}
