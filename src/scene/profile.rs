//! Vertical cut profiles between two scene points.

use crate::math::{DVec3, EPSILON};

/// What a cut point represents along the profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CutPointKind {
    Source,
    Receiver,
    /// Change of terrain slope.
    Topography,
    /// Crossing of a building footprint, at roof altitude.
    Building,
    /// Crossing of a free-standing wall, at its top altitude.
    Wall,
    /// Change of ground coefficient.
    GroundEffect,
}

/// One point of a [`CutProfile`].
#[derive(Debug, Clone, PartialEq)]
pub struct CutPoint {
    pub kind: CutPointKind,
    pub coordinate: DVec3,
    /// Ground altitude below the point.
    pub z_ground: f64,
    /// Ground coefficient from this point up to the next one.
    pub ground_coef: f64,
    /// Absorption spectrum of the crossed building or wall, empty otherwise.
    pub absorption: Vec<f64>,
    pub building_id: Option<usize>,
    pub wall_id: Option<usize>,
}

impl CutPoint {
    pub fn new(kind: CutPointKind, coordinate: DVec3, z_ground: f64) -> Self {
        Self {
            kind,
            coordinate,
            z_ground,
            ground_coef: 0.0,
            absorption: Vec::new(),
            building_id: None,
            wall_id: None,
        }
    }

    pub fn with_ground_coef(mut self, ground_coef: f64) -> Self {
        self.ground_coef = ground_coef;
        self
    }

    pub fn with_absorption(mut self, absorption: Vec<f64>) -> Self {
        self.absorption = absorption;
        self
    }

    pub fn with_building(mut self, building_id: usize) -> Self {
        self.building_id = Some(building_id);
        self
    }

    pub fn with_wall(mut self, wall_id: usize) -> Self {
        self.wall_id = Some(wall_id);
        self
    }

    fn is_obstacle(&self) -> bool {
        matches!(
            self.kind,
            CutPointKind::Building | CutPointKind::Wall | CutPointKind::Topography
        )
    }
}

/// Ordered points along the vertical plane from a source to a receiver.
///
/// The first point is the source, the last the receiver.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CutProfile {
    pub points: Vec<CutPoint>,
}

impl CutProfile {
    pub fn new(points: Vec<CutPoint>) -> Self {
        Self { points }
    }

    pub fn source(&self) -> Option<&CutPoint> {
        self.points.first()
    }

    pub fn receiver(&self) -> Option<&CutPoint> {
        self.points.last()
    }

    /// Height of the straight source-receiver line above the horizontal position of `p`.
    fn sight_line_z(&self, p: DVec3) -> Option<f64> {
        let src = self.source()?.coordinate;
        let rcv = self.receiver()?.coordinate;
        let length = src.truncate().distance(rcv.truncate());
        if length == 0.0 {
            return Some(src.z.max(rcv.z));
        }
        let t = src.truncate().distance(p.truncate()) / length;
        Some(src.z + (rcv.z - src.z) * t)
    }

    fn above_sight_line(&self, point: &CutPoint) -> bool {
        self.sight_line_z(point.coordinate)
            .is_some_and(|z| point.coordinate.z > z + EPSILON)
    }

    /// True when nothing rises above the straight source-receiver line.
    pub fn is_free_field(&self) -> bool {
        !self
            .points
            .iter()
            .any(|p| p.is_obstacle() && self.above_sight_line(p))
    }

    pub fn intersects_building(&self) -> bool {
        self.points.iter().any(|p| {
            matches!(p.kind, CutPointKind::Building | CutPointKind::Wall) && self.above_sight_line(p)
        })
    }

    pub fn intersects_topography(&self) -> bool {
        self.points
            .iter()
            .any(|p| p.kind == CutPointKind::Topography && self.above_sight_line(p))
    }

    /// Length-weighted mean ground coefficient between points `i0` and `i1`.
    pub fn g_path(&self, i0: usize, i1: usize) -> f64 {
        let (Some(start), Some(end)) = (self.points.get(i0), self.points.get(i1)) else {
            return 0.0;
        };
        let total = start.coordinate.truncate().distance(end.coordinate.truncate());
        if total == 0.0 || i1 <= i0 {
            return start.ground_coef;
        }
        let weighted: f64 = self.points[i0..=i1]
            .windows(2)
            .map(|w| {
                let length = w[0].coordinate.truncate().distance(w[1].coordinate.truncate());
                length * w[0].ground_coef
            })
            .sum();
        weighted / total
    }

    /// Ground coefficient of the whole profile.
    pub fn g_path_total(&self) -> f64 {
        self.g_path(0, self.points.len().saturating_sub(1))
    }

    /// Horizontal distance of every point from the source.
    pub fn distances(&self) -> Vec<f64> {
        let Some(origin) = self.source().map(|p| p.coordinate.truncate()) else {
            return Vec::new();
        };
        self.points
            .iter()
            .map(|p| origin.distance(p.coordinate.truncate()))
            .collect()
    }
}
