//! Terrain and building model queried by the path finder.
//!
//! The path finder never owns scene geometry. It asks a [`TerrainModel`] for
//! vertical profiles, ground heights and the obstacles met along a line, so
//! any terrain engine can be plugged in. [`FlatScene`] is a small in-memory
//! implementation used by tests and demos.

mod flat;
pub mod material;
mod profile;

use geo::Polygon;

use crate::error::Result;
use crate::math::{DVec2, DVec3, interpolate_z};

pub use flat::{FlatScene, GroundZone};
pub use material::SurfaceMaterial;
pub use profile::{CutPoint, CutPointKind, CutProfile};

/// Returned by spatial visitors to continue or halt the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitControl {
    Continue,
    Stop,
}

/// A building with a flat roof.
#[derive(Debug, Clone, PartialEq)]
pub struct Building {
    pub footprint: Polygon<f64>,
    /// Height above the ground.
    pub height: f64,
    /// Absolute altitude of the roof.
    pub roof_z: f64,
    pub material: SurfaceMaterial,
}

impl Building {
    /// Footprint vertices without the closing point.
    pub fn ring(&self) -> Vec<DVec2> {
        let coords = &self.footprint.exterior().0;
        let open = coords.len().saturating_sub(1);
        coords[..open].iter().map(|c| DVec2::new(c.x, c.y)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WallKind {
    /// Facade of a building.
    Building,
    /// Free-standing wall such as a noise barrier.
    Free,
}

/// A vertical wall whose end points carry the altitude of the wall top.
#[derive(Debug, Clone, PartialEq)]
pub struct Wall {
    pub p0: DVec3,
    pub p1: DVec3,
    pub kind: WallKind,
    pub building_id: Option<usize>,
    pub material: SurfaceMaterial,
}

impl Wall {
    pub fn line(&self) -> (DVec2, DVec2) {
        (self.p0.truncate(), self.p1.truncate())
    }

    /// Altitude of the wall top above `p`.
    pub fn top_z_at(&self, p: DVec2) -> f64 {
        interpolate_z(p, self.p0, self.p1)
    }
}

/// Terrain, buildings and walls of a scene.
///
/// Implementations must be `Send + Sync`: the batch scheduler queries one model
/// from every worker thread at once.
pub trait TerrainModel: Send + Sync {
    /// Vertical profile from `from` to `to`.
    ///
    /// `ground_coef` is the ground coefficient to use where the model knows no
    /// ground type.
    fn profile(&self, from: DVec3, to: DVec3, ground_coef: f64) -> Result<CutProfile>;

    /// Ground altitude below `point`.
    fn z_ground(&self, point: DVec3) -> f64;

    /// Visits the ids of buildings whose bounding box meets the segment, until
    /// the visitor returns [`VisitControl::Stop`].
    fn buildings_on_path(
        &self,
        from: DVec3,
        to: DVec3,
        visitor: &mut dyn FnMut(usize) -> VisitControl,
    ) -> Result<()>;

    /// Visits the ids of free-standing walls whose bounding box meets the segment.
    fn walls_on_path(
        &self,
        from: DVec3,
        to: DVec3,
        visitor: &mut dyn FnMut(usize) -> VisitControl,
    ) -> Result<()>;

    fn wall(&self, id: usize) -> Option<&Wall>;

    fn building(&self, id: usize) -> Option<&Building>;

    /// Every wall of the scene, facades included; a wall id is its index here.
    fn processed_walls(&self) -> &[Wall];

    /// Roof corners of a building pushed slightly outward, at roof altitude, as
    /// a closed ring. Only corners whose exterior angle (radians) falls within
    /// `[angle_from, angle_to]` are kept.
    fn wide_angle_points_by_building(&self, id: usize, angle_from: f64, angle_to: f64)
    -> Vec<DVec3>;
}
