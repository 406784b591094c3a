//! Propagation path types delivered to result sinks

use crate::math::{DVec2, DVec3, Orientation};

/// Role of a path vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointKind {
    Source,
    Receiver,
    /// Diffraction over a horizontal edge (roof or ridge).
    DiffractionH,
    /// Ground vertex close enough to the sight line to act as a diffraction edge.
    DiffractionHRayleigh,
    /// Diffraction around a vertical edge.
    DiffractionV,
    Reflection,
}

/// One vertex of a propagation path.
#[derive(Debug, Clone, PartialEq)]
pub struct PointPath {
    pub kind: PointKind,
    /// Scene coordinate of the vertex.
    pub coordinate: DVec3,
    /// Ground altitude below the vertex.
    pub altitude: f64,
    pub ground_coef: f64,
    /// Absorption spectrum of the wall or building at this vertex, empty if none.
    pub alpha_wall: Vec<f64>,
    pub building_id: Option<usize>,
    pub wall_id: Option<usize>,
    pub building_height: Option<f64>,
}

impl PointPath {
    pub fn new(kind: PointKind, coordinate: DVec3, altitude: f64) -> Self {
        Self {
            kind,
            coordinate,
            altitude,
            ground_coef: 0.0,
            alpha_wall: Vec::new(),
            building_id: None,
            wall_id: None,
            building_height: None,
        }
    }

    pub fn with_ground_coef(mut self, ground_coef: f64) -> Self {
        self.ground_coef = ground_coef;
        self
    }

    pub fn with_absorption(mut self, alpha_wall: Vec<f64>) -> Self {
        self.alpha_wall = alpha_wall;
        self
    }

    pub fn with_building(mut self, building_id: Option<usize>, height: Option<f64>) -> Self {
        self.building_id = building_id;
        self.building_height = height;
        self
    }

    pub fn with_wall(mut self, wall_id: Option<usize>) -> Self {
        self.wall_id = wall_id;
        self
    }
}

/// Geometry of one ground segment in profile coordinates.
///
/// All lengths are non-negative.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SegmentPath {
    /// Segment start (source side).
    pub s: DVec2,
    /// Segment end (receiver side).
    pub r: DVec2,
    pub s_mean_plane: DVec2,
    pub r_mean_plane: DVec2,
    /// Mirror of `s` across the mean plane.
    pub s_prime: DVec2,
    /// Mirror of `r` across the mean plane.
    pub r_prime: DVec2,
    /// Mean plane slope.
    pub a: f64,
    /// Mean plane intercept.
    pub b: f64,
    pub d: f64,
    /// Length projected on the mean plane.
    pub dp: f64,
    pub zs_h: f64,
    pub zr_h: f64,
    /// Source height corrected for favorable conditions.
    pub zs_f: f64,
    pub zr_f: f64,
    pub test_form_h: f64,
    pub test_form_f: f64,
    pub g_path: f64,
    pub g_path_prime: f64,
    /// Length between the mirrored end points, set once diffraction terms are known.
    pub d_prime: f64,
    /// Direct 3D source-receiver distance, only set for lateral paths.
    pub dc: Option<f64>,
}

/// Path length differences of a diffracted path.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DiffractionTerms {
    pub delta_h: f64,
    pub delta_f: f64,
    pub delta_prime_h: f64,
    pub delta_s_prime_r_h: f64,
    pub delta_s_r_prime_h: f64,
    pub delta_s_prime_r_f: f64,
    pub delta_s_r_prime_f: f64,
    /// Distance between the first and last diffraction edges.
    pub e: f64,
}

/// One acoustically distinct route from a source to a receiver.
///
/// The first point is always the source and the last the receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationPath {
    pub favorable: bool,
    pub points: Vec<PointPath>,
    pub segments: Vec<SegmentPath>,
    pub sr_segment: SegmentPath,
    pub diffraction: Option<DiffractionTerms>,
    /// Indices in `points` of horizontal diffraction vertices.
    pub difh_points: Vec<usize>,
    /// Indices in `points` of vertical diffraction vertices.
    pub difv_points: Vec<usize>,
    pub source_id: Option<usize>,
    pub receiver_id: Option<usize>,
    pub source_orientation: Orientation,
}

impl PropagationPath {
    pub fn new(
        favorable: bool,
        points: Vec<PointPath>,
        segments: Vec<SegmentPath>,
        sr_segment: SegmentPath,
    ) -> Self {
        Self {
            favorable,
            points,
            segments,
            sr_segment,
            diffraction: None,
            difh_points: Vec::new(),
            difv_points: Vec::new(),
            source_id: None,
            receiver_id: None,
            source_orientation: Orientation::default(),
        }
    }

    pub fn reflection_count(&self) -> usize {
        self.points
            .iter()
            .filter(|p| p.kind == PointKind::Reflection)
            .count()
    }

    /// A path without diffraction or reflection vertices.
    pub fn is_direct(&self) -> bool {
        self.points
            .iter()
            .all(|p| matches!(p.kind, PointKind::Source | PointKind::Receiver))
    }
}
