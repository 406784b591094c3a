//! Source selection: discretization of raw sources into ranked point sources.
//!
//! For each receiver, sources near enough are split into point sources carrying
//! an optimistic upper bound of the power they can bring. Point sources are
//! then processed loudest first so that the batch scheduler can stop once the
//! remaining bounds no longer matter.

use std::cmp::Ordering;
use std::collections::HashSet;

use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{AABB, RTree};

use crate::data::PropagationData;
use crate::error::{PathfinderError, Result};
use crate::math::{DVec2, DVec3, Orientation, closest_point_on_segment, distance_to_segment};
use crate::power::{a_div, db_to_w};

/// Distances below this are clamped when evaluating geometric divergence.
const MIN_DIVERGENCE_DISTANCE: f64 = 0.01;

/// Geometry of a raw sound source, in scene coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceGeometry {
    Point(DVec3),
    LineString(Vec<DVec3>),
    MultiLineString(Vec<Vec<DVec3>>),
    /// Accepted by the scene but not as an emitter.
    Polygon(Vec<DVec3>),
}

impl SourceGeometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            SourceGeometry::Point(_) => "Point",
            SourceGeometry::LineString(_) => "LineString",
            SourceGeometry::MultiLineString(_) => "MultiLineString",
            SourceGeometry::Polygon(_) => "Polygon",
        }
    }

    pub fn coordinates(&self) -> Box<dyn Iterator<Item = &DVec3> + '_> {
        match self {
            SourceGeometry::Point(p) => Box::new(std::iter::once(p)),
            SourceGeometry::LineString(line) | SourceGeometry::Polygon(line) => Box::new(line.iter()),
            SourceGeometry::MultiLineString(lines) => Box::new(lines.iter().flatten()),
        }
    }

    pub fn coordinates_mut(&mut self) -> Box<dyn Iterator<Item = &mut DVec3> + '_> {
        match self {
            SourceGeometry::Point(p) => Box::new(std::iter::once(p)),
            SourceGeometry::LineString(line) | SourceGeometry::Polygon(line) => {
                Box::new(line.iter_mut())
            }
            SourceGeometry::MultiLineString(lines) => Box::new(lines.iter_mut().flatten()),
        }
    }

    pub fn envelope(&self) -> Option<Envelope> {
        Envelope::of_points(self.coordinates().map(|p| p.truncate()))
    }
}

/// Horizontal bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub min: DVec2,
    pub max: DVec2,
}

impl Envelope {
    pub fn new(min: DVec2, max: DVec2) -> Self {
        Self { min, max }
    }

    /// Square of half-side `radius` centered on `center`.
    pub fn around(center: DVec2, radius: f64) -> Self {
        Self {
            min: center - DVec2::splat(radius),
            max: center + DVec2::splat(radius),
        }
    }

    pub fn of_points(mut points: impl Iterator<Item = DVec2>) -> Option<Self> {
        let first = points.next()?;
        Some(points.fold(Self::new(first, first), |env, p| {
            Self::new(env.min.min(p), env.max.max(p))
        }))
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }
}

/// Spatial index over source envelopes.
pub trait SourceIndex: Send + Sync {
    fn insert(&mut self, source_id: usize, envelope: Envelope);

    /// Ids of sources whose envelope meets `envelope`. Ids may repeat.
    fn query(&self, envelope: &Envelope) -> Vec<usize>;
}

/// R-tree backed [`SourceIndex`].
#[derive(Default)]
pub struct RTreeSourceIndex {
    tree: RTree<GeomWithData<Rectangle<[f64; 2]>, usize>>,
}

impl RTreeSourceIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SourceIndex for RTreeSourceIndex {
    fn insert(&mut self, source_id: usize, envelope: Envelope) {
        let rect = Rectangle::from_corners(envelope.min.to_array(), envelope.max.to_array());
        self.tree.insert(GeomWithData::new(rect, source_id));
    }

    fn query(&self, envelope: &Envelope) -> Vec<usize> {
        let aabb = AABB::from_corners(envelope.min.to_array(), envelope.max.to_array());
        self.tree
            .locate_in_envelope_intersecting(&aabb)
            .map(|entry| entry.data)
            .collect()
    }
}

/// A receiver position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceiverPointInfo {
    pub id: usize,
    pub coordinate: DVec3,
}

/// A discretized point source, ranked by its upper-bound power.
///
/// Ordering is by descending `global_wj`, ties broken by ascending id; two
/// points compare equal when they share both.
#[derive(Debug, Clone)]
pub struct SourcePointInfo {
    /// Index of the raw source this point comes from.
    pub id: usize,
    pub coordinate: DVec3,
    /// Length of source represented by this point.
    pub li: f64,
    /// Upper-bound power per band at the receiver.
    pub wj: Vec<f64>,
    pub global_wj: f64,
    pub orientation: Orientation,
}

impl SourcePointInfo {
    pub fn new(id: usize, coordinate: DVec3, li: f64, wj: Vec<f64>, orientation: Orientation) -> Self {
        let mut coordinate = coordinate;
        if coordinate.z.is_nan() {
            coordinate.z = 0.0;
        }
        let global_wj = wj.iter().sum();
        Self {
            id,
            coordinate,
            li,
            wj,
            global_wj,
            orientation,
        }
    }
}

impl Ord for SourcePointInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .global_wj
            .total_cmp(&self.global_wj)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for SourcePointInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SourcePointInfo {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SourcePointInfo {}

/// Ranked point sources for one receiver.
#[derive(Debug, Clone, Default)]
pub struct SourceSelection {
    pub sources: Vec<SourcePointInfo>,
    /// Sum of every point's upper-bound power.
    pub total_power: f64,
}

/// Optimistic power per band reaching a receiver `distance` meters away:
/// geometric divergence only, plus 3 dB.
pub fn upper_bound_power(power: &[f64], li: f64, distance: f64) -> Vec<f64> {
    let attenuation = db_to_w(-a_div(distance.max(MIN_DIVERGENCE_DISTANCE))) * db_to_w(3.0);
    power.iter().map(|w| w * li * attenuation).collect()
}

/// 3D distance, or horizontal distance when an altitude is undefined.
fn distance_or_planar(a: DVec3, b: DVec3) -> f64 {
    let d = a.distance(b);
    if d.is_nan() {
        a.truncate().distance(b.truncate())
    } else {
        d
    }
}

fn line_length(line: &[DVec3]) -> f64 {
    line.windows(2).map(|w| distance_or_planar(w[0], w[1])).sum()
}

/// Point at curvilinear abscissa `s` along `line`.
fn point_at_length(line: &[DVec3], s: f64) -> Option<DVec3> {
    let mut walked = 0.0;
    for w in line.windows(2) {
        let length = distance_or_planar(w[0], w[1]);
        if walked + length >= s && length > 0.0 {
            return Some(w[0].lerp(w[1], (s - walked) / length));
        }
        walked += length;
    }
    line.last().copied()
}

/// Splits `line` into points representing pieces no longer than `constraint`.
///
/// A line shorter than `constraint` gives its mid-length point. Otherwise it is
/// cut into `ceil(L / constraint)` equal pieces and the middle of each is
/// returned. Returns the points and the length each one represents.
pub fn split_line_into_points(line: &[DVec3], constraint: f64) -> (Vec<DVec3>, f64) {
    let length = line_length(line);
    if length < constraint {
        let mid = point_at_length(line, length / 2.0);
        return (mid.into_iter().collect(), length);
    }
    let pieces = (length / constraint).ceil().max(1.0);
    let piece_length = length / pieces;
    let points = (0..pieces as usize)
        .filter_map(|k| point_at_length(line, (k as f64 + 0.5) * piece_length))
        .collect();
    (points, piece_length)
}

/// Distance from `p` to the nearest point of `line`.
fn distance_to_line(p: DVec3, line: &[DVec3]) -> Option<f64> {
    if let [single] = line {
        return Some(distance_or_planar(p, *single));
    }
    line.windows(2)
        .map(|w| {
            let d = p.distance(closest_point_on_segment(p, w[0], w[1]));
            if d.is_nan() {
                distance_to_segment(p.truncate(), w[0].truncate(), w[1].truncate())
            } else {
                d
            }
        })
        .min_by(f64::total_cmp)
}

struct Selector<'a> {
    data: &'a PropagationData,
    receiver: DVec3,
    sources: Vec<SourcePointInfo>,
}

impl Selector<'_> {
    fn insert_point_source(
        &mut self,
        id: usize,
        position: DVec3,
        power: &[f64],
        li: f64,
        orientation: Orientation,
    ) {
        let wj = upper_bound_power(power, li, distance_or_planar(self.receiver, position));
        self.sources
            .push(SourcePointInfo::new(id, position, li, wj, orientation));
    }

    fn add_line_source(
        &mut self,
        id: usize,
        lines: &[Vec<DVec3>],
        power: &[f64],
        orientation: Option<Orientation>,
    ) {
        let max_src_dist = self.data.settings.max_src_dist;
        for line in lines {
            let Some(distance) = distance_to_line(self.receiver, line) else {
                continue;
            };
            let constraint = (distance / 2.0).max(1.0);
            let (points, li) = split_line_into_points(line, constraint);
            for (i, point) in points.iter().enumerate() {
                if point.truncate().distance(self.receiver.truncate()) >= max_src_dist {
                    continue;
                }
                let from = if i == 0 { line[0] } else { points[i - 1] };
                let mut direction = *point - from;
                if direction.z.is_nan() {
                    direction.z = 0.0;
                }
                let point_orientation = match orientation {
                    Some(o) => Orientation::from_vector(
                        Orientation::new(o.yaw, 0.0, 0.0).rotate(direction),
                        o.roll,
                    ),
                    None => Orientation::from_vector(direction, 0.0),
                };
                self.insert_point_source(id, *point, power, li, point_orientation);
            }
        }
    }
}

/// Collects and ranks the point sources that can reach `receiver`.
pub fn select_sources(data: &PropagationData, receiver: &ReceiverPointInfo) -> Result<SourceSelection> {
    let max_src_dist = data.settings.max_src_dist;
    let envelope = Envelope::around(receiver.coordinate.truncate(), max_src_dist);
    let mut selector = Selector {
        data,
        receiver: receiver.coordinate,
        sources: Vec::new(),
    };
    let mut seen = HashSet::new();
    for id in data.sources_index.query(&envelope) {
        if !seen.insert(id) {
            continue;
        }
        let source = data.sources.get(id).ok_or_else(|| {
            PathfinderError::Scene(format!("source index returned unknown source {id}"))
        })?;
        match &source.geometry {
            SourceGeometry::Point(p) => {
                if p.truncate().distance(receiver.coordinate.truncate()) < max_src_dist {
                    let orientation = source.orientation.unwrap_or_default();
                    selector.insert_point_source(id, *p, &source.power, 1.0, orientation);
                }
            }
            SourceGeometry::LineString(line) => selector.add_line_source(
                id,
                std::slice::from_ref(line),
                &source.power,
                source.orientation,
            ),
            SourceGeometry::MultiLineString(lines) => {
                selector.add_line_source(id, lines, &source.power, source.orientation)
            }
            other => {
                return Err(PathfinderError::UnsupportedSourceGeometry(
                    other.type_name().to_string(),
                ));
            }
        }
    }

    let mut sources = selector.sources;
    sources.sort();
    let total_power = sources.iter().map(|s| s.global_wj).sum();
    Ok(SourceSelection {
        sources,
        total_power,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::PropagationSettings;
    use crate::scene::FlatScene;

    fn straight_line(length: f64) -> Vec<DVec3> {
        vec![DVec3::new(0.0, 0.0, 0.0), DVec3::new(length, 0.0, 0.0)]
    }

    #[test]
    fn test_short_line_gives_midpoint() {
        let (points, li) = split_line_into_points(&straight_line(3.0), 5.0);
        assert_eq!(points.len(), 1);
        assert!(points[0].distance(DVec3::new(1.5, 0.0, 0.0)) < 1e-12);
        assert_eq!(li, 3.0);
    }

    #[test]
    fn test_long_line_split_evenly() {
        let (points, li) = split_line_into_points(&straight_line(10.0), 3.0);
        assert_eq!(points.len(), 4);
        assert!((li - 2.5).abs() < 1e-12);
        for (k, p) in points.iter().enumerate() {
            assert!((p.x - (k as f64 + 0.5) * 2.5).abs() < 1e-9);
        }
        for w in points.windows(2) {
            assert!((w[0].distance(w[1]) - li).abs() < 1e-9);
        }
    }

    #[test]
    fn test_split_follows_polyline() {
        let line = vec![
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(4.0, 0.0, 0.0),
            DVec3::new(4.0, 4.0, 0.0),
        ];
        let (points, li) = split_line_into_points(&line, 2.0);
        assert_eq!(points.len(), 4);
        assert_eq!(li, 2.0);
        assert!(points[3].distance(DVec3::new(4.0, 3.0, 0.0)) < 1e-9);
    }

    #[test]
    fn test_ordering_descending_power_then_id() {
        let make = |id, w: f64| SourcePointInfo::new(id, DVec3::ZERO, 1.0, vec![w], Orientation::default());
        let mut sources = vec![make(3, 1.0), make(1, 5.0), make(2, 1.0), make(0, 1.0)];
        sources.sort();
        let ids: Vec<usize> = sources.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 0, 2, 3]);

        let mut again = sources.clone();
        again.sort();
        let again_ids: Vec<usize> = again.iter().map(|s| s.id).collect();
        assert_eq!(again_ids, ids);
    }

    #[test]
    fn test_nan_altitude_is_zeroed() {
        let info = SourcePointInfo::new(0, DVec3::new(1.0, 2.0, f64::NAN), 1.0, vec![], Orientation::default());
        assert_eq!(info.coordinate.z, 0.0);
        assert_eq!(info.global_wj, 0.0);
    }

    #[test]
    fn test_upper_bound_power() {
        // Adiv(100 m) = 51 dB, +3 dB
        let wj = upper_bound_power(&[1.0, 2.0], 1.0, 100.0);
        let expected = db_to_w(-48.0);
        assert!((wj[0] - expected).abs() < 1e-15);
        assert!((wj[1] - 2.0 * expected).abs() < 1e-15);
    }

    #[test]
    fn test_rtree_index_query() {
        let mut index = RTreeSourceIndex::new();
        index.insert(0, Envelope::new(DVec2::new(0.0, 0.0), DVec2::new(1.0, 1.0)));
        index.insert(1, Envelope::new(DVec2::new(50.0, 50.0), DVec2::new(60.0, 50.0)));
        let mut found = index.query(&Envelope::around(DVec2::new(2.0, 2.0), 5.0));
        found.sort();
        assert_eq!(found, vec![0]);
    }

    fn data_with(settings: PropagationSettings) -> PropagationData {
        PropagationData::new(Arc::new(FlatScene::new(0.0)), settings)
    }

    #[test]
    fn test_select_sources_ranks_and_filters() {
        let mut data = data_with(PropagationSettings::new().max_src_dist(100.0));
        data.add_source(SourceGeometry::Point(DVec3::new(50.0, 0.0, 0.0)), vec![1.0; 8]);
        data.add_source(SourceGeometry::Point(DVec3::new(10.0, 0.0, 0.0)), vec![1.0; 8]);
        data.add_source(SourceGeometry::Point(DVec3::new(150.0, 0.0, 0.0)), vec![1.0; 8]);
        let receiver = ReceiverPointInfo {
            id: 0,
            coordinate: DVec3::new(0.0, 0.0, 4.0),
        };
        let selection = select_sources(&data, &receiver).unwrap();
        let ids: Vec<usize> = selection.sources.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 0]);
        let sum: f64 = selection.sources.iter().map(|s| s.global_wj).sum();
        assert!((selection.total_power - sum).abs() < 1e-18);
    }

    #[test]
    fn test_select_line_source() {
        let mut data = data_with(PropagationSettings::new().max_src_dist(500.0));
        data.add_source(
            SourceGeometry::LineString(vec![DVec3::new(-50.0, 20.0, 0.0), DVec3::new(50.0, 20.0, 0.0)]),
            vec![1.0; 8],
        );
        let receiver = ReceiverPointInfo {
            id: 0,
            coordinate: DVec3::new(0.0, 0.0, 0.0),
        };
        let selection = select_sources(&data, &receiver).unwrap();
        // nearest point is 20 m away: pieces of at most 10 m
        assert_eq!(selection.sources.len(), 10);
        assert!(selection.sources.iter().all(|s| (s.li - 10.0).abs() < 1e-9));
        assert!(selection.sources.iter().all(|s| (s.orientation.yaw - 90.0).abs() < 1e-9));
    }

    #[test]
    fn test_select_oriented_line_source() {
        let mut data = data_with(PropagationSettings::new().max_src_dist(500.0));
        data.add_oriented_source(
            SourceGeometry::LineString(vec![DVec3::new(-50.0, 20.0, 0.0), DVec3::new(50.0, 20.0, 0.0)]),
            vec![1.0; 8],
            Orientation::new(30.0, 0.0, 15.0),
        );
        let receiver = ReceiverPointInfo {
            id: 0,
            coordinate: DVec3::new(0.0, 0.0, 0.0),
        };
        let selection = select_sources(&data, &receiver).unwrap();
        assert_eq!(selection.sources.len(), 10);
        // east-going line (yaw 90) turned 30 degrees clockwise
        for s in &selection.sources {
            assert!((s.orientation.yaw - 120.0).abs() < 1e-9, "yaw {}", s.orientation.yaw);
            assert!(s.orientation.pitch.abs() < 1e-9);
            assert_eq!(s.orientation.roll, 15.0);
        }
    }

    #[test]
    fn test_sub_lines_split_at_their_own_distance() {
        let mut data = data_with(PropagationSettings::new().max_src_dist(500.0));
        data.add_source(
            SourceGeometry::MultiLineString(vec![
                vec![DVec3::new(-5.0, 2.0, 0.0), DVec3::new(5.0, 2.0, 0.0)],
                vec![DVec3::new(-50.0, 200.0, 0.0), DVec3::new(50.0, 200.0, 0.0)],
            ]),
            vec![1.0; 8],
        );
        let receiver = ReceiverPointInfo {
            id: 0,
            coordinate: DVec3::new(0.0, 0.0, 0.0),
        };
        let selection = select_sources(&data, &receiver).unwrap();
        let (far, near): (Vec<_>, Vec<_>) =
            selection.sources.iter().partition(|s| s.coordinate.y > 100.0);
        assert_eq!(near.len(), 10);
        assert!(near.iter().all(|s| (s.li - 1.0).abs() < 1e-9));
        assert_eq!(far.len(), 1);
        assert!((far[0].li - 100.0).abs() < 1e-9);
        assert!(far[0].coordinate.distance(DVec3::new(0.0, 200.0, 0.0)) < 1e-9);
    }

    #[test]
    fn test_line_without_altitude_uses_planar_length() {
        let mut data = data_with(PropagationSettings::new().max_src_dist(500.0));
        data.add_source(
            SourceGeometry::LineString(vec![
                DVec3::new(-50.0, 20.0, f64::NAN),
                DVec3::new(50.0, 20.0, f64::NAN),
            ]),
            vec![1.0; 8],
        );
        let receiver = ReceiverPointInfo {
            id: 0,
            coordinate: DVec3::new(0.0, 0.0, 4.0),
        };
        let selection = select_sources(&data, &receiver).unwrap();
        assert_eq!(selection.sources.len(), 10);
        assert!(selection.sources.iter().all(|s| (s.li - 10.0).abs() < 1e-9));
        assert!(selection.sources.iter().all(|s| s.coordinate.z == 0.0));
        assert!(selection.sources.iter().all(|s| (s.orientation.yaw - 90.0).abs() < 1e-9));
        assert!(selection.total_power.is_finite() && selection.total_power > 0.0);
    }

    #[test]
    fn test_unsupported_geometry_is_fatal() {
        let mut data = data_with(PropagationSettings::default());
        data.add_source(
            SourceGeometry::Polygon(vec![
                DVec3::new(0.0, 0.0, 0.0),
                DVec3::new(1.0, 0.0, 0.0),
                DVec3::new(1.0, 1.0, 0.0),
            ]),
            vec![1.0; 8],
        );
        let receiver = ReceiverPointInfo {
            id: 0,
            coordinate: DVec3::new(0.0, 0.0, 1.0),
        };
        let err = select_sources(&data, &receiver).unwrap_err();
        assert!(matches!(err, PathfinderError::UnsupportedSourceGeometry(ref t) if t == "Polygon"));
    }
}
