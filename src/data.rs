//! Scene, sources and receivers of one propagation run.

use std::sync::Arc;

use crate::config::PropagationSettings;
use crate::math::{DVec3, Orientation};
use crate::scene::TerrainModel;
use crate::sources::{RTreeSourceIndex, SourceGeometry, SourceIndex};

/// A raw sound source.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub geometry: SourceGeometry,
    /// Maximal emitted power per octave band, in W.
    pub power: Vec<f64>,
    pub orientation: Option<Orientation>,
}

/// Everything the path finder reads during a run.
///
/// Built once, then shared read-only with every worker. The absolutization
/// passes need `&mut self` and therefore run before the data is shared.
pub struct PropagationData {
    pub scene: Arc<dyn TerrainModel>,
    pub sources: Vec<Source>,
    pub receivers: Vec<DVec3>,
    pub sources_index: Box<dyn SourceIndex>,
    pub settings: PropagationSettings,
}

impl PropagationData {
    pub fn new(scene: Arc<dyn TerrainModel>, settings: PropagationSettings) -> Self {
        Self {
            scene,
            sources: Vec::new(),
            receivers: Vec::new(),
            sources_index: Box::new(RTreeSourceIndex::new()),
            settings,
        }
    }

    /// Replaces the source index, indexing the sources already added.
    pub fn with_source_index(mut self, mut index: Box<dyn SourceIndex>) -> Self {
        for (id, source) in self.sources.iter().enumerate() {
            if let Some(envelope) = source.geometry.envelope() {
                index.insert(id, envelope);
            }
        }
        self.sources_index = index;
        self
    }

    /// Adds a source and returns its id.
    pub fn add_source(&mut self, geometry: SourceGeometry, power: Vec<f64>) -> usize {
        self.push_source(Source {
            geometry,
            power,
            orientation: None,
        })
    }

    pub fn add_oriented_source(
        &mut self,
        geometry: SourceGeometry,
        power: Vec<f64>,
        orientation: Orientation,
    ) -> usize {
        self.push_source(Source {
            geometry,
            power,
            orientation: Some(orientation),
        })
    }

    fn push_source(&mut self, source: Source) -> usize {
        let id = self.sources.len();
        if let Some(envelope) = source.geometry.envelope() {
            self.sources_index.insert(id, envelope);
        }
        self.sources.push(source);
        id
    }

    /// Adds a receiver and returns its id.
    pub fn add_receiver(&mut self, coordinate: DVec3) -> usize {
        self.receivers.push(coordinate);
        self.receivers.len() - 1
    }

    /// Turns source altitudes relative to the ground into absolute altitudes.
    pub fn make_source_relative_z_to_absolute(&mut self) {
        let scene = Arc::clone(&self.scene);
        for source in &mut self.sources {
            for p in source.geometry.coordinates_mut() {
                *p = to_absolute(scene.as_ref(), *p);
            }
        }
    }

    /// Turns receiver altitudes relative to the ground into absolute altitudes.
    pub fn make_receiver_relative_z_to_absolute(&mut self) {
        let scene = Arc::clone(&self.scene);
        for p in &mut self.receivers {
            *p = to_absolute(scene.as_ref(), *p);
        }
    }

    pub fn make_relative_z_to_absolute(&mut self) {
        self.make_source_relative_z_to_absolute();
        self.make_receiver_relative_z_to_absolute();
    }
}

fn to_absolute(scene: &dyn TerrainModel, p: DVec3) -> DVec3 {
    let ground = scene.z_ground(p);
    if ground.is_nan() {
        return p;
    }
    let relative = if p.z.is_nan() { 0.0 } else { p.z };
    DVec3::new(p.x, p.y, ground + relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::FlatScene;

    #[test]
    fn test_relative_altitudes_become_absolute() {
        let mut data = PropagationData::new(Arc::new(FlatScene::new(12.0)), PropagationSettings::default());
        data.add_source(
            SourceGeometry::LineString(vec![DVec3::new(0.0, 0.0, 0.5), DVec3::new(10.0, 0.0, f64::NAN)]),
            vec![1.0; 8],
        );
        data.add_receiver(DVec3::new(5.0, 5.0, 4.0));
        data.make_relative_z_to_absolute();

        let SourceGeometry::LineString(line) = &data.sources[0].geometry else {
            panic!("geometry changed kind");
        };
        assert_eq!(line[0].z, 12.5);
        assert_eq!(line[1].z, 12.0);
        assert_eq!(data.receivers[0].z, 16.0);
    }

    #[test]
    fn test_sources_are_indexed() {
        let mut data = PropagationData::new(Arc::new(FlatScene::new(0.0)), PropagationSettings::default());
        let id = data.add_source(SourceGeometry::Point(DVec3::new(3.0, 4.0, 0.0)), vec![1.0]);
        let envelope = crate::sources::Envelope::around(glam::DVec2::new(3.0, 4.0), 1.0);
        assert_eq!(data.sources_index.query(&envelope), vec![id]);

        let rebuilt = data.with_source_index(Box::new(RTreeSourceIndex::new()));
        assert_eq!(rebuilt.sources_index.query(&envelope), vec![id]);
    }
}
