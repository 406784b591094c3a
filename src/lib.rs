//! # noisepath
//!
//! Sound propagation path finder for outdoor noise mapping after the CNOSSOS-EU
//! method.
//!
//! For every receiver of a run, noisepath ranks the sources it can hear and
//! finds the acoustically distinct paths between them: the free-field path,
//! diffraction over and around buildings, and specular reflections on facades.
//! Paths carry the ground segment geometry and path length differences the
//! attenuation model needs; the attenuation itself is left to the caller.
//!
//! The scene is reached through the [`TerrainModel`] trait. [`FlatScene`] is an
//! in-memory model with flat ground, buildings, walls and ground zones.
//!
//! ## Quick Start
//!
//! ```no_run
//! use noisepath::*;
//! use std::sync::Arc;
//!
//! # fn main() -> noisepath::Result<()> {
//! let mut scene = FlatScene::new(0.0);
//! scene.add_building(
//!     &[
//!         DVec2::new(40.0, -10.0),
//!         DVec2::new(60.0, -10.0),
//!         DVec2::new(60.0, 10.0),
//!         DVec2::new(40.0, 10.0),
//!     ],
//!     10.0,
//!     SurfaceMaterial::GENERIC,
//! )?;
//!
//! let mut data = PropagationData::new(Arc::new(scene), PropagationSettings::default());
//! data.add_source(SourceGeometry::Point(DVec3::new(0.0, 0.0, 1.0)), vec![1.0; 8]);
//! data.add_receiver(DVec3::new(100.0, 0.0, 4.0));
//!
//! let rays = ComputeRays::new(Arc::new(data))?;
//! let mut collector = PathCollector::new();
//! rays.run(&mut collector)?;
//! println!("{} paths", collector.path_count());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod math;
pub mod mean_plane;
pub mod path;
pub mod power;
pub mod propagation;
pub mod scene;
pub mod scheduler;
pub mod sources;

pub use config::PropagationSettings;
pub use data::{PropagationData, Source};
pub use error::{PathfinderError, Result};
pub use math::{DVec2, DVec3, Orientation};
pub use path::{DiffractionTerms, PointKind, PointPath, PropagationPath, SegmentPath};
pub use propagation::{
    MirrorReceiver, Side, compute_free_field, compute_reflexion, compute_side_hull, direct_path,
};
pub use scene::{FlatScene, SurfaceMaterial, TerrainModel};
pub use scheduler::{ComputeRays, ComputeRaysOut, PathCollector, PowerBudget, ProgressVisitor};
pub use sources::{ReceiverPointInfo, SourceGeometry, SourcePointInfo};
