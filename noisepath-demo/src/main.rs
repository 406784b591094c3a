use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use noisepath::scheduler::SourcePaths;
use noisepath::{
    ComputeRays, DVec2, DVec3, FlatScene, PathCollector, PointKind, PropagationData,
    PropagationSettings, SourceGeometry, SurfaceMaterial,
};

fn rectangle(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<DVec2> {
    vec![
        DVec2::new(x0, y0),
        DVec2::new(x1, y0),
        DVec2::new(x1, y1),
        DVec2::new(x0, y1),
    ]
}

/// A street lined with two blocks, a noise barrier and a park.
fn build_district() -> Result<FlatScene> {
    let mut scene = FlatScene::new(0.0);
    scene.add_building(&rectangle(-60.0, 15.0, -10.0, 35.0), 12.0, SurfaceMaterial::GENERIC)?;
    scene.add_building(&rectangle(10.0, 15.0, 60.0, 30.0), 9.0, SurfaceMaterial::uniform(0.05))?;
    scene.add_building(&rectangle(-20.0, -40.0, 20.0, -15.0), 15.0, SurfaceMaterial::RIGID)?;
    scene.add_wall(
        DVec2::new(30.0, -10.0),
        DVec2::new(90.0, -10.0),
        3.0,
        SurfaceMaterial::uniform(0.3),
    )?;
    scene.add_ground_zone(&rectangle(-100.0, 40.0, 100.0, 120.0), 1.0)?;
    Ok(scene)
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let scene = build_district().context("Failed to build the district")?;
    let settings = PropagationSettings::new()
        .max_src_dist(300.0)
        .reflexion_order(1)
        .max_error(0.1);
    let mut data = PropagationData::new(Arc::new(scene), settings);

    // road along the street axis, emission 0.5 m above the ground
    data.add_source(
        SourceGeometry::LineString(vec![DVec3::new(-120.0, 0.0, 0.5), DVec3::new(120.0, 0.0, 0.5)]),
        vec![1e-3; 8],
    );
    for i in 0..8 {
        for j in 0..6 {
            data.add_receiver(DVec3::new(-70.0 + 20.0 * i as f64, -50.0 + 20.0 * j as f64, 4.0));
        }
    }
    data.make_relative_z_to_absolute();
    let receiver_count = data.receivers.len();

    let rays = ComputeRays::new(Arc::new(data))?;
    let mut collector = PathCollector::new();
    let started = Instant::now();
    rays.run(&mut collector)?;
    log::info!(
        "Found {} paths for {} receivers in {:.2?}",
        collector.path_count(),
        receiver_count,
        started.elapsed()
    );

    for id in 0..receiver_count {
        let found: Vec<SourcePaths> = collector.paths(id);
        let paths = found.iter().flat_map(|s| &s.paths);
        let (mut direct, mut diffracted, mut reflected) = (0, 0, 0);
        for path in paths {
            if path.reflection_count() > 0 {
                reflected += 1;
            } else if path.is_direct() {
                direct += 1;
            } else if path
                .points
                .iter()
                .any(|p| matches!(p.kind, PointKind::DiffractionH | PointKind::DiffractionV))
            {
                diffracted += 1;
            } else {
                // ground hinges only
                direct += 1;
            }
        }
        log::info!(
            "Receiver {:>2}: {} point sources, {} direct, {} diffracted, {} reflected",
            id,
            found.len(),
            direct,
            diffracted,
            reflected
        );
    }
    Ok(())
}
