//! Batch computation of propagation paths over every receiver of a run.
//!
//! Receivers are split into contiguous ranges, one per worker thread. Each
//! worker ranks the sources a receiver can hear, finds their paths loudest
//! first and hands them to its own sink. A worker failure cancels the run.

mod progress;
mod sink;

use std::ops::Range;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::RecvTimeoutError;

use crate::data::PropagationData;
use crate::error::{PathfinderError, Result};
use crate::path::PropagationPath;
use crate::power::w_to_db;
use crate::propagation::{compute_reflexion, direct_path};
use crate::sources::{ReceiverPointInfo, SourcePointInfo, select_sources};

pub use progress::ProgressVisitor;
pub use sink::{ComputeRaysOut, PathCollector, SourcePaths};

/// Power bookkeeping of one receiver.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerBudget {
    /// Point sources whose paths were computed.
    pub processed: usize,
    /// Power brought by the processed sources, in W.
    pub power_at_source: f64,
    /// Upper bound of the power the unprocessed sources may still bring, in W.
    pub total_power_remaining: f64,
}

impl PowerBudget {
    /// dB the unprocessed sources may still add to the receiver level.
    pub fn remaining_db(&self) -> f64 {
        w_to_db(self.power_at_source + self.total_power_remaining) - w_to_db(self.power_at_source)
    }
}

/// Paths between one point source and one receiver, tagged with their ids.
///
/// Pairs at a horizontal distance of `max_src_dist` or more have no path.
pub fn rcv_src_propagation(
    data: &PropagationData,
    src: &SourcePointInfo,
    rcv: &ReceiverPointInfo,
) -> Result<Vec<PropagationPath>> {
    let distance = src.coordinate.truncate().distance(rcv.coordinate.truncate());
    if distance >= data.settings.max_src_dist {
        return Ok(Vec::new());
    }
    let mut paths = direct_path(data, src.coordinate, rcv.coordinate)?;
    if data.settings.reflexion_order > 0 {
        paths.extend(compute_reflexion(data, src.coordinate, rcv.coordinate, false)?);
    }
    for path in &mut paths {
        path.source_id = Some(src.id);
        path.receiver_id = Some(rcv.id);
        path.source_orientation = src.orientation;
    }
    Ok(paths)
}

/// Processes the sources `rcv` can hear, loudest bound first, and stops once the
/// remaining bounds cannot change the receiver level by `max_error` dB.
///
/// A source without any path, or whose power the sink does not evaluate,
/// counts with its upper bound.
pub fn compute_rays_at_position(
    data: &PropagationData,
    progress: &ProgressVisitor,
    rcv: &ReceiverPointInfo,
    sink: &mut dyn ComputeRaysOut,
) -> Result<PowerBudget> {
    let selection = select_sources(data, rcv)?;
    log::trace!(
        "Receiver {} hears {} point sources",
        rcv.id,
        selection.sources.len()
    );
    let max_error = data.settings.max_error;
    let mut budget = PowerBudget {
        total_power_remaining: selection.total_power,
        ..PowerBudget::default()
    };
    for src in &selection.sources {
        if progress.is_canceled() {
            break;
        }
        budget.total_power_remaining = (budget.total_power_remaining - src.global_wj).max(0.0);
        let paths = rcv_src_propagation(data, src, rcv)?;
        let power = if paths.is_empty() {
            Vec::new()
        } else {
            sink.add_propagation_paths(src.id, src.li, rcv.id, paths)
        };
        budget.power_at_source += if power.is_empty() {
            src.global_wj
        } else {
            power.iter().sum()
        };
        budget.processed += 1;
        if max_error > 0.0 && budget.power_at_source > 0.0 && budget.remaining_db() < max_error {
            log::trace!(
                "Receiver {} stops after {} of {} sources",
                rcv.id,
                budget.processed,
                selection.sources.len()
            );
            break;
        }
    }
    Ok(budget)
}

fn run_batch(
    data: &PropagationData,
    progress: &ProgressVisitor,
    receivers: Range<usize>,
    sink: &mut dyn ComputeRaysOut,
) -> Result<()> {
    for id in receivers {
        if progress.is_canceled() {
            break;
        }
        let rcv = ReceiverPointInfo {
            id,
            coordinate: data.receivers[id],
        };
        compute_rays_at_position(data, progress, &rcv, sink)?;
        sink.finalize_receiver(id);
        progress.end_step();
    }
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Batch path finder over every receiver of a [`PropagationData`].
pub struct ComputeRays {
    data: Arc<PropagationData>,
    progress: Arc<ProgressVisitor>,
}

impl ComputeRays {
    pub fn new(data: Arc<PropagationData>) -> Result<Self> {
        data.settings.validate()?;
        Ok(Self {
            data,
            progress: Arc::new(ProgressVisitor::new()),
        })
    }

    /// Uses `progress` to report completed receivers and to receive cancellation.
    pub fn with_progress(mut self, progress: Arc<ProgressVisitor>) -> Self {
        self.progress = progress;
        self
    }

    pub fn data(&self) -> &PropagationData {
        &self.data
    }

    pub fn progress(&self) -> &Arc<ProgressVisitor> {
        &self.progress
    }

    /// Computes the paths of every receiver and hands them to `sink`.
    ///
    /// With a single thread the batch runs on the caller's thread and writes to
    /// `sink` directly. Otherwise each worker gets a sub-sink. The first worker
    /// error cancels the run and is returned; what the sinks received so far
    /// stays usable. Workers still running after the configured timeout are
    /// left behind with a warning.
    pub fn run(&self, sink: &mut dyn ComputeRaysOut) -> Result<()> {
        let settings = &self.data.settings;
        let receiver_count = self.data.receivers.len();
        let thread_count = settings.thread_count.max(1);
        log::info!(
            "Computing rays for {} receivers and {} sources on {} thread(s)",
            receiver_count,
            self.data.sources.len(),
            thread_count
        );
        if receiver_count == 0 {
            return Ok(());
        }
        if thread_count == 1 {
            let result = run_batch(&self.data, &self.progress, 0..receiver_count, sink);
            if let Err(e) = &result {
                log::error!("Ray computation failed: {}", e);
                self.progress.cancel();
            }
            return result;
        }

        let batch_size = receiver_count.div_ceil(thread_count);
        let (report_tx, report_rx) = crossbeam_channel::unbounded::<(usize, Result<()>)>();
        let mut handles: Vec<(usize, JoinHandle<()>)> = Vec::new();
        let mut first_error: Option<PathfinderError> = None;
        for (batch, start) in (0..receiver_count).step_by(batch_size).enumerate() {
            if self.progress.is_canceled() {
                break;
            }
            let range = start..(start + batch_size).min(receiver_count);
            log::debug!("Dispatching batch {} over receivers {:?}", batch, range);
            let data = Arc::clone(&self.data);
            let progress = Arc::clone(&self.progress);
            let mut worker_sink = sink.sub_process();
            let report = report_tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("noisepath-worker-{batch}"))
                .spawn(move || {
                    let result = run_batch(&data, &progress, range, worker_sink.as_mut());
                    if result.is_err() {
                        progress.cancel();
                    }
                    let _ = report.send((batch, result));
                });
            match spawned {
                Ok(handle) => handles.push((batch, handle)),
                Err(e) => {
                    log::error!("Failed to spawn worker {}: {}", batch, e);
                    self.progress.cancel();
                    first_error = Some(e.into());
                    break;
                }
            }
        }
        drop(report_tx);

        let timeout = settings.worker_timeout;
        let deadline = Instant::now() + timeout;
        let mut running = handles.len();
        while running > 0 {
            match report_rx.recv_deadline(deadline) {
                Ok((batch, result)) => {
                    running -= 1;
                    if let Err(e) = result {
                        log::error!("Worker {} failed: {}", batch, e);
                        first_error.get_or_insert(e);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "{} worker(s) still running after {:?}, returning partial results",
                        running,
                        timeout
                    );
                    break;
                }
                // every remaining worker is gone without reporting
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for (batch, handle) in handles {
            if !handle.is_finished() {
                continue;
            }
            if let Err(payload) = handle.join() {
                let message = panic_message(payload.as_ref());
                log::error!("Worker {} panicked: {}", batch, message);
                self.progress.cancel();
                first_error.get_or_insert(PathfinderError::WorkerPanicked(message));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                log::info!("Computed rays for {} receivers", self.progress.steps_done());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::PropagationSettings;
    use crate::math::{DVec2, DVec3};
    use crate::scene::{FlatScene, SurfaceMaterial};
    use crate::sources::SourceGeometry;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn blocked_scene() -> FlatScene {
        let mut scene = FlatScene::new(0.0);
        scene
            .add_building(
                &[
                    DVec2::new(40.0, -10.0),
                    DVec2::new(60.0, -10.0),
                    DVec2::new(60.0, 10.0),
                    DVec2::new(40.0, 10.0),
                ],
                10.0,
                SurfaceMaterial::GENERIC,
            )
            .unwrap();
        scene
    }

    fn single_pair(scene: FlatScene, settings: PropagationSettings) -> PropagationData {
        let mut data = PropagationData::new(Arc::new(scene), settings);
        data.add_source(SourceGeometry::Point(DVec3::new(0.0, 0.0, 1.0)), vec![1.0; 8]);
        data.add_receiver(DVec3::new(100.0, 0.0, 4.0));
        data
    }

    /// Sink answering a fixed power and counting what it is given.
    #[derive(Clone)]
    struct CountingSink {
        power: Vec<f64>,
        calls: Arc<AtomicUsize>,
        finalized: Arc<Mutex<Vec<usize>>>,
    }

    impl CountingSink {
        fn new(power: Vec<f64>) -> Self {
            Self {
                power,
                calls: Arc::new(AtomicUsize::new(0)),
                finalized: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl ComputeRaysOut for CountingSink {
        fn add_propagation_paths(
            &mut self,
            _source_id: usize,
            _li: f64,
            _receiver_id: usize,
            _paths: Vec<PropagationPath>,
        ) -> Vec<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.power.clone()
        }

        fn finalize_receiver(&mut self, receiver_id: usize) {
            self.finalized.lock().unwrap().push(receiver_id);
        }

        fn sub_process(&self) -> Box<dyn ComputeRaysOut> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn test_flat_scene_single_free_field_path() {
        init_logger();
        let data = single_pair(FlatScene::new(0.0), PropagationSettings::new().thread_count(1));
        let rays = ComputeRays::new(Arc::new(data)).unwrap();
        let mut collector = PathCollector::new();
        rays.run(&mut collector).unwrap();

        let found = collector.paths(0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_id, 0);
        assert_eq!(found[0].li, 1.0);
        let paths = &found[0].paths;
        assert_eq!(paths.len(), 1);
        assert!(paths[0].is_direct());
        assert_eq!(paths[0].source_id, Some(0));
        assert_eq!(paths[0].receiver_id, Some(0));
        assert!((paths[0].sr_segment.d - 100.045).abs() < 1e-3);
    }

    #[test]
    fn test_blocking_building_gives_diffracted_paths() {
        init_logger();
        let settings = PropagationSettings::new().thread_count(1).reflexion_order(0);
        let data = single_pair(blocked_scene(), settings);
        let rays = ComputeRays::new(Arc::new(data)).unwrap();
        let mut collector = PathCollector::new();
        rays.run(&mut collector).unwrap();

        let paths: Vec<PropagationPath> = collector
            .paths(0)
            .into_iter()
            .flat_map(|s| s.paths)
            .collect();
        assert_eq!(paths.iter().filter(|p| p.is_direct()).count(), 0);
        assert_eq!(paths.iter().filter(|p| !p.difh_points.is_empty()).count(), 1);
        assert_eq!(paths.iter().filter(|p| !p.difv_points.is_empty()).count(), 2);
    }

    fn grid_data(thread_count: usize) -> PropagationData {
        let settings = PropagationSettings::new().thread_count(thread_count);
        let mut data = PropagationData::new(Arc::new(FlatScene::new(0.0)), settings);
        data.add_source(
            SourceGeometry::LineString(vec![DVec3::new(-50.0, 0.0, 0.5), DVec3::new(50.0, 0.0, 0.5)]),
            vec![1.0; 8],
        );
        for i in 0..10 {
            data.add_receiver(DVec3::new(-45.0 + 10.0 * i as f64, 30.0, 4.0));
        }
        data
    }

    #[test]
    fn test_every_receiver_finalized_once() {
        init_logger();
        for thread_count in [1, 3] {
            let rays = ComputeRays::new(Arc::new(grid_data(thread_count))).unwrap();
            let mut sink = CountingSink::new(Vec::new());
            rays.run(&mut sink).unwrap();
            let mut finalized = sink.finalized.lock().unwrap().clone();
            finalized.sort();
            assert_eq!(finalized, (0..10).collect::<Vec<_>>());
            assert_eq!(rays.progress().steps_done(), 10);
        }
    }

    #[test]
    fn test_collector_across_threads() {
        let rays = ComputeRays::new(Arc::new(grid_data(4))).unwrap();
        let mut collector = PathCollector::new();
        rays.run(&mut collector).unwrap();
        let mut finalized = collector.finalized_receivers();
        finalized.sort();
        assert_eq!(finalized, (0..10).collect::<Vec<_>>());
        assert!((0..10).all(|id| !collector.paths(id).is_empty()));
    }

    #[test]
    fn test_canceled_run_does_nothing() {
        let progress = Arc::new(ProgressVisitor::new());
        progress.cancel();
        for thread_count in [1, 2] {
            let rays = ComputeRays::new(Arc::new(grid_data(thread_count)))
                .unwrap()
                .with_progress(Arc::clone(&progress));
            let mut collector = PathCollector::new();
            rays.run(&mut collector).unwrap();
            assert!(collector.finalized_receivers().is_empty());
        }
    }

    fn spread_sources(settings: PropagationSettings) -> PropagationData {
        let mut data = PropagationData::new(Arc::new(FlatScene::new(0.0)), settings);
        for i in 0..5 {
            let x = 20.0 * (i + 1) as f64;
            data.add_source(SourceGeometry::Point(DVec3::new(x, 0.0, 0.5)), vec![1.0; 8]);
        }
        data.add_receiver(DVec3::new(0.0, 0.0, 4.0));
        data
    }

    fn receiver(data: &PropagationData) -> ReceiverPointInfo {
        ReceiverPointInfo {
            id: 0,
            coordinate: data.receivers[0],
        }
    }

    #[test]
    fn test_early_exit_on_max_error() {
        let data = spread_sources(PropagationSettings::new().max_error(0.5));
        let progress = ProgressVisitor::new();
        let mut sink = CountingSink::new(vec![1.0]);
        let budget = compute_rays_at_position(&data, &progress, &receiver(&data), &mut sink).unwrap();
        assert_eq!(budget.processed, 1);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert_eq!(budget.power_at_source, 1.0);
        assert!(budget.remaining_db() < 0.5);
    }

    #[test]
    fn test_no_early_exit_without_max_error() {
        let data = spread_sources(PropagationSettings::new());
        let progress = ProgressVisitor::new();
        let mut sink = CountingSink::new(vec![1.0]);
        let budget = compute_rays_at_position(&data, &progress, &receiver(&data), &mut sink).unwrap();
        assert_eq!(budget.processed, 5);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 5);
        assert!(budget.total_power_remaining < 1e-12);
    }

    #[test]
    fn test_source_without_path_counts_its_upper_bound() {
        let settings = PropagationSettings::new()
            .compute_diffraction(false)
            .reflexion_order(0);
        let data = single_pair(blocked_scene(), settings);
        let rcv = receiver(&data);
        let bound = select_sources(&data, &rcv).unwrap().total_power;
        let progress = ProgressVisitor::new();
        let mut sink = CountingSink::new(vec![1.0]);
        let budget = compute_rays_at_position(&data, &progress, &rcv, &mut sink).unwrap();
        assert_eq!(budget.processed, 1);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
        assert!(bound > 0.0);
        assert!((budget.power_at_source - bound).abs() <= bound * 1e-12);
    }

    #[test]
    fn test_pair_range_is_horizontal() {
        let data = PropagationData::new(
            Arc::new(FlatScene::new(0.0)),
            PropagationSettings::new().max_src_dist(100.0),
        );
        let src = SourcePointInfo::new(
            4,
            DVec3::new(0.0, 0.0, 1.0),
            1.0,
            vec![1.0; 8],
            Default::default(),
        );
        // 99 m away horizontally, 102 m in 3D
        let high = ReceiverPointInfo {
            id: 2,
            coordinate: DVec3::new(99.0, 0.0, 26.0),
        };
        let paths = rcv_src_propagation(&data, &src, &high).unwrap();
        assert!(!paths.is_empty());
        assert!(paths.iter().all(|p| p.source_id == Some(4) && p.receiver_id == Some(2)));

        let at_range = ReceiverPointInfo {
            id: 3,
            coordinate: DVec3::new(100.0, 0.0, 1.0),
        };
        assert!(rcv_src_propagation(&data, &src, &at_range).unwrap().is_empty());
    }

    #[test]
    fn test_unsupported_geometry_aborts_run() {
        init_logger();
        for thread_count in [1, 2] {
            let mut data = grid_data(thread_count);
            data.add_source(
                SourceGeometry::Polygon(vec![
                    DVec3::new(0.0, 10.0, 0.0),
                    DVec3::new(5.0, 10.0, 0.0),
                    DVec3::new(5.0, 15.0, 0.0),
                ]),
                vec![1.0; 8],
            );
            let rays = ComputeRays::new(Arc::new(data)).unwrap();
            let mut collector = PathCollector::new();
            let err = rays.run(&mut collector).unwrap_err();
            assert!(matches!(err, PathfinderError::UnsupportedSourceGeometry(_)));
            assert!(rays.progress().is_canceled());
        }
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let data = grid_data(0);
        assert!(matches!(
            ComputeRays::new(Arc::new(data)),
            Err(PathfinderError::Configuration(_))
        ));
    }
}
