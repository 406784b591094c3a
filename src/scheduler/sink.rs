use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::path::PropagationPath;

/// Receives the paths found by a run.
///
/// Every worker thread writes to its own sink obtained from
/// [`sub_process`](ComputeRaysOut::sub_process), so implementations only need to
/// synchronise the state their sub-sinks share.
pub trait ComputeRaysOut: Send {
    /// Takes the paths between one point source and one receiver and returns the
    /// linear power per band they bring to the receiver. An empty vector means
    /// the power is not evaluated.
    fn add_propagation_paths(
        &mut self,
        source_id: usize,
        li: f64,
        receiver_id: usize,
        paths: Vec<PropagationPath>,
    ) -> Vec<f64>;

    /// Called once per receiver, after all its sources have been processed.
    fn finalize_receiver(&mut self, receiver_id: usize);

    /// A sink for another worker thread.
    fn sub_process(&self) -> Box<dyn ComputeRaysOut>;
}

/// Paths between one point source and one receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePaths {
    pub source_id: usize,
    pub li: f64,
    pub receiver_id: usize,
    pub paths: Vec<PropagationPath>,
}

#[derive(Debug, Default)]
struct CollectedPaths {
    receivers: BTreeMap<usize, Vec<SourcePaths>>,
    finalized: Vec<usize>,
}

/// Sink keeping every path in memory.
///
/// Paths are stored as soon as they are handed over, so a receiver whose
/// computation failed keeps the paths found before the failure. It is then
/// missing from [`finalized_receivers`](PathCollector::finalized_receivers).
#[derive(Debug, Clone, Default)]
pub struct PathCollector {
    store: Arc<Mutex<CollectedPaths>>,
}

impl PathCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_store<T>(&self, f: impl FnOnce(&mut CollectedPaths) -> T) -> T {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut store)
    }

    /// Paths gathered for `receiver_id`, by source.
    pub fn paths(&self, receiver_id: usize) -> Vec<SourcePaths> {
        self.with_store(|store| store.receivers.get(&receiver_id).cloned().unwrap_or_default())
    }

    /// Receivers in the order they were finalized.
    pub fn finalized_receivers(&self) -> Vec<usize> {
        self.with_store(|store| store.finalized.clone())
    }

    pub fn path_count(&self) -> usize {
        self.with_store(|store| {
            store
                .receivers
                .values()
                .flatten()
                .map(|s| s.paths.len())
                .sum()
        })
    }
}

impl ComputeRaysOut for PathCollector {
    fn add_propagation_paths(
        &mut self,
        source_id: usize,
        li: f64,
        receiver_id: usize,
        paths: Vec<PropagationPath>,
    ) -> Vec<f64> {
        self.with_store(|store| {
            store
                .receivers
                .entry(receiver_id)
                .or_default()
                .push(SourcePaths {
                    source_id,
                    li,
                    receiver_id,
                    paths,
                })
        });
        Vec::new()
    }

    fn finalize_receiver(&mut self, receiver_id: usize) {
        self.with_store(|store| store.finalized.push(receiver_id));
    }

    fn sub_process(&self) -> Box<dyn ComputeRaysOut> {
        Box::new(self.clone())
    }
}
