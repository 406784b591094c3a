//! Configuration for noisepath

use std::time::Duration;

use crate::error::{PathfinderError, Result};

/// Thresholds and worker settings for one propagation run.
///
/// Distances are in meters, `max_error` in dB.
#[derive(Debug, Clone)]
pub struct PropagationSettings {
    /// Sources farther than this from a receiver are ignored.
    pub max_src_dist: f64,

    /// Walls farther than this from the source-receiver segment are not reflection candidates.
    pub max_ref_dist: f64,

    /// Stop processing sources once the remaining upper-bound power changes the
    /// receiver level by less than this. `0.0` disables the early exit.
    pub max_error: f64,

    /// Maximum number of specular reflections per path. `0` disables reflections.
    pub reflexion_order: usize,

    /// Master switch for diffraction paths.
    pub compute_diffraction: bool,

    /// Diffraction over the top of obstacles.
    pub compute_horizontal_diffraction: bool,

    /// Diffraction around the sides of obstacles.
    pub compute_vertical_diffraction: bool,

    /// Ground coefficient at the source (0 = hard, 1 = porous).
    pub g_s: f64,

    /// Number of worker threads used by the batch scheduler.
    pub thread_count: usize,

    /// How long the batch scheduler waits for workers before giving up on them.
    pub worker_timeout: Duration,
}

impl Default for PropagationSettings {
    fn default() -> Self {
        Self {
            max_src_dist: 750.0,
            max_ref_dist: 50.0,
            max_error: 0.0,
            reflexion_order: 1,
            compute_diffraction: true,
            compute_horizontal_diffraction: true,
            compute_vertical_diffraction: true,
            g_s: 0.0,
            thread_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            worker_timeout: Duration::from_secs(3600),
        }
    }
}

impl PropagationSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_src_dist(mut self, distance: f64) -> Self {
        self.max_src_dist = distance;
        self
    }

    pub fn max_ref_dist(mut self, distance: f64) -> Self {
        self.max_ref_dist = distance;
        self
    }

    pub fn max_error(mut self, error: f64) -> Self {
        self.max_error = error;
        self
    }

    pub fn reflexion_order(mut self, order: usize) -> Self {
        self.reflexion_order = order;
        self
    }

    pub fn compute_diffraction(mut self, enable: bool) -> Self {
        self.compute_diffraction = enable;
        self
    }

    pub fn compute_horizontal_diffraction(mut self, enable: bool) -> Self {
        self.compute_horizontal_diffraction = enable;
        self
    }

    pub fn compute_vertical_diffraction(mut self, enable: bool) -> Self {
        self.compute_vertical_diffraction = enable;
        self
    }

    pub fn g_s(mut self, g_s: f64) -> Self {
        self.g_s = g_s;
        self
    }

    pub fn thread_count(mut self, count: usize) -> Self {
        self.thread_count = count;
        self
    }

    pub fn worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    /// Checks that every threshold is usable.
    pub fn validate(&self) -> Result<()> {
        if !self.max_src_dist.is_finite() || self.max_src_dist <= 0.0 {
            return Err(PathfinderError::Configuration(format!(
                "max_src_dist must be a positive distance, got {}",
                self.max_src_dist
            )));
        }
        if !self.max_ref_dist.is_finite() || self.max_ref_dist < 0.0 {
            return Err(PathfinderError::Configuration(format!(
                "max_ref_dist must be a non-negative distance, got {}",
                self.max_ref_dist
            )));
        }
        if !self.max_error.is_finite() || self.max_error < 0.0 {
            return Err(PathfinderError::Configuration(format!(
                "max_error must be non-negative, got {}",
                self.max_error
            )));
        }
        if !(0.0..=1.0).contains(&self.g_s) {
            return Err(PathfinderError::Configuration(format!(
                "g_s must be between 0.0 and 1.0, got {}",
                self.g_s
            )));
        }
        if self.thread_count == 0 {
            return Err(PathfinderError::Configuration(
                "thread_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = PropagationSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.reflexion_order, 1);
        assert_eq!(settings.max_error, 0.0);
        assert!(settings.thread_count >= 1);
    }

    #[test]
    fn test_builder_overrides() {
        let settings = PropagationSettings::new()
            .max_src_dist(200.0)
            .reflexion_order(2)
            .compute_vertical_diffraction(false)
            .thread_count(3);
        assert_eq!(settings.max_src_dist, 200.0);
        assert_eq!(settings.reflexion_order, 2);
        assert!(!settings.compute_vertical_diffraction);
        assert!(settings.compute_horizontal_diffraction);
        assert_eq!(settings.thread_count, 3);
    }

    #[test]
    fn test_invalid_settings() {
        assert!(PropagationSettings::new().thread_count(0).validate().is_err());
        assert!(PropagationSettings::new().g_s(1.5).validate().is_err());
        assert!(PropagationSettings::new().max_src_dist(-1.0).validate().is_err());
        assert!(PropagationSettings::new().max_error(f64::NAN).validate().is_err());
    }
}
