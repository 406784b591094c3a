//! Error types for noisepath

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PathfinderError {
    #[error("Sound source {0} geometry are not supported")]
    UnsupportedSourceGeometry(String),

    #[error("Scene query error: {0}")]
    Scene(String),

    #[error("Unknown building id: {0}")]
    UnknownBuilding(usize),

    #[error("Unknown wall id: {0}")]
    UnknownWall(usize),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Worker thread panicked: {0}")]
    WorkerPanicked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PathfinderError>;
