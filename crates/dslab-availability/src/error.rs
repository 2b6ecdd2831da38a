//! Error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort simulation setup.
#[derive(Debug, Error)]
pub enum Error {
    /// Failure/recovery trace could not be read.
    #[error(transparent)]
    Trace(#[from] TraceError),

    /// Placement file could not be read.
    #[error(transparent)]
    Placement(#[from] PlacementError),

    /// Simulation config is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Workload file could not be read.
    #[error("can't read workload file {path}: {source}")]
    Workload {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Result type for setup operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("can't read trace file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("can't read placements file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("can't parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unknown recovery policy: {0}")]
    UnknownPolicy(String),
}

/// Failures of the external backup placement solver. Never fatal.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("solver command is empty")]
    NoCommand,

    #[error("can't spawn solver: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("solver exited with {status}, output: {output}")]
    ExitStatus { status: String, output: String },

    #[error("no output from solver")]
    EmptyOutput,

    #[error("invalid solver output: {0}")]
    MalformedOutput(String),

    #[error("{0}")]
    Rejected(String),
}

/// Failures of the external host failure predictor. Never fatal.
#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("predictor command is empty")]
    NoCommand,

    #[error("can't write host features: {0}")]
    Features(#[source] std::io::Error),

    #[error("can't spawn predictor: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("predictor exited with {0}")]
    ExitStatus(String),

    #[error("invalid predictor output line: {0}")]
    MalformedOutput(String),
}
