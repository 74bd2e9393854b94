//! Startup and configuration errors.

use thiserror::Error;

/// Result type alias for configuration handling.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while turning files, flags and environment into a
/// validated configuration. All of them are fatal at startup; the caller
/// decides whether that means exiting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read cloud config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse cloud config: {0}")]
    Parse(String),

    #[error("{0} must be provided")]
    MissingField(&'static str),

    #[error("invalid node group spec {spec:?}: {reason}")]
    InvalidNodeGroupSpec { spec: String, reason: String },

    #[error("must specify at least one node group with --nodes=<min>:<max>:<name>")]
    NoNodeGroups,

    #[error("only a single node group is supported, got {0}")]
    TooManyNodeGroups(usize),

    #[error("vsphere manager does not exist: {0}")]
    UnknownManager(String),
}
