//! vsphere-core — shared types for the vSphere node group provider.
//!
//! Holds everything that is pure data: the discovery spec of a node
//! group, references to inventory objects, the tag naming convention
//! that defines membership, and the cloud config loaded at startup.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ClusterConfig, ManagerKind};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
