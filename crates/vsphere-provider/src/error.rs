//! Provider error types.

use thiserror::Error;
use vsphere_core::ConfigError;
use vsphere_inventory::InventoryError;

/// Errors returned to the autoscaler.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The operation is not supported by this provider.
    #[error("not implemented")]
    NotImplemented,

    #[error("node group already exists")]
    AlreadyExist,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("size increase too large, desired: {desired} max: {max}")]
    SizeLimitExceeded { desired: u64, max: u32 },

    /// Some, but not necessarily all, requested VMs failed to come up.
    #[error("created {created} of {requested} nodes: {}", .failures.join("; "))]
    PartialProvisioning {
        requested: u32,
        created: u32,
        failures: Vec<String>,
    },

    #[error("inventory: {0}")]
    Inventory(#[from] InventoryError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),
}

impl ProviderError {
    /// Whether the caller asked for a capability this provider lacks.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, ProviderError::NotImplemented)
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
