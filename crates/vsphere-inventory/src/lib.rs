//! vsphere-inventory — authenticated access to the vCenter inventory.
//!
//! The provider only needs a handful of things from the platform: the
//! objects attached to a tag, attaching a tag, a VM's name and BIOS UUID,
//! and cloning a VM from a template. [`InventoryClient`] is that capability;
//! [`RestInventory`] implements it against the vCenter Automation REST
//! API and [`InMemoryInventory`] keeps everything in process (for tests
//! and dry runs).
//!
//! # Failure model
//!
//! ```text
//! connect()         → InventoryError::Auth on bad credentials (fatal at startup)
//! any other call    → error returned to the caller, never retried here
//! unknown tag       → empty member set, not an error
//! ```

pub mod client;
pub mod error;
pub mod memory;
pub mod rest;

pub use client::{CloneRequest, InventoryClient};
pub use error::{InventoryError, InventoryResult};
pub use memory::InMemoryInventory;
pub use rest::RestInventory;
