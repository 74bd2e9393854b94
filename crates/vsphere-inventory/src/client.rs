//! The inventory capability consumed by the provider.

use std::collections::HashSet;

use async_trait::async_trait;
use vsphere_core::ManagedObjectRef;

use crate::error::InventoryResult;

/// Where and from what to clone a new VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneRequest {
    /// Name of the template VM.
    pub template: String,
    /// Datacenter name; empty selects the only datacenter.
    pub datacenter: String,
    /// Resource pool name; empty selects the only pool of the datacenter.
    pub resource_pool: String,
    /// Name of the VM to create.
    pub name: String,
}

/// Authenticated access to the virtualization platform's objects and tags.
///
/// Every call blocks the calling task until the platform answers. Nothing
/// is retried here; retry policy belongs to the caller.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// All objects currently attached to the named tag. A tag that does
    /// not exist yields an empty set.
    async fn resolve_tag_members(&self, tag: &str) -> InventoryResult<HashSet<ManagedObjectRef>>;

    /// Attach the named tag to an object.
    async fn attach_tag(&self, tag: &str, object: &ManagedObjectRef) -> InventoryResult<()>;

    /// Display name of an inventory object.
    async fn object_name(&self, object: &ManagedObjectRef) -> InventoryResult<String>;

    /// BIOS UUID of a VM, the value node provider IDs are built from.
    async fn object_uuid(&self, object: &ManagedObjectRef) -> InventoryResult<String>;

    /// Clone a VM from a template and wait for the task to finish.
    ///
    /// The new VM carries no tags; it is invisible to membership queries
    /// until the caller attaches them. A name already taken by another VM
    /// fails with [`InventoryError::AlreadyExists`](crate::InventoryError::AlreadyExists).
    async fn clone_template(&self, request: &CloneRequest) -> InventoryResult<ManagedObjectRef>;
}
