//! In-process inventory.
//!
//! Mirrors the behaviour the provider relies on from vCenter: tags are
//! sets of object references, clones need an existing template and a
//! unique name, and new VMs start untagged. Clone latency and per-name
//! clone failures can be injected.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use vsphere_core::ManagedObjectRef;

use crate::client::{CloneRequest, InventoryClient};
use crate::error::{InventoryError, InventoryResult};

#[derive(Default)]
struct Inner {
    tags: HashMap<String, BTreeSet<ManagedObjectRef>>,
    names: HashMap<ManagedObjectRef, String>,
    uuids: HashMap<ManagedObjectRef, String>,
    templates: HashSet<String>,
    failing_clones: HashSet<String>,
    clone_delay: Duration,
    clones: Vec<CloneRequest>,
    next_id: u64,
}

/// Inventory kept in memory. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct InMemoryInventory {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock only happens in a failing test.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every clone take this long.
    pub fn with_clone_delay(self, delay: Duration) -> Self {
        self.lock().clone_delay = delay;
        self
    }

    /// Register a template VM that clones can start from.
    pub fn add_template(&self, name: &str) {
        self.lock().templates.insert(name.to_string());
    }

    /// Create an (empty) tag.
    pub fn create_tag(&self, tag: &str) {
        self.lock().tags.entry(tag.to_string()).or_default();
    }

    /// Add an existing VM carrying the given tags (created if missing).
    pub fn add_vm(&self, name: &str, tags: &[&str]) -> ManagedObjectRef {
        let mut inner = self.lock();
        let vm = allocate(&mut inner, name);
        for tag in tags {
            inner.tags.entry(tag.to_string()).or_default().insert(vm.clone());
        }
        vm
    }

    /// Make clones producing `name` fail.
    pub fn fail_clone_of(&self, name: &str) {
        self.lock().failing_clones.insert(name.to_string());
    }

    /// Every clone request seen so far, in arrival order.
    pub fn clone_requests(&self) -> Vec<CloneRequest> {
        self.lock().clones.clone()
    }

    /// Names of all VMs, sorted.
    pub fn vm_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().names.values().cloned().collect();
        names.sort();
        names
    }

    /// Tags attached to an object, sorted.
    pub fn tags_of(&self, object: &ManagedObjectRef) -> Vec<String> {
        let mut tags: Vec<String> = self
            .lock()
            .tags
            .iter()
            .filter(|(_, members)| members.contains(object))
            .map(|(tag, _)| tag.clone())
            .collect();
        tags.sort();
        tags
    }
}

fn allocate(inner: &mut Inner, name: &str) -> ManagedObjectRef {
    inner.next_id += 1;
    let vm = ManagedObjectRef::vm(format!("vm-{}", inner.next_id));
    inner.names.insert(vm.clone(), name.to_string());
    inner.uuids.insert(
        vm.clone(),
        format!("4237A000-0000-4000-8000-{:012X}", inner.next_id),
    );
    vm
}

#[async_trait]
impl InventoryClient for InMemoryInventory {
    async fn resolve_tag_members(&self, tag: &str) -> InventoryResult<HashSet<ManagedObjectRef>> {
        let inner = self.lock();
        Ok(inner
            .tags
            .get(tag)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn attach_tag(&self, tag: &str, object: &ManagedObjectRef) -> InventoryResult<()> {
        let mut inner = self.lock();
        if !inner.names.contains_key(object) {
            return Err(InventoryError::NotFound(format!("object {object}")));
        }
        let members = inner
            .tags
            .get_mut(tag)
            .ok_or_else(|| InventoryError::NotFound(format!("tag {tag}")))?;
        members.insert(object.clone());
        Ok(())
    }

    async fn object_name(&self, object: &ManagedObjectRef) -> InventoryResult<String> {
        self.lock()
            .names
            .get(object)
            .cloned()
            .ok_or_else(|| InventoryError::NotFound(format!("object {object}")))
    }

    async fn object_uuid(&self, object: &ManagedObjectRef) -> InventoryResult<String> {
        self.lock()
            .uuids
            .get(object)
            .cloned()
            .ok_or_else(|| InventoryError::NotFound(format!("object {object}")))
    }

    async fn clone_template(&self, request: &CloneRequest) -> InventoryResult<ManagedObjectRef> {
        let delay = {
            let mut inner = self.lock();
            inner.clones.push(request.clone());
            if !inner.templates.contains(&request.template) {
                return Err(InventoryError::NotFound(format!(
                    "template {}",
                    request.template
                )));
            }
            inner.clone_delay
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        if inner.failing_clones.contains(&request.name) {
            return Err(InventoryError::Request(format!(
                "clone of {} failed",
                request.name
            )));
        }
        if inner.names.values().any(|n| n == &request.name) {
            return Err(InventoryError::AlreadyExists(format!(
                "the name '{}' already exists",
                request.name
            )));
        }
        let vm = allocate(&mut inner, &request.name);
        debug!(name = %request.name, %vm, "in-memory clone complete");
        Ok(vm)
    }
}
