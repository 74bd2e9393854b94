//! Manager — provisioning driver behind a node group.
//!
//! Owns the cluster config and the naming policy. New VMs are named
//! `<cluster>-<nodegroup>-<sequence>`, cloned from the configured template
//! and then tagged with both membership tags; a VM that clones but does
//! not get both tags would be invisible to every later membership query,
//! so that counts as a failed VM. Such a VM keeps its name, so names the
//! platform reports as taken are skipped.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use vsphere_core::{ClusterConfig, ManagedObjectRef, ManagerKind, node_group_tag, provider_id};
use vsphere_inventory::{CloneRequest, InventoryClient, InventoryError, RestInventory};

use crate::error::{ProviderError, ProviderResult};
use crate::membership::MembershipResolver;

/// Taken names skipped in one `create_nodes` call before giving up.
const MAX_NAME_COLLISIONS: u32 = 32;

/// Basic interaction with the platform on behalf of node groups.
#[async_trait]
pub trait Manager: Send + Sync {
    /// Live member count of a node group.
    async fn node_group_size(&self, node_group: &str) -> ProviderResult<u32>;

    /// Clone `count` new VMs into the node group.
    ///
    /// Individual failures do not stop the remaining clones. If any VM
    /// failed the result is [`ProviderError::PartialProvisioning`]; any
    /// other error means no VM was attempted.
    async fn create_nodes(&self, node_group: &str, count: u32) -> ProviderResult<()>;

    /// Provider IDs (`vsphere://<bios-uuid>`) of the current members, as
    /// found on the matching cluster nodes.
    async fn get_nodes(&self, node_group: &str) -> ProviderResult<Vec<String>>;

    /// Display names of the current members.
    async fn get_node_names(&self, node_group: &str) -> ProviderResult<Vec<String>>;
}

/// Build the manager for the selected backend.
pub async fn connect_manager(
    kind: ManagerKind,
    config: ClusterConfig,
) -> ProviderResult<Arc<dyn Manager>> {
    match kind {
        ManagerKind::Rest => {
            let client = RestInventory::connect(&config).await?;
            Ok(Arc::new(InventoryManager::new(config, Arc::new(client))))
        }
    }
}

/// [`Manager`] driving any [`InventoryClient`].
pub struct InventoryManager {
    config: ClusterConfig,
    client: Arc<dyn InventoryClient>,
    resolver: MembershipResolver,
}

impl InventoryManager {
    pub fn new(config: ClusterConfig, client: Arc<dyn InventoryClient>) -> Self {
        let resolver = MembershipResolver::new(client.clone(), config.cluster_name.clone());
        Self {
            config,
            client,
            resolver,
        }
    }

    /// Clone one VM and tag it into the group.
    async fn provision(&self, name: &str, tags: &[String]) -> Result<ManagedObjectRef, InventoryError> {
        let request = CloneRequest {
            template: self.config.template.clone(),
            datacenter: self.config.datacenter.clone(),
            resource_pool: self.config.resource_pool.clone(),
            name: name.to_string(),
        };

        let vm = tokio::time::timeout(
            self.config.clone_timeout,
            self.client.clone_template(&request),
        )
        .await
        .map_err(|_| InventoryError::Timeout(self.config.clone_timeout))??;

        for tag in tags {
            if let Err(e) = self.client.attach_tag(tag, &vm).await {
                warn!(
                    node = %name,
                    %vm,
                    %tag,
                    error = %e,
                    "VM created but not tagged, it is invisible to the node group"
                );
                return Err(e);
            }
        }
        Ok(vm)
    }
}

#[async_trait]
impl Manager for InventoryManager {
    async fn node_group_size(&self, node_group: &str) -> ProviderResult<u32> {
        self.resolver.count(node_group).await
    }

    async fn create_nodes(&self, node_group: &str, count: u32) -> ProviderResult<()> {
        let prefix = format!("{}-{}-", self.config.cluster_name, node_group);
        let existing = self.get_node_names(node_group).await?;
        let mut seq = next_sequence(&prefix, &existing);
        let tags = [self.resolver.cluster_tag(), node_group_tag(node_group)];

        let mut created = 0;
        let mut collisions = 0;
        let mut failures = Vec::new();
        for _ in 0..count {
            let (name, result) = loop {
                let name = format!("{prefix}{seq}");
                seq += 1;
                match self.provision(&name, &tags).await {
                    Err(InventoryError::AlreadyExists(_)) if collisions < MAX_NAME_COLLISIONS => {
                        collisions += 1;
                        debug!(%node_group, node = %name, "name already taken, trying the next one");
                    }
                    result => break (name, result),
                }
            };
            match result {
                Ok(vm) => {
                    created += 1;
                    info!(%node_group, node = %name, %vm, "node created");
                }
                Err(e) => {
                    warn!(%node_group, node = %name, error = %e, "failed to create node");
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProviderError::PartialProvisioning {
                requested: count,
                created,
                failures,
            })
        }
    }

    async fn get_nodes(&self, node_group: &str) -> ProviderResult<Vec<String>> {
        let members = self.resolver.members(node_group).await?;
        let mut ids = Vec::with_capacity(members.len());
        for member in &members {
            ids.push(provider_id(&self.client.object_uuid(member).await?));
        }
        Ok(ids)
    }

    async fn get_node_names(&self, node_group: &str) -> ProviderResult<Vec<String>> {
        let members = self.resolver.members(node_group).await?;
        let mut names = Vec::with_capacity(members.len());
        for member in &members {
            names.push(self.client.object_name(member).await?);
        }
        Ok(names)
    }
}

/// First sequence number for new nodes.
///
/// Starts after the member count, and after the highest sequence already
/// used by a member named `<prefix><n>`, so gaps left by removed VMs are
/// not reused. Names taken by VMs outside the group are not seen here;
/// `create_nodes` steps over them when the clone is refused.
fn next_sequence(prefix: &str, existing: &[String]) -> u64 {
    let highest = existing
        .iter()
        .filter_map(|name| name.strip_prefix(prefix)?.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    highest.max(existing.len() as u64) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use vsphere_inventory::InMemoryInventory;

    const CLUSTER_TAG: &str = "k8s-cluster-prod";
    const GROUP_TAG: &str = "k8s-nodegroup-pool-a";

    fn config() -> ClusterConfig {
        ClusterConfig {
            cluster_name: "prod".to_string(),
            server: "vcenter.test".to_string(),
            user: "admin".to_string(),
            password: "secret".to_string(),
            insecure: false,
            datacenter: "dc-1".to_string(),
            resource_pool: "k8s".to_string(),
            template: "worker-tmpl".to_string(),
            clone_timeout: Duration::from_secs(5),
            api_timeout: Duration::from_secs(5),
        }
    }

    fn inventory() -> InMemoryInventory {
        let inv = InMemoryInventory::new();
        inv.add_template("worker-tmpl");
        inv.add_vm("prod-pool-a-1", &[CLUSTER_TAG, GROUP_TAG]);
        inv.add_vm("prod-pool-a-2", &[CLUSTER_TAG, GROUP_TAG]);
        inv.add_vm("prod-master-1", &[CLUSTER_TAG]);
        inv
    }

    fn manager(inv: &InMemoryInventory) -> InventoryManager {
        InventoryManager::new(config(), Arc::new(inv.clone()))
    }

    #[tokio::test]
    async fn size_counts_tagged_members_only() {
        let inv = inventory();
        assert_eq!(manager(&inv).node_group_size("pool-a").await.unwrap(), 2);
        assert_eq!(manager(&inv).node_group_size("pool-b").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn create_clones_names_and_tags() {
        let inv = inventory();
        let mgr = manager(&inv);

        mgr.create_nodes("pool-a", 2).await.unwrap();

        let requests = inv.clone_requests();
        let names: Vec<&str> = requests.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["prod-pool-a-3", "prod-pool-a-4"]);
        assert!(requests.iter().all(|r| r.template == "worker-tmpl"
            && r.datacenter == "dc-1"
            && r.resource_pool == "k8s"));

        // New VMs are visible through membership.
        assert_eq!(mgr.node_group_size("pool-a").await.unwrap(), 4);
        let mut names = mgr.get_node_names("pool-a").await.unwrap();
        names.sort();
        assert_eq!(
            names,
            ["prod-pool-a-1", "prod-pool-a-2", "prod-pool-a-3", "prod-pool-a-4"]
        );
    }

    #[tokio::test]
    async fn partial_failure_continues_and_is_reported() {
        let inv = inventory();
        inv.fail_clone_of("prod-pool-a-3");
        let mgr = manager(&inv);

        let err = mgr.create_nodes("pool-a", 3).await.unwrap_err();
        match err {
            ProviderError::PartialProvisioning {
                requested,
                created,
                failures,
            } => {
                assert_eq!(requested, 3);
                assert_eq!(created, 2);
                assert_eq!(failures.len(), 1);
                assert!(failures[0].starts_with("prod-pool-a-3"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(inv.clone_requests().len(), 3);
        assert_eq!(mgr.node_group_size("pool-a").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn untaggable_vm_counts_as_failure() {
        let inv = InMemoryInventory::new();
        inv.add_template("worker-tmpl");
        // Only the cluster tag exists; the group tag is missing.
        inv.create_tag(CLUSTER_TAG);
        let mgr = manager(&inv);

        let err = mgr.create_nodes("pool-a", 1).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::PartialProvisioning { created: 0, .. }
        ));
        assert_eq!(inv.vm_names(), vec!["prod-pool-a-1".to_string()]);
    }

    #[tokio::test]
    async fn untagged_leftover_does_not_block_later_scale_up() {
        let inv = InMemoryInventory::new();
        inv.add_template("worker-tmpl");
        inv.create_tag(CLUSTER_TAG);
        let mgr = manager(&inv);

        // Group tag missing: prod-pool-a-1 is cloned but left untagged.
        assert!(mgr.create_nodes("pool-a", 1).await.is_err());
        assert_eq!(mgr.node_group_size("pool-a").await.unwrap(), 0);

        inv.create_tag(GROUP_TAG);
        mgr.create_nodes("pool-a", 1).await.unwrap();

        assert_eq!(mgr.get_node_names("pool-a").await.unwrap(), ["prod-pool-a-2"]);
        assert_eq!(inv.vm_names(), ["prod-pool-a-1", "prod-pool-a-2"]);
    }

    #[tokio::test]
    async fn taken_names_are_skipped() {
        let inv = inventory();
        // Same naming scheme, but not in the group.
        inv.add_vm("prod-pool-a-3", &[]);
        inv.add_vm("prod-pool-a-4", &[CLUSTER_TAG]);
        let mgr = manager(&inv);

        mgr.create_nodes("pool-a", 2).await.unwrap();

        let names: Vec<String> = inv.clone_requests().into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["prod-pool-a-3", "prod-pool-a-4", "prod-pool-a-5", "prod-pool-a-6"]);
        assert_eq!(mgr.node_group_size("pool-a").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn nodes_are_reported_as_provider_ids() {
        let inv = InMemoryInventory::new();
        let vm = inv.add_vm("prod-pool-a-1", &[CLUSTER_TAG, GROUP_TAG]);
        let mgr = manager(&inv);

        let uuid = inv.object_uuid(&vm).await.unwrap();
        let ids = mgr.get_nodes("pool-a").await.unwrap();
        assert_eq!(ids, [format!("vsphere://{}", uuid.to_ascii_lowercase())]);
        assert!(ids[0].starts_with("vsphere://4237a000-"));
    }

    #[tokio::test(start_paused = true)]
    async fn clone_deadline_is_enforced() {
        let inv = inventory().with_clone_delay(Duration::from_secs(60));
        let mgr = manager(&inv);

        let err = mgr.create_nodes("pool-a", 1).await.unwrap_err();
        match err {
            ProviderError::PartialProvisioning { failures, .. } => {
                assert!(failures[0].contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sequence_skips_used_numbers() {
        let names = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(next_sequence("c-g-", &[]), 1);
        assert_eq!(next_sequence("c-g-", &names(&["c-g-1", "c-g-2"])), 3);
        // Member 2 was removed; 3 is still taken.
        assert_eq!(next_sequence("c-g-", &names(&["c-g-1", "c-g-3"])), 4);
        // Foreign names still count toward the member count.
        assert_eq!(next_sequence("c-g-", &names(&["manual", "other"])), 3);
    }
}
