//! Membership resolver — which VMs belong to a node group.
//!
//! A VM is a member of node group `g` in cluster `c` when it carries both
//! `k8s-cluster-<c>` and `k8s-nodegroup-<g>`. Nothing is cached; both tags
//! are looked up on every call.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;
use vsphere_core::{ManagedObjectRef, cluster_tag, node_group_tag};
use vsphere_inventory::InventoryClient;

use crate::error::ProviderResult;

#[derive(Clone)]
pub struct MembershipResolver {
    client: Arc<dyn InventoryClient>,
    cluster_name: String,
}

impl MembershipResolver {
    pub fn new(client: Arc<dyn InventoryClient>, cluster_name: impl Into<String>) -> Self {
        Self {
            client,
            cluster_name: cluster_name.into(),
        }
    }

    pub fn cluster_tag(&self) -> String {
        cluster_tag(&self.cluster_name)
    }

    /// Current members of a node group, sorted.
    ///
    /// Lookup failures are returned, never read as "no members".
    pub async fn members(&self, node_group: &str) -> ProviderResult<Vec<ManagedObjectRef>> {
        let cluster_tag = self.cluster_tag();
        let group_tag = node_group_tag(node_group);

        let (in_cluster, in_group) = tokio::try_join!(
            self.client.resolve_tag_members(&cluster_tag),
            self.client.resolve_tag_members(&group_tag),
        )?;

        let members = intersect(&in_cluster, &in_group);
        debug!(
            %node_group,
            cluster = %self.cluster_name,
            in_cluster = in_cluster.len(),
            in_group = in_group.len(),
            members = members.len(),
            "resolved node group membership"
        );
        Ok(members)
    }

    /// Number of current members.
    pub async fn count(&self, node_group: &str) -> ProviderResult<u32> {
        let members = self.members(node_group).await?;
        Ok(members.len() as u32)
    }
}

/// Sorted intersection of two object sets.
pub fn intersect(
    a: &HashSet<ManagedObjectRef>,
    b: &HashSet<ManagedObjectRef>,
) -> Vec<ManagedObjectRef> {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let mut out: Vec<ManagedObjectRef> =
        small.iter().filter(|o| large.contains(*o)).cloned().collect();
    out.sort();
    out
}
