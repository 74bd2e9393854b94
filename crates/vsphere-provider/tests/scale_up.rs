//! End-to-end scale-up against an in-memory inventory.
//!
//! Walks the autoscaler's view: discover the group, read its size, grow
//! it, and check the new VMs show up as members.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use vsphere_core::{ClusterConfig, NodeGroupSpec};
use vsphere_inventory::InMemoryInventory;
use vsphere_provider::builder::build_with_manager;
use vsphere_provider::{
    CloudProvider, InventoryManager, Node, NodeGroup, ProviderError, ResourceLimiter,
    VsphereCloudProvider,
};

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
        clone_timeout: Duration::from_secs(30),
        api_timeout: Duration::from_secs(5),
    }
}

fn inventory() -> InMemoryInventory {
    let inv = InMemoryInventory::new();
    inv.add_template("worker-tmpl");
    inv.add_vm("prod-master-1", &[CLUSTER_TAG]);
    inv.add_vm("prod-pool-a-1", &[CLUSTER_TAG, GROUP_TAG]);
    inv.add_vm("prod-pool-a-2", &[CLUSTER_TAG, GROUP_TAG]);
    inv
}

async fn provider(inv: &InMemoryInventory) -> VsphereCloudProvider {
    let manager = Arc::new(InventoryManager::new(config(), Arc::new(inv.clone())));
    let spec: NodeGroupSpec = "1:5:pool-a".parse().unwrap();
    build_with_manager(manager, spec, ResourceLimiter::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn scale_up_within_bounds() {
    let inv = inventory();
    let provider = provider(&inv).await;
    let group = provider.node_groups().remove(0);
    assert_eq!(group.target_size().unwrap(), 2);

    group.increase_size(2).await.unwrap();

    assert_eq!(group.target_size().unwrap(), 4);
    assert_eq!(group.nodes().await.unwrap().len(), 4);

    let names: Vec<String> = inv.clone_requests().into_iter().map(|r| r.name).collect();
    assert_eq!(names, ["prod-pool-a-3", "prod-pool-a-4"]);
}

#[tokio::test]
async fn scale_up_past_max_leaves_group_untouched() {
    let inv = inventory();
    let provider = provider(&inv).await;
    let group = provider.node_groups().remove(0);

    let err = group.increase_size(10).await.unwrap_err();
    assert!(matches!(err, ProviderError::SizeLimitExceeded { desired: 12, max: 5 }));
    assert_eq!(group.target_size().unwrap(), 2);
    assert!(inv.clone_requests().is_empty());
}

#[tokio::test]
async fn partial_failure_is_distinct_from_success() {
    let inv = inventory();
    inv.fail_clone_of("prod-pool-a-4");
    let provider = provider(&inv).await;
    let group = provider.node_groups().remove(0);

    let err = group.increase_size(2).await.unwrap_err();
    assert!(matches!(
        err,
        ProviderError::PartialProvisioning { requested: 2, created: 1, .. }
    ));
    // Target tracks the VM that made it.
    assert_eq!(group.target_size().unwrap(), 3);
    assert_eq!(group.nodes().await.unwrap().len(), 3);
}

#[tokio::test]
async fn node_lookup_skips_control_plane() {
    let inv = inventory();
    let provider = provider(&inv).await;

    let master = Node {
        name: "prod-master-1".to_string(),
        provider_id: String::new(),
        labels: HashMap::from([(
            "node-role.kubernetes.io/master".to_string(),
            String::new(),
        )]),
    };
    assert!(provider.node_group_for_node(&master).unwrap().is_none());

    let worker = Node {
        name: "prod-pool-a-1".to_string(),
        ..Node::default()
    };
    let group = provider.node_group_for_node(&worker).unwrap().unwrap();
    assert_eq!(group.id(), "pool-a");
}
