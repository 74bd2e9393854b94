//! The contract the autoscaler consumes from a cloud provider.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProviderResult;

/// Label carried by control-plane nodes (legacy name).
pub const MASTER_LABEL: &str = "node-role.kubernetes.io/master";

/// Label carried by control-plane nodes.
pub const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";

/// A cluster node as seen by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub provider_id: String,
    pub labels: HashMap<String, String>,
}

impl Node {
    pub fn is_control_plane(&self) -> bool {
        self.labels.contains_key(MASTER_LABEL) || self.labels.contains_key(CONTROL_PLANE_LABEL)
    }
}

/// A machine belonging to a node group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Platform identifier of the backing VM.
    pub id: String,
}

/// Node taint passed to [`CloudProvider::new_node_group`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: String,
}

/// Cluster-wide resource bounds, handed to the provider at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimiter {
    min_limits: HashMap<String, i64>,
    max_limits: HashMap<String, i64>,
}

impl ResourceLimiter {
    pub fn new(min_limits: HashMap<String, i64>, max_limits: HashMap<String, i64>) -> Self {
        Self {
            min_limits,
            max_limits,
        }
    }

    /// Lower bound for a resource, 0 when unset.
    pub fn min(&self, resource: &str) -> i64 {
        self.min_limits.get(resource).copied().unwrap_or(0)
    }

    /// Upper bound for a resource, unbounded when unset.
    pub fn max(&self, resource: &str) -> i64 {
        self.max_limits.get(resource).copied().unwrap_or(i64::MAX)
    }
}

/// Prices nodes. No implementation ships with this provider.
pub trait PricingModel: Send + Sync {
    fn node_price(&self, node: &Node, hours: f64) -> ProviderResult<f64>;
}

/// A bounded set of nodes resized as a unit.
#[async_trait]
pub trait NodeGroup: Send + Sync {
    fn id(&self) -> &str;
    fn min_size(&self) -> u32;
    fn max_size(&self) -> u32;

    /// Cached desired size; does not query the platform.
    fn target_size(&self) -> ProviderResult<u32>;

    /// Add `delta` nodes. Long running: returns once the VMs are cloned.
    async fn increase_size(&self, delta: i32) -> ProviderResult<()>;

    async fn decrease_target_size(&self, delta: i32) -> ProviderResult<()>;
    async fn delete_nodes(&self, nodes: &[Node]) -> ProviderResult<()>;

    /// Live members of the group.
    async fn nodes(&self) -> ProviderResult<Vec<Instance>>;

    fn debug(&self) -> String;
    fn exist(&self) -> bool;
    async fn create(&self) -> ProviderResult<Arc<dyn NodeGroup>>;
    async fn delete(&self) -> ProviderResult<()>;
    fn autoprovisioned(&self) -> bool;
}

/// Entry point the autoscaler holds on to.
pub trait CloudProvider: Send + Sync {
    fn name(&self) -> &str;
    fn node_groups(&self) -> Vec<Arc<dyn NodeGroup>>;

    /// Group owning `node`; `None` for nodes not managed by any group.
    fn node_group_for_node(&self, node: &Node) -> ProviderResult<Option<Arc<dyn NodeGroup>>>;

    fn pricing(&self) -> ProviderResult<Arc<dyn PricingModel>>;
    fn get_available_machine_types(&self) -> ProviderResult<Vec<String>>;
    fn new_node_group(
        &self,
        machine_type: &str,
        labels: &HashMap<String, String>,
        system_labels: &HashMap<String, String>,
        taints: &[Taint],
        extra_resources: &HashMap<String, i64>,
    ) -> ProviderResult<Arc<dyn NodeGroup>>;
    fn get_resource_limiter(&self) -> ProviderResult<ResourceLimiter>;
    fn gpu_label(&self) -> &str;
    fn get_available_gpu_types(&self) -> HashSet<String>;
    fn cleanup(&self) -> ProviderResult<()>;

    /// Called before every autoscaler iteration.
    fn refresh(&self) -> ProviderResult<()>;
}
