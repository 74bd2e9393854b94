//! Cloud provider facade handed to the autoscaler.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::cloudprovider::{
    CloudProvider, Node, NodeGroup, PricingModel, ResourceLimiter, Taint,
};
use crate::error::{ProviderError, ProviderResult};
use crate::node_group::VsphereNodeGroup;

/// Cloud provider name for vSphere.
pub const PROVIDER_NAME: &str = "vsphere";

pub struct VsphereCloudProvider {
    resource_limiter: ResourceLimiter,
    node_groups: Vec<Arc<VsphereNodeGroup>>,
}

impl VsphereCloudProvider {
    pub fn new(resource_limiter: ResourceLimiter) -> Self {
        Self {
            resource_limiter,
            node_groups: Vec::new(),
        }
    }

    pub fn add_node_group(&mut self, group: VsphereNodeGroup) {
        self.node_groups.push(Arc::new(group));
    }
}

impl CloudProvider for VsphereCloudProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn node_groups(&self) -> Vec<Arc<dyn NodeGroup>> {
        self.node_groups
            .iter()
            .map(|g| g.clone() as Arc<dyn NodeGroup>)
            .collect()
    }

    /// Control-plane nodes belong to no group; everything else belongs to
    /// the single configured group.
    fn node_group_for_node(&self, node: &Node) -> ProviderResult<Option<Arc<dyn NodeGroup>>> {
        if node.is_control_plane() {
            return Ok(None);
        }
        Ok(self
            .node_groups
            .first()
            .map(|g| g.clone() as Arc<dyn NodeGroup>))
    }

    fn pricing(&self) -> ProviderResult<Arc<dyn PricingModel>> {
        Err(ProviderError::NotImplemented)
    }

    fn get_available_machine_types(&self) -> ProviderResult<Vec<String>> {
        Err(ProviderError::NotImplemented)
    }

    fn new_node_group(
        &self,
        _machine_type: &str,
        _labels: &HashMap<String, String>,
        _system_labels: &HashMap<String, String>,
        _taints: &[Taint],
        _extra_resources: &HashMap<String, i64>,
    ) -> ProviderResult<Arc<dyn NodeGroup>> {
        Err(ProviderError::NotImplemented)
    }

    fn get_resource_limiter(&self) -> ProviderResult<ResourceLimiter> {
        Ok(self.resource_limiter.clone())
    }

    fn gpu_label(&self) -> &str {
        ""
    }

    fn get_available_gpu_types(&self) -> HashSet<String> {
        HashSet::new()
    }

    fn cleanup(&self) -> ProviderResult<()> {
        Ok(())
    }

    fn refresh(&self) -> ProviderResult<()> {
        for group in &self.node_groups {
            debug!("{}", group.debug());
        }
        Ok(())
    }
}
