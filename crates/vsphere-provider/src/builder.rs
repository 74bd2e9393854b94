//! Startup: config + discovery specs → ready cloud provider.
//!
//! Every failure here is a startup failure returned as an error; whether
//! the process exits is the caller's decision.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use vsphere_core::{ClusterConfig, ConfigError, ManagerKind, NodeGroupSpec};

use crate::cloudprovider::ResourceLimiter;
use crate::error::ProviderResult;
use crate::manager::{Manager, connect_manager};
use crate::node_group::{ResizeLock, SUPPORT_SCALE_TO_ZERO, VsphereNodeGroup};
use crate::provider::VsphereCloudProvider;

/// Startup options relevant to this provider.
#[derive(Debug, Clone, Default)]
pub struct AutoscalingOptions {
    /// Path of the cloud config file.
    pub cloud_config: Option<PathBuf>,
    /// Fallback when the cloud config names no cluster.
    pub cluster_name: Option<String>,
}

/// Node group discovery strings, `<min>:<max>:<name>` each.
#[derive(Debug, Clone, Default)]
pub struct NodeGroupDiscoveryOptions {
    pub node_group_specs: Vec<String>,
}

/// Build the vSphere provider: load config, pick the backend from the
/// environment, log in, and register the node group with its current size.
pub async fn build_vsphere(
    opts: &AutoscalingOptions,
    discovery: &NodeGroupDiscoveryOptions,
    resource_limiter: ResourceLimiter,
) -> ProviderResult<VsphereCloudProvider> {
    let config = ClusterConfig::load(opts.cloud_config.as_deref(), opts.cluster_name.as_deref())?;
    let spec = single_node_group_spec(&discovery.node_group_specs)?;
    let kind = ManagerKind::from_env()?;

    info!(cluster = %config.cluster_name, manager = %kind, "creating vsphere manager");
    let manager = connect_manager(kind, config).await?;
    build_with_manager(manager, spec, resource_limiter).await
}

/// Register `spec` against an already connected manager.
pub async fn build_with_manager(
    manager: Arc<dyn Manager>,
    spec: NodeGroupSpec,
    resource_limiter: ResourceLimiter,
) -> ProviderResult<VsphereCloudProvider> {
    let mut provider = VsphereCloudProvider::new(resource_limiter);
    let lock = ResizeLock::new();
    let group = VsphereNodeGroup::discover(spec, lock, manager).await?;
    provider.add_node_group(group);
    Ok(provider)
}

/// Exactly one discovery spec is supported.
pub fn single_node_group_spec(specs: &[String]) -> Result<NodeGroupSpec, ConfigError> {
    match specs {
        [] => Err(ConfigError::NoNodeGroups),
        [spec] => NodeGroupSpec::parse(spec, SUPPORT_SCALE_TO_ZERO),
        _ => Err(ConfigError::TooManyNodeGroups(specs.len())),
    }
}
