//! vsphere-provider — node groups backed by tagged vSphere VMs.
//!
//! Implements the autoscaler's [`CloudProvider`] / [`NodeGroup`] contract
//! on top of an [`InventoryClient`](vsphere_inventory::InventoryClient).
//!
//! # Layering
//!
//! ```text
//! VsphereCloudProvider   node groups, node → group lookup
//!   └── VsphereNodeGroup bounds, target size, cluster-wide resize lock
//!         └── Manager    naming, clone + tag, live size queries
//!               └── MembershipResolver
//!                     members = tagged(k8s-cluster-<cluster>) ∩ tagged(k8s-nodegroup-<id>)
//! ```
//!
//! Membership is never cached: the platform's tag index is the source of
//! truth and every query costs two tag lookups.

pub mod builder;
pub mod cloudprovider;
pub mod error;
pub mod manager;
pub mod membership;
pub mod node_group;
pub mod provider;

pub use builder::{AutoscalingOptions, NodeGroupDiscoveryOptions, build_vsphere};
pub use cloudprovider::{CloudProvider, Instance, Node, NodeGroup, ResourceLimiter};
pub use error::{ProviderError, ProviderResult};
pub use manager::{InventoryManager, Manager, connect_manager};
pub use membership::MembershipResolver;
pub use node_group::{ResizeLock, VsphereNodeGroup};
pub use provider::{PROVIDER_NAME, VsphereCloudProvider};
