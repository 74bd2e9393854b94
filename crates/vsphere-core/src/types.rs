//! Domain types shared by the inventory client and the provider.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Prefix of the tag that marks a VM as part of a cluster.
pub const CLUSTER_TAG_PREFIX: &str = "k8s-cluster-";

/// Prefix of the tag that marks a VM as part of a node group.
pub const NODE_GROUP_TAG_PREFIX: &str = "k8s-nodegroup-";

/// Object type of virtual machines in the inventory.
pub const VIRTUAL_MACHINE: &str = "VirtualMachine";

/// Scheme of the provider IDs the vSphere cloud controller puts on nodes.
pub const PROVIDER_ID_PREFIX: &str = "vsphere://";

/// Tag identifying membership in the named cluster.
pub fn cluster_tag(cluster_name: &str) -> String {
    format!("{CLUSTER_TAG_PREFIX}{cluster_name}")
}

/// Tag identifying membership in the named node group.
pub fn node_group_tag(node_group_id: &str) -> String {
    format!("{NODE_GROUP_TAG_PREFIX}{node_group_id}")
}

/// Provider ID of the node backed by the VM with this BIOS UUID.
pub fn provider_id(vm_uuid: &str) -> String {
    format!("{PROVIDER_ID_PREFIX}{}", vm_uuid.to_ascii_lowercase())
}

// ── Inventory objects ──────────────────────────────────────────────

/// Opaque reference to an inventory object, e.g. `VirtualMachine:vm-42`.
///
/// Only equality matters; the serialized shape matches the
/// `{"type": ..., "id": ...}` object ids of the tagging API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManagedObjectRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl ManagedObjectRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Reference to a virtual machine by its managed object id.
    pub fn vm(id: impl Into<String>) -> Self {
        Self::new(VIRTUAL_MACHINE, id)
    }
}

impl fmt::Display for ManagedObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

// ── Node group spec ────────────────────────────────────────────────

/// Immutable size bounds and name of a node group, parsed from the
/// `<minSize>:<maxSize>:<name>` discovery string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeGroupSpec {
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
}

impl NodeGroupSpec {
    /// Parse a discovery string.
    ///
    /// With `support_scale_to_zero` unset, a minimum of zero is rejected.
    pub fn parse(value: &str, support_scale_to_zero: bool) -> ConfigResult<Self> {
        let invalid = |reason: String| ConfigError::InvalidNodeGroupSpec {
            spec: value.to_string(),
            reason,
        };

        let tokens: Vec<&str> = value.splitn(3, ':').collect();
        let [min, max, name] = tokens.as_slice() else {
            return Err(invalid("expected <min>:<max>:<name>".to_string()));
        };

        let min_size = min
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid(format!("failed to set min size: {min}, expected integer")))?;
        let max_size = max
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid(format!("failed to set max size: {max}, expected integer")))?;

        if support_scale_to_zero {
            if min_size < 0 {
                return Err(invalid("min size must be >= 0".to_string()));
            }
        } else if min_size <= 0 {
            return Err(invalid("min size must be >= 1".to_string()));
        }
        if max_size < min_size {
            return Err(invalid(
                "max size must be greater or equal to min size".to_string(),
            ));
        }
        if name.trim().is_empty() {
            return Err(invalid("name must not be blank".to_string()));
        }

        let to_u32 = |n: i64| u32::try_from(n).map_err(|_| invalid(format!("size {n} out of range")));

        Ok(Self {
            name: name.to_string(),
            min_size: to_u32(min_size)?,
            max_size: to_u32(max_size)?,
        })
    }
}

impl FromStr for NodeGroupSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, true)
    }
}
