//! Cloud config parser.
//!
//! The cloud config is a TOML file with a single `[global]` section:
//!
//! ```toml
//! [global]
//! cluster-name = "prod"
//! server = "vcenter.example.com"
//! user = "autoscaler@vsphere.local"
//! password = "secret"
//! insecure-flag = false
//! datacenter = "dc-1"
//! resource-pool = "k8s"
//! template = "k8s-worker-template"
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Environment variable selecting the provisioning backend.
pub const MANAGER_ENV: &str = "VSPHERE_MANAGER";

const DEFAULT_CLONE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Raw file layout, before defaults and validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub global: GlobalSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GlobalSection {
    pub cluster_name: Option<String>,
    pub server: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub insecure_flag: Option<bool>,
    pub datacenter: Option<String>,
    pub resource_pool: Option<String>,
    pub template: Option<String>,
    pub clone_timeout_secs: Option<u64>,
    pub api_timeout_secs: Option<u64>,
}

impl ConfigFile {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        content.parse()
    }
}

impl FromStr for ConfigFile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Validated cluster configuration, immutable after startup.
#[derive(Clone)]
pub struct ClusterConfig {
    pub cluster_name: String,
    /// Host (and optional port) of the vCenter endpoint.
    pub server: String,
    pub user: String,
    pub password: String,
    pub insecure: bool,
    /// Empty selects the only datacenter of the inventory.
    pub datacenter: String,
    /// Empty selects the only resource pool of the datacenter.
    pub resource_pool: String,
    pub template: String,
    /// Deadline for a single clone task.
    pub clone_timeout: Duration,
    /// Deadline for any other API request.
    pub api_timeout: Duration,
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("cluster_name", &self.cluster_name)
            .field("server", &self.server)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("insecure", &self.insecure)
            .field("datacenter", &self.datacenter)
            .field("resource_pool", &self.resource_pool)
            .field("template", &self.template)
            .field("clone_timeout", &self.clone_timeout)
            .field("api_timeout", &self.api_timeout)
            .finish()
    }
}

impl ClusterConfig {
    /// Resolve and validate the file contents.
    ///
    /// The cluster name from the file wins over `cluster_name_option`
    /// (the `--cluster-name` startup flag); both empty is an error, as are
    /// missing endpoint credentials and a missing template.
    pub fn resolve(file: ConfigFile, cluster_name_option: Option<&str>) -> ConfigResult<Self> {
        let g = file.global;

        let cluster_name = non_empty(g.cluster_name)
            .or_else(|| non_empty(cluster_name_option.map(str::to_string)))
            .ok_or(ConfigError::MissingField("cluster-name"))?;
        let server = non_empty(g.server).ok_or(ConfigError::MissingField("server"))?;
        let user = non_empty(g.user).ok_or(ConfigError::MissingField("user"))?;
        let password = non_empty(g.password).ok_or(ConfigError::MissingField("password"))?;
        let template = non_empty(g.template).ok_or(ConfigError::MissingField("template"))?;

        Ok(Self {
            cluster_name,
            server,
            user,
            password,
            insecure: g.insecure_flag.unwrap_or(false),
            datacenter: g.datacenter.unwrap_or_default(),
            resource_pool: g.resource_pool.unwrap_or_default(),
            template,
            clone_timeout: Duration::from_secs(
                g.clone_timeout_secs.unwrap_or(DEFAULT_CLONE_TIMEOUT_SECS),
            ),
            api_timeout: Duration::from_secs(g.api_timeout_secs.unwrap_or(DEFAULT_API_TIMEOUT_SECS)),
        })
    }

    /// Load from an optional file path. Without a file every field must
    /// come from elsewhere, so only the cluster name option can help.
    pub fn load(path: Option<&Path>, cluster_name_option: Option<&str>) -> ConfigResult<Self> {
        let file = match path {
            Some(p) => ConfigFile::from_file(p)?,
            None => ConfigFile::default(),
        };
        Self::resolve(file, cluster_name_option)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// ── Backend selection ──────────────────────────────────────────────

/// Provisioning backend, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManagerKind {
    /// vCenter Automation REST API.
    #[default]
    Rest,
}

impl ManagerKind {
    /// Read the backend from `VSPHERE_MANAGER`, defaulting to `rest`.
    pub fn from_env() -> ConfigResult<Self> {
        match std::env::var(MANAGER_ENV) {
            Ok(value) => value.parse(),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerKind::Rest => "rest",
        }
    }
}

impl FromStr for ManagerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "rest" => Ok(ManagerKind::Rest),
            other => Err(ConfigError::UnknownManager(other.to_string())),
        }
    }
}

impl fmt::Display for ManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
