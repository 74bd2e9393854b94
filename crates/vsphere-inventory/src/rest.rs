//! vCenter Automation REST API backend.
//!
//! ```text
//! POST /api/session                                         → session token
//! GET  /api/cis/tagging/tag                                 → tag ids
//! GET  /api/cis/tagging/tag/{id}                            → tag (name lookup)
//! POST /api/cis/tagging/tag-association/{id}?action=list-attached-objects
//! POST /api/cis/tagging/tag-association/{id}?action=attach
//! GET  /api/vcenter/{datacenter,resource-pool,folder,vm}    → placement lookup
//! GET  /api/vcenter/vm/{vm}                                 → name, BIOS UUID
//! POST /api/vcenter/vm?action=clone                         → new vm id
//! ```
//!
//! The clone endpoint answers once the clone task has finished, so it is
//! sent without the per-request timeout; callers impose their own deadline.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};
use vsphere_core::{ClusterConfig, ManagedObjectRef};

use crate::client::{CloneRequest, InventoryClient};
use crate::error::{InventoryError, InventoryResult};

/// Header carrying the session token on every authenticated request.
pub const SESSION_HEADER: &str = "vmware-api-session-id";

/// Name of the root VM folder of a datacenter.
const VM_FOLDER: &str = "vm";

#[derive(Debug, Deserialize)]
struct TagModel {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DatacenterSummary {
    datacenter: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ResourcePoolSummary {
    resource_pool: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct FolderSummary {
    folder: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct VmSummary {
    vm: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct VmInfo {
    name: String,
    identity: Option<VmIdentity>,
}

#[derive(Debug, Deserialize)]
struct VmIdentity {
    bios_uuid: String,
}

/// Error type vCenter reports when a name is already taken.
const ALREADY_EXISTS: &str = "ALREADY_EXISTS";

/// Inventory client for a vCenter endpoint.
pub struct RestInventory {
    http: reqwest::Client,
    base_url: String,
    session: String,
    api_timeout: Duration,
}

impl RestInventory {
    /// Log in to `https://<server>` with the configured credentials.
    pub async fn connect(config: &ClusterConfig) -> InventoryResult<Self> {
        let base_url = format!("https://{}", config.server);
        Self::connect_to(
            &base_url,
            &config.user,
            &config.password,
            config.insecure,
            config.api_timeout,
        )
        .await
    }

    /// Log in to an explicit base URL (scheme, host and port).
    pub async fn connect_to(
        base_url: &str,
        user: &str,
        password: &str,
        insecure: bool,
        api_timeout: Duration,
    ) -> InventoryResult<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .connect_timeout(api_timeout)
            .build()
            .map_err(|e| InventoryError::Request(format!("failed to build HTTP client: {e}")))?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let resp = http
            .post(format!("{base_url}/api/session"))
            .basic_auth(user, Some(password))
            .timeout(api_timeout)
            .send()
            .await
            .map_err(|e| InventoryError::Request(format!("session login failed: {e}")))?;

        if matches!(resp.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(InventoryError::Auth(format!(
                "login as {user} rejected with {}",
                resp.status()
            )));
        }
        let session: String = decode(resp).await?;

        info!(url = %base_url, "vsphere client configured");
        Ok(Self {
            http,
            base_url,
            session,
            api_timeout,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header(SESSION_HEADER, &self.session)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> InventoryResult<T> {
        let resp = req
            .timeout(self.api_timeout)
            .send()
            .await
            .map_err(map_send_err(self.api_timeout))?;
        decode(resp).await
    }

    async fn send_empty(&self, req: RequestBuilder) -> InventoryResult<()> {
        let resp = req
            .timeout(self.api_timeout)
            .send()
            .await
            .map_err(map_send_err(self.api_timeout))?;
        check_status(resp).await.map(|_| ())
    }

    /// Find a tag id by name; `None` when no tag has that name.
    async fn tag_id(&self, tag: &str) -> InventoryResult<Option<String>> {
        let ids: Vec<String> = self
            .send(self.request(Method::GET, "/api/cis/tagging/tag"))
            .await?;
        for id in ids {
            let model: TagModel = self
                .send(self.request(Method::GET, &format!("/api/cis/tagging/tag/{id}")))
                .await?;
            if model.name == tag {
                return Ok(Some(model.id));
            }
        }
        Ok(None)
    }

    async fn find_datacenter(&self, name: &str) -> InventoryResult<String> {
        let mut req = self.request(Method::GET, "/api/vcenter/datacenter");
        if !name.is_empty() {
            req = req.query(&[("names", name)]);
        }
        let found: Vec<DatacenterSummary> = self.send(req).await?;
        pick("datacenter", name, found.into_iter().map(|d| (d.datacenter, d.name)))
    }

    async fn find_resource_pool(&self, datacenter: &str, name: &str) -> InventoryResult<String> {
        let mut req = self
            .request(Method::GET, "/api/vcenter/resource-pool")
            .query(&[("datacenters", datacenter)]);
        if !name.is_empty() {
            req = req.query(&[("names", name)]);
        }
        let found: Vec<ResourcePoolSummary> = self.send(req).await?;
        pick(
            "resource pool",
            name,
            found.into_iter().map(|p| (p.resource_pool, p.name)),
        )
    }

    async fn find_vm_folder(&self, datacenter: &str) -> InventoryResult<String> {
        let req = self.request(Method::GET, "/api/vcenter/folder").query(&[
            ("datacenters", datacenter),
            ("type", "VIRTUAL_MACHINE"),
            ("names", VM_FOLDER),
        ]);
        let found: Vec<FolderSummary> = self.send(req).await?;
        pick("folder", VM_FOLDER, found.into_iter().map(|f| (f.folder, f.name)))
    }

    async fn vm_info(&self, object: &ManagedObjectRef) -> InventoryResult<VmInfo> {
        self.send(self.request(Method::GET, &format!("/api/vcenter/vm/{}", object.id)))
            .await
    }

    async fn find_vm(&self, datacenter: &str, name: &str) -> InventoryResult<String> {
        let req = self
            .request(Method::GET, "/api/vcenter/vm")
            .query(&[("datacenters", datacenter), ("names", name)]);
        let found: Vec<VmSummary> = self.send(req).await?;
        pick("template", name, found.into_iter().map(|v| (v.vm, v.name)))
    }
}

#[async_trait]
impl InventoryClient for RestInventory {
    async fn resolve_tag_members(&self, tag: &str) -> InventoryResult<HashSet<ManagedObjectRef>> {
        let Some(id) = self.tag_id(tag).await? else {
            debug!(%tag, "tag does not exist");
            return Ok(HashSet::new());
        };
        let req = self
            .request(Method::POST, &format!("/api/cis/tagging/tag-association/{id}"))
            .query(&[("action", "list-attached-objects")]);
        let objects: Vec<ManagedObjectRef> = self.send(req).await?;
        Ok(objects.into_iter().collect())
    }

    async fn attach_tag(&self, tag: &str, object: &ManagedObjectRef) -> InventoryResult<()> {
        let id = self
            .tag_id(tag)
            .await?
            .ok_or_else(|| InventoryError::NotFound(format!("tag {tag}")))?;
        let req = self
            .request(Method::POST, &format!("/api/cis/tagging/tag-association/{id}"))
            .query(&[("action", "attach")])
            .json(&json!({ "object_id": object }));
        self.send_empty(req).await
    }

    async fn object_name(&self, object: &ManagedObjectRef) -> InventoryResult<String> {
        Ok(self.vm_info(object).await?.name)
    }

    async fn object_uuid(&self, object: &ManagedObjectRef) -> InventoryResult<String> {
        self.vm_info(object)
            .await?
            .identity
            .map(|identity| identity.bios_uuid)
            .ok_or_else(|| InventoryError::Decode(format!("{object} has no identity")))
    }

    async fn clone_template(&self, request: &CloneRequest) -> InventoryResult<ManagedObjectRef> {
        let datacenter = self.find_datacenter(&request.datacenter).await?;
        let pool = self
            .find_resource_pool(&datacenter, &request.resource_pool)
            .await?;
        let folder = self.find_vm_folder(&datacenter).await?;
        let source = self.find_vm(&datacenter, &request.template).await?;

        info!(template = %source, name = %request.name, "cloning");

        let body = json!({
            "source": source,
            "name": request.name,
            "placement": { "folder": folder, "resource_pool": pool },
            "power_on": true,
        });
        let resp = self
            .request(Method::POST, "/api/vcenter/vm")
            .query(&[("action", "clone")])
            .json(&body)
            .send()
            .await
            .map_err(|e| InventoryError::Request(e.to_string()))?;
        let id: String = decode(resp).await?;
        Ok(ManagedObjectRef::vm(id))
    }
}

fn map_send_err(timeout: Duration) -> impl Fn(reqwest::Error) -> InventoryError {
    move |e| {
        if e.is_timeout() {
            InventoryError::Timeout(timeout)
        } else {
            InventoryError::Request(e.to_string())
        }
    }
}

async fn check_status(resp: reqwest::Response) -> InventoryResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(InventoryError::Auth(body)),
        StatusCode::NOT_FOUND => Err(InventoryError::NotFound(body)),
        StatusCode::BAD_REQUEST if body.contains(ALREADY_EXISTS) => {
            Err(InventoryError::AlreadyExists(body))
        }
        _ => Err(InventoryError::Status {
            status: status.as_u16(),
            body,
        }),
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> InventoryResult<T> {
    let resp = check_status(resp).await?;
    resp.json()
        .await
        .map_err(|e| InventoryError::Decode(e.to_string()))
}

/// Select exactly one `(id, name)` candidate.
///
/// An empty `name` means "the default": valid only when the inventory
/// holds a single candidate.
fn pick(
    kind: &'static str,
    name: &str,
    candidates: impl Iterator<Item = (String, String)>,
) -> InventoryResult<String> {
    let matching: Vec<String> = candidates
        .filter(|(_, n)| name.is_empty() || n == name)
        .map(|(id, _)| id)
        .collect();
    match matching.as_slice() {
        [] if name.is_empty() => Err(InventoryError::NotFound(format!("default {kind}"))),
        [] => Err(InventoryError::NotFound(format!("{kind} {name}"))),
        [id] => Ok(id.clone()),
        _ => Err(InventoryError::Ambiguous {
            kind,
            count: matching.len(),
        }),
    }
}
