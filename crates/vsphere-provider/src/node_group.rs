//! Node group — bounded size, cached target, serialized scale-up.
//!
//! `increase_size` runs inside a critical section guarded by a
//! [`ResizeLock`] shared by every node group of the cluster, so at most
//! one resize is in flight per process. Membership reads (`nodes`) take no
//! lock and may observe a group mid-resize.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use vsphere_core::NodeGroupSpec;

use crate::cloudprovider::{Instance, Node, NodeGroup};
use crate::error::{ProviderError, ProviderResult};
use crate::manager::Manager;

/// Whether a node group may be configured with a minimum of zero.
pub const SUPPORT_SCALE_TO_ZERO: bool = true;

/// Cluster-wide resize lock. Clones share the same lock; waiters are
/// served in arrival order.
#[derive(Clone, Default)]
pub struct ResizeLock(Arc<Mutex<()>>);

impl ResizeLock {
    pub fn new() -> Self {
        Self::default()
    }

    async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock().await
    }
}

pub struct VsphereNodeGroup {
    id: String,
    min_size: u32,
    max_size: u32,
    /// Written only while holding `resize_lock`.
    target_size: AtomicU32,
    resize_lock: ResizeLock,
    manager: Arc<dyn Manager>,
}

impl VsphereNodeGroup {
    pub fn new(
        spec: NodeGroupSpec,
        target_size: u32,
        resize_lock: ResizeLock,
        manager: Arc<dyn Manager>,
    ) -> Self {
        Self {
            id: spec.name,
            min_size: spec.min_size,
            max_size: spec.max_size,
            target_size: AtomicU32::new(target_size),
            resize_lock,
            manager,
        }
    }

    /// Build a group whose target size is seeded from the live member count.
    pub async fn discover(
        spec: NodeGroupSpec,
        resize_lock: ResizeLock,
        manager: Arc<dyn Manager>,
    ) -> ProviderResult<Self> {
        let size = manager.node_group_size(&spec.name).await?;
        if size < spec.min_size || size > spec.max_size {
            warn!(
                node_group = %spec.name,
                size,
                min = spec.min_size,
                max = spec.max_size,
                "node group size is outside its bounds"
            );
        }
        info!(node_group = %spec.name, size, "found node group");
        Ok(Self::new(spec, size, resize_lock, manager))
    }
}

#[async_trait]
impl NodeGroup for VsphereNodeGroup {
    fn id(&self) -> &str {
        &self.id
    }

    fn min_size(&self) -> u32 {
        self.min_size
    }

    fn max_size(&self) -> u32 {
        self.max_size
    }

    fn target_size(&self) -> ProviderResult<u32> {
        Ok(self.target_size.load(Ordering::SeqCst))
    }

    async fn increase_size(&self, delta: i32) -> ProviderResult<()> {
        let _guard = self.resize_lock.acquire().await;

        if delta <= 0 {
            return Err(ProviderError::InvalidArgument(
                "node group size increase must be positive".to_string(),
            ));
        }
        let delta = delta.unsigned_abs();

        // Bound check against the platform, not the cached target.
        let size = self.manager.node_group_size(&self.id).await?;
        let desired = u64::from(size) + u64::from(delta);
        if desired > u64::from(self.max_size) {
            return Err(ProviderError::SizeLimitExceeded {
                desired,
                max: self.max_size,
            });
        }

        let previous = self.target_size.load(Ordering::SeqCst);
        if previous != size {
            warn!(node_group = %self.id, target = previous, size, "target size drifted from membership");
        }
        let target = previous.saturating_add(delta).min(self.max_size);
        info!(node_group = %self.id, delta, from = previous, to = target, "increasing size");
        self.target_size.store(target, Ordering::SeqCst);

        match self.manager.create_nodes(&self.id, delta).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // Count only the VMs that made it on top of the previous target.
                let created = match &err {
                    ProviderError::PartialProvisioning { created, .. } => *created,
                    _ => 0,
                };
                let corrected = previous.saturating_add(created).min(self.max_size);
                warn!(
                    node_group = %self.id,
                    created,
                    target = corrected,
                    error = %err,
                    "could not increase node group size"
                );
                self.target_size.store(corrected, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    async fn decrease_target_size(&self, _delta: i32) -> ProviderResult<()> {
        Err(ProviderError::NotImplemented)
    }

    async fn delete_nodes(&self, _nodes: &[Node]) -> ProviderResult<()> {
        Err(ProviderError::NotImplemented)
    }

    async fn nodes(&self) -> ProviderResult<Vec<Instance>> {
        let ids = self.manager.get_nodes(&self.id).await?;
        Ok(ids.into_iter().map(|id| Instance { id }).collect())
    }

    fn debug(&self) -> String {
        format!(
            "{} (min: {}, max: {}, target: {})",
            self.id,
            self.min_size,
            self.max_size,
            self.target_size.load(Ordering::SeqCst)
        )
    }

    /// Groups come from static discovery specs and always exist.
    fn exist(&self) -> bool {
        true
    }

    async fn create(&self) -> ProviderResult<Arc<dyn NodeGroup>> {
        Err(ProviderError::AlreadyExist)
    }

    async fn delete(&self) -> ProviderResult<()> {
        Err(ProviderError::NotImplemented)
    }

    fn autoprovisioned(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use vsphere_inventory::InventoryError;

    /// Manager with a fixed live size that records what it was asked to do.
    #[derive(Default)]
    struct FakeManager {
        size: u32,
        fail: u32,
        unreachable: bool,
        delay: Duration,
        calls: StdMutex<Vec<String>>,
    }

    impl FakeManager {
        fn with_size(size: u32) -> Self {
            Self {
                size,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Manager for FakeManager {
        async fn node_group_size(&self, _node_group: &str) -> ProviderResult<u32> {
            Ok(self.size)
        }

        async fn create_nodes(&self, node_group: &str, count: u32) -> ProviderResult<()> {
            self.calls.lock().unwrap().push(format!("start {node_group} {count}"));
            if self.unreachable {
                return Err(InventoryError::Request("connection refused".to_string()).into());
            }
            tokio::time::sleep(self.delay).await;
            self.calls.lock().unwrap().push(format!("end {node_group} {count}"));
            if self.fail > 0 {
                return Err(ProviderError::PartialProvisioning {
                    requested: count,
                    created: count - self.fail,
                    failures: vec!["boom".to_string(); self.fail as usize],
                });
            }
            Ok(())
        }

        async fn get_nodes(&self, _node_group: &str) -> ProviderResult<Vec<String>> {
            Ok((1..=self.size).map(|i| format!("vm-{i}")).collect())
        }

        async fn get_node_names(&self, _node_group: &str) -> ProviderResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn spec(min: u32, max: u32, name: &str) -> NodeGroupSpec {
        NodeGroupSpec {
            name: name.to_string(),
            min_size: min,
            max_size: max,
        }
    }

    async fn group(manager: Arc<FakeManager>) -> VsphereNodeGroup {
        VsphereNodeGroup::discover(spec(1, 5, "pool-a"), ResizeLock::new(), manager)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn reports_spec_bounds_and_seeded_target() {
        let ng = group(Arc::new(FakeManager::with_size(2))).await;
        assert_eq!(ng.id(), "pool-a");
        assert_eq!(ng.min_size(), 1);
        assert_eq!(ng.max_size(), 5);
        assert_eq!(ng.target_size().unwrap(), 2);
        assert_eq!(ng.debug(), "pool-a (min: 1, max: 5, target: 2)");
    }

    #[tokio::test]
    async fn increase_within_bounds() {
        let manager = Arc::new(FakeManager::with_size(2));
        let ng = group(manager.clone()).await;

        ng.increase_size(2).await.unwrap();

        assert_eq!(ng.target_size().unwrap(), 4);
        assert_eq!(manager.calls(), ["start pool-a 2", "end pool-a 2"]);
    }

    #[tokio::test]
    async fn non_positive_delta_rejected() {
        let manager = Arc::new(FakeManager::with_size(2));
        let ng = group(manager.clone()).await;

        for delta in [0, -1, i32::MIN] {
            let err = ng.increase_size(delta).await.unwrap_err();
            assert!(matches!(err, ProviderError::InvalidArgument(_)));
        }
        assert_eq!(ng.target_size().unwrap(), 2);
        assert!(manager.calls().is_empty());
    }

    #[tokio::test]
    async fn increase_past_max_rejected() {
        let manager = Arc::new(FakeManager::with_size(2));
        let ng = group(manager.clone()).await;

        let err = ng.increase_size(10).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::SizeLimitExceeded { desired: 12, max: 5 }
        ));
        assert_eq!(ng.target_size().unwrap(), 2);
        assert!(manager.calls().is_empty());
    }

    #[tokio::test]
    async fn bound_check_uses_live_size() {
        // Cached target says 1, the platform already has 4.
        let manager = Arc::new(FakeManager::with_size(4));
        let ng = VsphereNodeGroup::new(spec(1, 5, "pool-a"), 1, ResizeLock::new(), manager);

        assert!(ng.increase_size(2).await.is_err());
        assert_eq!(ng.target_size().unwrap(), 1);
    }

    #[tokio::test]
    async fn partial_failure_lowers_target_by_failed_count() {
        let manager = Arc::new(FakeManager {
            size: 1,
            fail: 1,
            ..FakeManager::default()
        });
        let ng = group(manager).await;

        let err = ng.increase_size(3).await.unwrap_err();
        assert!(matches!(err, ProviderError::PartialProvisioning { created: 2, .. }));
        assert_eq!(ng.target_size().unwrap(), 3);
    }

    #[tokio::test]
    async fn failed_create_restores_drifted_target() {
        // Cached target already at max while the platform only has 2.
        let manager = Arc::new(FakeManager {
            size: 2,
            unreachable: true,
            ..FakeManager::default()
        });
        let ng = VsphereNodeGroup::new(spec(1, 5, "pool-a"), 5, ResizeLock::new(), manager);

        let err = ng.increase_size(2).await.unwrap_err();
        assert!(matches!(err, ProviderError::Inventory(InventoryError::Request(_))));
        assert_eq!(ng.target_size().unwrap(), 5);
    }

    #[tokio::test]
    async fn partial_failure_with_drifted_target_stays_within_max() {
        let manager = Arc::new(FakeManager {
            size: 2,
            fail: 1,
            ..FakeManager::default()
        });
        let ng = VsphereNodeGroup::new(spec(1, 5, "pool-a"), 5, ResizeLock::new(), manager);

        let err = ng.increase_size(2).await.unwrap_err();
        assert!(matches!(err, ProviderError::PartialProvisioning { created: 1, .. }));
        assert_eq!(ng.target_size().unwrap(), 5);
    }

    #[tokio::test]
    async fn failed_create_without_drift_rolls_back() {
        let manager = Arc::new(FakeManager {
            size: 2,
            unreachable: true,
            ..FakeManager::default()
        });
        let ng = group(manager).await;

        assert!(ng.increase_size(2).await.is_err());
        assert_eq!(ng.target_size().unwrap(), 2);
    }

    #[tokio::test]
    async fn target_below_min_follows_live_size() {
        // Seeded below min: the target reports what exists, not the minimum.
        let manager = Arc::new(FakeManager::with_size(0));
        let ng = VsphereNodeGroup::discover(spec(3, 5, "pool-a"), ResizeLock::new(), manager)
            .await
            .unwrap();
        assert_eq!(ng.target_size().unwrap(), 0);

        ng.increase_size(1).await.unwrap();
        assert_eq!(ng.target_size().unwrap(), 1);
    }

    #[tokio::test]
    async fn unsupported_operations_say_so() {
        let ng = group(Arc::new(FakeManager::with_size(2))).await;
        assert!(ng.decrease_target_size(1).await.unwrap_err().is_not_implemented());
        assert!(ng.delete_nodes(&[]).await.unwrap_err().is_not_implemented());
        assert!(ng.delete().await.unwrap_err().is_not_implemented());
        assert!(matches!(
            ng.create().await.err().unwrap(),
            ProviderError::AlreadyExist
        ));
        assert!(ng.exist());
        assert!(!ng.autoprovisioned());
    }

    #[tokio::test]
    async fn nodes_lists_live_members() {
        let ng = group(Arc::new(FakeManager::with_size(2))).await;
        let nodes = ng.nodes().await.unwrap();
        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["vm-1", "vm-2"]);
    }

    #[tokio::test]
    async fn concurrent_resizes_are_serialized() {
        let lock = ResizeLock::new();
        let manager = Arc::new(FakeManager {
            size: 0,
            delay: Duration::from_millis(50),
            ..FakeManager::default()
        });
        let a = Arc::new(VsphereNodeGroup::new(spec(0, 5, "a"), 0, lock.clone(), manager.clone()));
        let b = Arc::new(VsphereNodeGroup::new(spec(0, 5, "b"), 0, lock, manager.clone()));

        let first = tokio::spawn({
            let a = a.clone();
            async move { a.increase_size(1).await }
        });
        // Let the first caller take the lock before the second arrives.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = tokio::spawn({
            let b = b.clone();
            async move { b.increase_size(2).await }
        });

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(
            manager.calls(),
            ["start a 1", "end a 1", "start b 2", "end b 2"]
        );
        assert_eq!(a.target_size().unwrap(), 1);
        assert_eq!(b.target_size().unwrap(), 2);
    }
}
