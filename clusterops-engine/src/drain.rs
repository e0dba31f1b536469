//! Drain-and-delete coordination
//!
//! Every node in a batch is drained and deleted on its own task. All tasks
//! are joined before returning, and every failure is reported, not just the
//! first one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::cloud::CloudProvider;
use crate::error::{EngineError, EngineResult, NodeFailure};
use crate::kubernetes::{normalize_endpoint, ControlPlane};
use crate::resolver::{NodeRecord, NodeTarget};
use crate::{log_node_operation, log_performance};

/// Default upper bound on draining one node
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Drains nodes through the control plane and deletes their compute resources
#[derive(Clone)]
pub struct DrainCoordinator {
    cloud: Arc<dyn CloudProvider>,
    control_plane: Arc<dyn ControlPlane>,
    resource_group: String,
    drain_timeout: Duration,
}

impl DrainCoordinator {
    pub fn new(
        cloud: Arc<dyn CloudProvider>,
        control_plane: Arc<dyn ControlPlane>,
        resource_group: &str,
    ) -> Self {
        Self {
            cloud,
            control_plane,
            resource_group: resource_group.to_string(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Drain and delete every node in `nodes` concurrently
    pub async fn drain_and_delete(
        &self,
        nodes: Vec<NodeRecord>,
        kubeconfig: &str,
        master_endpoint: &str,
    ) -> EngineResult<()> {
        if nodes.is_empty() {
            return Ok(());
        }

        let start_time = Instant::now();
        let endpoint = normalize_endpoint(master_endpoint);
        let kubeconfig: Arc<str> = Arc::from(kubeconfig);
        let batch = nodes.len();

        info!(
            nodes = batch,
            endpoint = %endpoint,
            "Draining and deleting nodes"
        );

        let mut join_set = JoinSet::new();
        let mut task_nodes = HashMap::with_capacity(batch);
        for node in nodes {
            let worker = self.clone();
            let kubeconfig = kubeconfig.clone();
            let endpoint = endpoint.clone();
            let name = node.name.clone();

            let handle = join_set.spawn(async move {
                worker.drain_and_delete_node(&node, &kubeconfig, &endpoint).await
            });
            task_nodes.insert(handle.id(), name);
        }

        let mut failures = Vec::new();
        while let Some(joined) = join_set.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => (e.id(), Err(EngineError::ControlPlane(format!("task error: {}", e)))),
            };
            let node = task_nodes
                .remove(&id)
                .unwrap_or_else(|| format!("task {}", id));

            match result {
                Ok(()) => {
                    log_node_operation!("drain_and_delete", node, status = "deleted");
                }
                Err(e) => {
                    error!(node = %node, "Drain and delete failed: {}", e);
                    failures.push(NodeFailure {
                        node,
                        cause: e.to_string(),
                    });
                }
            }
        }

        log_performance!("drain_and_delete", start_time.elapsed().as_millis() as u64);

        if failures.is_empty() {
            Ok(())
        } else {
            failures.sort_by(|a, b| a.node.cmp(&b.node));
            Err(EngineError::Drain(failures))
        }
    }

    async fn drain_and_delete_node(
        &self,
        node: &NodeRecord,
        kubeconfig: &str,
        endpoint: &str,
    ) -> EngineResult<()> {
        log_node_operation!("drain", node.name);

        match tokio::time::timeout(
            self.drain_timeout,
            self.control_plane.drain_node(kubeconfig, endpoint, &node.name),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(EngineError::Timeout {
                    operation: format!("drain of {}", node.name),
                    timeout: self.drain_timeout,
                })
            }
        }

        self.delete_node(node).await
    }

    /// Delete the compute resources of a node without draining it
    pub async fn delete_node(&self, node: &NodeRecord) -> EngineResult<()> {
        log_node_operation!("delete", node.name);
        self.delete_target(&node.target).await
    }

    async fn delete_target(&self, target: &NodeTarget) -> EngineResult<()> {
        match target {
            NodeTarget::VirtualMachine {
                name,
                nic_ids,
                os_disk_id,
            } => {
                self.cloud
                    .delete_virtual_machine(&self.resource_group, name)
                    .await?;

                match nic_ids.first() {
                    Some(nic) => self.cloud.delete_network_interface(nic).await?,
                    None => warn!(node = %name, "VM has no network interface to delete"),
                }

                match os_disk_id {
                    Some(disk) => self.cloud.delete_managed_disk(disk).await?,
                    None => warn!(node = %name, "VM has no managed OS disk to delete"),
                }

                Ok(())
            }
            NodeTarget::ScaleSetInstance {
                scale_set,
                instance_id,
            } => {
                self.cloud
                    .delete_scale_set_instance(&self.resource_group, scale_set, instance_id)
                    .await?;
                Ok(())
            }
        }
    }
}
