//! Kubernetes integration
//!
//! The engine talks to a cluster's API server for one thing only: moving
//! workloads off a node before the machine under it is deleted.

pub mod client;
pub mod error;
pub mod nodes;

use async_trait::async_trait;

use crate::error::EngineResult;
use client::K8sClient;
pub use client::normalize_endpoint;
pub use error::{K8sError, K8sResult};
pub use nodes::DrainOptions;

/// Cluster control plane as seen by the drain coordinator
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Cordon `node` and evict its pods
    async fn drain_node(&self, kubeconfig: &str, master_endpoint: &str, node: &str) -> EngineResult<()>;
}

/// Control plane reached through kube-rs
#[derive(Debug, Clone, Default)]
pub struct KubeControlPlane {
    options: DrainOptions,
}

impl KubeControlPlane {
    pub fn new(options: DrainOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn drain_node(&self, kubeconfig: &str, master_endpoint: &str, node: &str) -> EngineResult<()> {
        let client = K8sClient::from_kubeconfig(kubeconfig, master_endpoint).await?;
        tracing::debug!(node, api_server = client.api_server(), "Draining node");
        nodes::drain_node(&client, node, &self.options).await?;
        Ok(())
    }
}
