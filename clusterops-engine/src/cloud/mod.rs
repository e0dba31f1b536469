//! Cloud resource provider interface
//!
//! The engine only needs a narrow slice of the compute and deployment APIs:
//! enumerate VMs and scale sets in a resource group, delete the resources
//! backing a node, and submit/poll template deployments.

pub mod arm;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::error::{EngineError, EngineResult};

pub use arm::ArmClient;

/// Tag carrying the agent pool a resource belongs to
pub const POOL_NAME_TAG: &str = "poolName";
/// Tag carrying the cluster name suffix of a resource
pub const RESOURCE_NAME_SUFFIX_TAG: &str = "resourceNameSuffix";
/// Image publisher of Windows node images
pub const WINDOWS_PUBLISHER: &str = "MicrosoftWindowsServer";

/// Cloud client errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Authentication failed")]
    AuthFailed,
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Unexpected response: {0}")]
    Unexpected(String),
}

pub type CloudResult<T> = std::result::Result<T, CloudError>;

/// Tag lookup failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TagError {
    #[error("tag '{0}' is missing")]
    Missing(String),
    #[error("tag '{0}' is empty")]
    Empty(String),
}

/// Resource tags with checked access
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(HashMap<String, String>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `key`, or an explicit error when it is absent or blank
    pub fn get(&self, key: &str) -> Result<&str, TagError> {
        match self.0.get(key) {
            None => Err(TagError::Missing(key.to_string())),
            Some(v) if v.trim().is_empty() => Err(TagError::Empty(key.to_string())),
            Some(v) => Ok(v.as_str()),
        }
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }
}

impl From<HashMap<String, String>> for Tags {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

/// A virtual machine as listed in a resource group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub os_publisher: Option<String>,
    /// Resource ids of attached network interfaces
    #[serde(default)]
    pub nic_ids: Vec<String>,
    /// Resource id of the managed OS disk
    #[serde(default)]
    pub os_disk_id: Option<String>,
}

/// A scale set as listed in a resource group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tags: Tags,
    pub capacity: u32,
    /// Image publisher of the instance model
    #[serde(default)]
    pub os_publisher: Option<String>,
}

/// One instance of a scale set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSetInstance {
    pub instance_id: String,
    /// Hostname, which is also the Kubernetes node name
    pub computer_name: String,
}

/// Provisioning state of a template deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentState {
    Accepted,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Other(String),
}

impl DeploymentState {
    pub fn parse(state: &str) -> Self {
        match state {
            "Accepted" => Self::Accepted,
            "Running" | "Deploying" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "Canceled" => Self::Canceled,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// Status of a submitted deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub name: String,
    pub state: DeploymentState,
    #[serde(default)]
    pub error: Option<String>,
}

/// Operations the engine needs from the cloud
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn list_virtual_machines(&self, resource_group: &str) -> CloudResult<Vec<VirtualMachine>>;

    async fn list_scale_sets(&self, resource_group: &str) -> CloudResult<Vec<ScaleSet>>;

    async fn list_scale_set_instances(
        &self,
        resource_group: &str,
        scale_set: &str,
    ) -> CloudResult<Vec<ScaleSetInstance>>;

    async fn delete_virtual_machine(&self, resource_group: &str, name: &str) -> CloudResult<()>;

    /// Delete a network interface by resource id
    async fn delete_network_interface(&self, id: &str) -> CloudResult<()>;

    /// Delete a managed disk by resource id
    async fn delete_managed_disk(&self, id: &str) -> CloudResult<()>;

    async fn delete_scale_set_instance(
        &self,
        resource_group: &str,
        scale_set: &str,
        instance_id: &str,
    ) -> CloudResult<()>;

    /// Submit an incremental template deployment
    async fn submit_deployment(
        &self,
        resource_group: &str,
        name: &str,
        template: &serde_json::Value,
        parameters: &serde_json::Value,
    ) -> CloudResult<DeploymentStatus>;

    async fn get_deployment(&self, resource_group: &str, name: &str) -> CloudResult<DeploymentStatus>;
}

/// Poll a deployment until it reaches a terminal state.
///
/// Only `Succeeded` is returned as `Ok`; `Failed` and `Canceled` become
/// [`EngineError::Deployment`].
pub async fn wait_for_deployment(
    cloud: &dyn CloudProvider,
    resource_group: &str,
    name: &str,
    poll_interval: Duration,
) -> EngineResult<DeploymentStatus> {
    loop {
        let status = cloud.get_deployment(resource_group, name).await?;
        tracing::debug!(deployment = name, state = ?status.state, "Deployment status");

        match status.state {
            DeploymentState::Succeeded => return Ok(status),
            DeploymentState::Failed | DeploymentState::Canceled => {
                return Err(EngineError::Deployment {
                    name: name.to_string(),
                    message: status
                        .error
                        .unwrap_or_else(|| format!("deployment ended in state {:?}", status.state)),
                });
            }
            _ => tokio::time::sleep(poll_interval).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_checked_access() {
        let tags = Tags::new()
            .with(POOL_NAME_TAG, "agentpool1")
            .with(RESOURCE_NAME_SUFFIX_TAG, " ");

        assert_eq!(tags.get(POOL_NAME_TAG), Ok("agentpool1"));
        assert_eq!(
            tags.get(RESOURCE_NAME_SUFFIX_TAG),
            Err(TagError::Empty(RESOURCE_NAME_SUFFIX_TAG.to_string()))
        );
        assert_eq!(
            tags.get("orchestrator"),
            Err(TagError::Missing("orchestrator".to_string()))
        );
    }

    #[test]
    fn test_tags_deserialize_from_plain_map() {
        let vm: VirtualMachine = serde_json::from_str(
            r#"{"id":"/x","name":"k8s-agentpool1-12345678-0","tags":{"poolName":"agentpool1"}}"#,
        )
        .unwrap();
        assert_eq!(vm.tags.get(POOL_NAME_TAG), Ok("agentpool1"));
        assert!(vm.nic_ids.is_empty());
    }

    #[test]
    fn test_deployment_state_parse() {
        assert_eq!(DeploymentState::parse("Succeeded"), DeploymentState::Succeeded);
        assert_eq!(DeploymentState::parse("Deploying"), DeploymentState::Running);
        assert!(DeploymentState::parse("Canceled").is_terminal());
        assert!(!DeploymentState::parse("Accepted").is_terminal());
        assert_eq!(
            DeploymentState::parse("Updating"),
            DeploymentState::Other("Updating".to_string())
        );
    }
}
