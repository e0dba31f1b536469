//! Common types shared between clusterops-engine and clusterops-cli
//!
//! The cluster specification is the declared state of one Kubernetes cluster:
//! its master profile, its agent pools and the Kubernetes version. It is read
//! by every engine component and only rewritten after a cloud-side change
//! has been accepted.

pub mod auth;

use auth::ServicePrincipalProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Operating system of the nodes in an agent pool
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OsType {
    #[default]
    Linux,
    Windows,
}

impl std::fmt::Display for OsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linux => write!(f, "Linux"),
            Self::Windows => write!(f, "Windows"),
        }
    }
}

/// How the nodes of a pool are provisioned
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PoolTopology {
    /// Individually named VMs carrying an ordinal index
    #[default]
    AvailabilitySet,
    /// One scale set resource whose capacity is the node count
    VirtualMachineScaleSets,
}

impl std::fmt::Display for PoolTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AvailabilitySet => write!(f, "AvailabilitySet"),
            Self::VirtualMachineScaleSets => write!(f, "VirtualMachineScaleSets"),
        }
    }
}

/// Control plane profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MasterProfile {
    pub count: u32,
    pub vm_size: String,
    pub dns_prefix: String,
    /// Public FQDN of the API server, filled in after the first deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
}

/// A named, homogeneous group of worker nodes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentPool {
    pub name: String,
    pub count: u32,
    pub vm_size: String,
    #[serde(default)]
    pub os_type: OsType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_disk_size_gb: Option<u32>,
    #[serde(default)]
    pub topology: PoolTopology,
}

impl AgentPool {
    pub fn is_availability_set(&self) -> bool {
        self.topology == PoolTopology::AvailabilitySet
    }

    pub fn is_scale_set(&self) -> bool {
        self.topology == PoolTopology::VirtualMachineScaleSets
    }

    pub fn is_windows(&self) -> bool {
        self.os_type == OsType::Windows
    }
}

/// Declared state of a cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterSpecification {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    /// Cluster-unique token embedded in every resource name
    pub name_suffix: String,
    pub kubernetes_version: String,
    pub master: MasterProfile,
    pub agent_pools: Vec<AgentPool>,
    pub service_principal: ServicePrincipalProfile,
    /// Admin kubeconfig for the cluster
    #[serde(default)]
    pub kube_config: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl ClusterSpecification {
    /// Look up an agent pool by name
    pub fn agent_pool(&self, name: &str) -> Result<&AgentPool> {
        self.agent_pools
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::PoolNotFound(name.to_string()))
    }

    /// Copy of this specification with one pool's count changed
    pub fn with_pool_count(&self, pool: &str, count: u32) -> Result<Self> {
        let mut updated = self.clone();
        let target = updated
            .agent_pools
            .iter_mut()
            .find(|p| p.name == pool)
            .ok_or_else(|| Error::PoolNotFound(pool.to_string()))?;
        target.count = count;
        Ok(updated)
    }

    /// Copy of this specification declared at a new Kubernetes version
    pub fn with_version(&self, version: &str) -> Self {
        let mut updated = self.clone();
        updated.kubernetes_version = version.to_string();
        updated
    }

    /// Copy of this specification restricted to a single agent pool,
    /// used to generate a deployment that only touches that pool
    pub fn single_pool(&self, pool: &str) -> Result<Self> {
        let selected = self.agent_pool(pool)?.clone();
        let mut updated = self.clone();
        updated.agent_pools = vec![selected];
        Ok(updated)
    }

    /// Copy of this specification without agent pools, used to redeploy
    /// control plane nodes
    pub fn masters_only(&self) -> Self {
        let mut updated = self.clone();
        updated.agent_pools.clear();
        updated
    }

    /// Control plane endpoint, either the recorded FQDN or the one derived
    /// from the DNS prefix and location
    pub fn master_endpoint(&self) -> String {
        match &self.master.fqdn {
            Some(fqdn) if !fqdn.is_empty() => fqdn.clone(),
            _ => format!(
                "{}.{}.cloudapp.azure.com",
                self.master.dns_prefix, self.location
            ),
        }
    }

    pub fn agent_pool_names(&self) -> Vec<String> {
        self.agent_pools.iter().map(|p| p.name.clone()).collect()
    }

    /// Structural checks that do not need the cloud
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Validation("cluster name cannot be empty".to_string()));
        }
        if self.resource_group.is_empty() {
            return Err(Error::Validation(
                "resource group cannot be empty".to_string(),
            ));
        }
        if self.name_suffix.is_empty() {
            return Err(Error::Validation("name suffix cannot be empty".to_string()));
        }
        if ![1, 3, 5].contains(&self.master.count) {
            return Err(Error::Validation(format!(
                "master count must be 1, 3 or 5 (got {})",
                self.master.count
            )));
        }
        if self.agent_pools.is_empty() {
            return Err(Error::Validation(
                "at least one agent pool is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for pool in &self.agent_pools {
            if pool.name.is_empty() {
                return Err(Error::Validation("agent pool name cannot be empty".to_string()));
            }
            if !seen.insert(pool.name.as_str()) {
                return Err(Error::DuplicatePool(pool.name.clone()));
            }
        }

        Ok(())
    }
}

/// Errors shared across crates
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Agent pool not found: {0}")]
    PoolNotFound(String),

    #[error("Duplicate agent pool name: {0}")]
    DuplicatePool(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
