//! Pool state resolution
//!
//! The persisted specification says how big a pool should be; the cloud says
//! how big it is. Everything that changes a pool starts from what is found
//! here, never from the persisted count.

use clusterops_common::{AgentPool, ClusterSpecification, PoolTopology};
use serde::Serialize;

use crate::cloud::{CloudProvider, Tags, POOL_NAME_TAG, RESOURCE_NAME_SUFFIX_TAG};
use crate::error::{EngineError, EngineResult};
use crate::naming::{is_windows_publisher, parse_node_name, parse_windows_scale_set_name};

/// Compute resource backing a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeTarget {
    VirtualMachine {
        name: String,
        nic_ids: Vec<String>,
        os_disk_id: Option<String>,
    },
    ScaleSetInstance {
        scale_set: String,
        instance_id: String,
    },
}

/// A node discovered in the cloud
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    /// Kubernetes node name
    pub name: String,
    pub pool_tag: String,
    pub suffix_tag: String,
    pub os_publisher: Option<String>,
    pub index: u32,
    pub windows_pool_index: Option<u32>,
    pub target: NodeTarget,
}

/// Ground truth for one agent pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolState {
    pub pool: String,
    pub topology: PoolTopology,
    pub current_count: u32,
    /// Highest VM index in use; `None` for an empty indexed pool
    pub highest_used_index: Option<u32>,
    /// Pool index of a Windows pool
    pub windows_index: Option<u32>,
    /// Nodes ordered by index
    pub nodes: Vec<NodeRecord>,
}

impl PoolState {
    /// First index past the highest one in use
    pub fn next_index(&self) -> u32 {
        self.highest_used_index.map(|i| i + 1).unwrap_or(0)
    }

    /// The `count` highest-indexed nodes, highest first
    pub fn highest_indexed(&self, count: usize) -> Vec<NodeRecord> {
        self.nodes.iter().rev().take(count).cloned().collect()
    }
}

/// Pool tag carried by control plane VMs
pub const MASTER_POOL_NAME: &str = "master";

/// Whether a resource's tags place it in `pool` of this cluster
fn belongs_to_pool(tags: &Tags, pool: &str, name_suffix: &str) -> Option<(String, String)> {
    let pool_tag = tags.get(POOL_NAME_TAG).ok()?;
    let suffix_tag = tags.get(RESOURCE_NAME_SUFFIX_TAG).ok()?;

    if pool_tag.eq_ignore_ascii_case(pool) && name_suffix.contains(suffix_tag) {
        Some((pool_tag.to_string(), suffix_tag.to_string()))
    } else {
        None
    }
}

/// Resolve the current state of one agent pool
pub async fn resolve_pool_state(
    cloud: &dyn CloudProvider,
    cluster: &ClusterSpecification,
    pool_name: &str,
) -> EngineResult<PoolState> {
    let pool = cluster.agent_pool(pool_name)?;

    let (state, matched) = match pool.topology {
        PoolTopology::AvailabilitySet => {
            let state = resolve_indexed(cloud, cluster, pool).await?;
            let matched = state.nodes.len();
            (state, matched)
        }
        PoolTopology::VirtualMachineScaleSets => resolve_scale_sets(cloud, cluster, pool).await?,
    };

    // A matching scale set at capacity 0 is still a resolved pool
    if matched == 0 && pool.count > 0 {
        return Err(EngineError::EmptyPool {
            pool: pool.name.clone(),
            resource_group: cluster.resource_group.clone(),
        });
    }

    tracing::debug!(
        pool = %pool.name,
        current = state.current_count,
        highest = ?state.highest_used_index,
        windows_index = ?state.windows_index,
        "Resolved pool state"
    );

    Ok(state)
}

/// Control plane VMs ordered by index
pub async fn resolve_masters(
    cloud: &dyn CloudProvider,
    cluster: &ClusterSpecification,
) -> EngineResult<Vec<NodeRecord>> {
    let masters = AgentPool {
        name: MASTER_POOL_NAME.to_string(),
        count: cluster.master.count,
        vm_size: cluster.master.vm_size.clone(),
        os_type: Default::default(),
        os_disk_size_gb: None,
        topology: PoolTopology::AvailabilitySet,
    };

    let state = resolve_indexed(cloud, cluster, &masters).await?;
    if state.nodes.is_empty() {
        return Err(EngineError::EmptyPool {
            pool: MASTER_POOL_NAME.to_string(),
            resource_group: cluster.resource_group.clone(),
        });
    }
    Ok(state.nodes)
}

async fn resolve_indexed(
    cloud: &dyn CloudProvider,
    cluster: &ClusterSpecification,
    pool: &AgentPool,
) -> EngineResult<PoolState> {
    let vms = cloud.list_virtual_machines(&cluster.resource_group).await?;

    let mut nodes = Vec::new();
    let mut windows_index = None;

    for vm in vms {
        let Some((pool_tag, suffix_tag)) = belongs_to_pool(&vm.tags, &pool.name, &cluster.name_suffix)
        else {
            continue;
        };

        let parsed = parse_node_name(&vm.name, vm.os_publisher.as_deref())?;
        if let Some(idx) = parsed.windows_pool_index {
            if windows_index.is_some_and(|known| known != idx) {
                tracing::warn!(
                    pool = %pool.name,
                    node = %vm.name,
                    "Windows pool index {} differs from {:?}",
                    idx,
                    windows_index
                );
            }
            windows_index = Some(idx);
        }

        nodes.push(NodeRecord {
            name: vm.name.clone(),
            pool_tag,
            suffix_tag,
            os_publisher: vm.os_publisher.clone(),
            index: parsed.index,
            windows_pool_index: parsed.windows_pool_index,
            target: NodeTarget::VirtualMachine {
                name: vm.name,
                nic_ids: vm.nic_ids,
                os_disk_id: vm.os_disk_id,
            },
        });
    }

    nodes.sort_by_key(|n| n.index);

    Ok(PoolState {
        pool: pool.name.clone(),
        topology: PoolTopology::AvailabilitySet,
        current_count: nodes.len() as u32,
        highest_used_index: nodes.last().map(|n| n.index),
        windows_index,
        nodes,
    })
}

/// Scale-set pool state and the number of scale sets that matched
async fn resolve_scale_sets(
    cloud: &dyn CloudProvider,
    cluster: &ClusterSpecification,
    pool: &AgentPool,
) -> EngineResult<(PoolState, usize)> {
    let scale_sets = cloud.list_scale_sets(&cluster.resource_group).await?;

    let mut matched = 0;
    let mut current_count = 0;
    let mut windows_index = None;
    let mut nodes = Vec::new();

    for ss in scale_sets {
        let Some((pool_tag, suffix_tag)) = belongs_to_pool(&ss.tags, &pool.name, &cluster.name_suffix)
        else {
            continue;
        };

        matched += 1;
        current_count += ss.capacity;

        let pool_index = if is_windows_publisher(ss.os_publisher.as_deref()) {
            let idx = parse_windows_scale_set_name(&ss.name)?;
            windows_index = Some(idx);
            Some(idx)
        } else {
            None
        };

        let instances = cloud
            .list_scale_set_instances(&cluster.resource_group, &ss.name)
            .await?;
        for instance in instances {
            let index = instance.instance_id.parse::<u32>().map_err(|e| EngineError::NodeName {
                name: instance.computer_name.clone(),
                reason: format!("instance id '{}' is not numeric: {}", instance.instance_id, e),
            })?;
            nodes.push(NodeRecord {
                name: instance.computer_name,
                pool_tag: pool_tag.clone(),
                suffix_tag: suffix_tag.clone(),
                os_publisher: ss.os_publisher.clone(),
                index,
                windows_pool_index: pool_index,
                target: NodeTarget::ScaleSetInstance {
                    scale_set: ss.name.clone(),
                    instance_id: instance.instance_id,
                },
            });
        }
    }

    nodes.sort_by_key(|n| n.index);

    let state = PoolState {
        pool: pool.name.clone(),
        topology: PoolTopology::VirtualMachineScaleSets,
        current_count,
        highest_used_index: Some(0),
        windows_index,
        nodes,
    };
    Ok((state, matched))
}
