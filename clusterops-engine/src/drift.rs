//! Drift between persisted and actual pool sizes
//!
//! The cloud change and the specification save are not atomic. When a save
//! fails after the cloud accepted the change, or someone resizes a pool out
//! of band, the persisted counts no longer match what is deployed.

use clusterops_common::ClusterSpecification;
use serde::Serialize;

use crate::cloud::CloudProvider;
use crate::error::{EngineResult, OperationContext};
use crate::resolver::resolve_pool_state;

/// A pool whose persisted count differs from the deployed one
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolDrift {
    pub pool: String,
    pub persisted: u32,
    pub actual: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub cluster: String,
    pub pools: Vec<PoolDrift>,
}

impl DriftReport {
    pub fn has_drift(&self) -> bool {
        !self.pools.is_empty()
    }
}

/// Compare every pool of `spec` with what the cloud reports
pub async fn detect_drift(
    cloud: &dyn CloudProvider,
    spec: &ClusterSpecification,
) -> EngineResult<DriftReport> {
    let mut pools = Vec::new();

    for pool in &spec.agent_pools {
        let actual = match resolve_pool_state(cloud, spec, &pool.name).await {
            Ok(state) => state.current_count,
            // A pool recorded as non-empty but with nothing deployed
            Err(crate::error::EngineError::EmptyPool { .. }) => 0,
            Err(e) => return Err(e).context(format!("resolve pool state of {}", pool.name)),
        };

        if actual != pool.count {
            tracing::warn!(
                pool = %pool.name,
                persisted = pool.count,
                actual,
                "Pool drift detected"
            );
            pools.push(PoolDrift {
                pool: pool.name.clone(),
                persisted: pool.count,
                actual,
            });
        }
    }

    Ok(DriftReport {
        cluster: spec.name.clone(),
        pools,
    })
}
