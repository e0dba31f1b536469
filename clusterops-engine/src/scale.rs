//! Scale orchestration
//!
//! A scale request moves one agent pool from the size found in the cloud to
//! the requested size: excess nodes are drained and deleted, missing nodes
//! are added through a single-pool template deployment. The specification
//! is saved only once the cloud side has confirmed the change.

use clusterops_common::{ClusterSpecification, PoolTopology};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::cloud::{wait_for_deployment, CloudError, CloudProvider};
use crate::drain::{DrainCoordinator, DEFAULT_DRAIN_TIMEOUT};
use crate::error::{EngineError, EngineResult, OperationContext};
use crate::kubernetes::ControlPlane;
use crate::log_scale_step;
use crate::resolver::{resolve_pool_state, NodeRecord, PoolState};
use crate::store::SpecificationStore;
use crate::template::{patch_for_scale, TemplateGenerator};
use crate::validation::{validate_pool_count, validate_specification};

/// Which way a pool has to move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScaleDirection {
    Unchanged,
    Down(u32),
    Up(u32),
}

/// Everything decided about one scale request before acting on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalePlan {
    pub pool: String,
    pub topology: PoolTopology,
    pub desired_count: u32,
    pub current_count: u32,
    pub highest_used_index: Option<u32>,
    pub windows_index: Option<u32>,
    /// Nodes to remove, highest index first
    pub to_delete: Vec<NodeRecord>,
}

impl ScalePlan {
    /// Plan a move of the resolved pool to `desired` nodes
    pub fn new(state: &PoolState, desired: u32) -> EngineResult<Self> {
        let to_delete = if desired < state.current_count {
            let excess = (state.current_count - desired) as usize;
            if state.nodes.len() < excess {
                return Err(CloudError::Unexpected(format!(
                    "pool '{}' reports {} nodes but only {} could be listed",
                    state.pool,
                    state.current_count,
                    state.nodes.len()
                ))
                .into());
            }
            state.highest_indexed(excess)
        } else {
            Vec::new()
        };

        Ok(Self {
            pool: state.pool.clone(),
            topology: state.topology,
            desired_count: desired,
            current_count: state.current_count,
            highest_used_index: state.highest_used_index,
            windows_index: state.windows_index,
            to_delete,
        })
    }

    pub fn direction(&self) -> ScaleDirection {
        use std::cmp::Ordering;
        match self.desired_count.cmp(&self.current_count) {
            Ordering::Equal => ScaleDirection::Unchanged,
            Ordering::Less => ScaleDirection::Down(self.current_count - self.desired_count),
            Ordering::Greater => ScaleDirection::Up(self.desired_count - self.current_count),
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.topology == PoolTopology::AvailabilitySet
    }

    /// First VM index a scale-up may use
    pub fn next_index(&self) -> u32 {
        self.highest_used_index.map(|i| i + 1).unwrap_or(0)
    }
}

/// Result of a scale request
#[derive(Debug, Clone, Serialize)]
pub struct ScaleOutcome {
    pub plan: ScalePlan,
    /// Nodes drained and deleted
    pub deleted: Vec<String>,
    /// Deployment submitted for a scale-up
    pub deployment: Option<String>,
    /// Specification as persisted after the change
    pub specification: ClusterSpecification,
}

/// Tunables for scale and upgrade runs
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub drain_timeout: Duration,
    pub deployment_poll_interval: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            deployment_poll_interval: Duration::from_secs(30),
        }
    }
}

/// Fresh deployment name of the form `<resourceGroup>-<random>`
pub fn deployment_name(resource_group: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{}-{}", resource_group, suffix)
}

/// Submit a template deployment and wait for it to succeed
pub(crate) async fn deploy(
    cloud: &dyn CloudProvider,
    resource_group: &str,
    template: &serde_json::Value,
    parameters: &serde_json::Value,
    poll_interval: Duration,
) -> EngineResult<String> {
    let name = deployment_name(resource_group);
    tracing::info!(deployment = %name, resource_group, "Submitting deployment");

    cloud
        .submit_deployment(resource_group, &name, template, parameters)
        .await
        .context("submit deployment")?;
    wait_for_deployment(cloud, resource_group, &name, poll_interval)
        .await
        .context("wait for deployment")?;

    tracing::info!(deployment = %name, "Deployment succeeded");
    Ok(name)
}

pub struct ScaleOrchestrator {
    cloud: Arc<dyn CloudProvider>,
    control_plane: Arc<dyn ControlPlane>,
    generator: Arc<dyn TemplateGenerator>,
    store: Arc<dyn SpecificationStore>,
    options: OrchestratorOptions,
}

impl ScaleOrchestrator {
    pub fn new(
        cloud: Arc<dyn CloudProvider>,
        control_plane: Arc<dyn ControlPlane>,
        generator: Arc<dyn TemplateGenerator>,
        store: Arc<dyn SpecificationStore>,
    ) -> Self {
        Self {
            cloud,
            control_plane,
            generator,
            store,
            options: OrchestratorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    /// Move `pool` of `spec` to `desired` nodes
    pub async fn scale_cluster(
        &self,
        spec: &ClusterSpecification,
        pool: &str,
        desired: u32,
    ) -> EngineResult<ScaleOutcome> {
        validate_specification(spec).context("validate specification")?;
        validate_pool_count(desired).context("validate pool count")?;

        let state = resolve_pool_state(self.cloud.as_ref(), spec, pool)
            .await
            .context("resolve pool state")?;

        let persisted = spec.agent_pool(pool)?.count;
        if persisted != state.current_count {
            tracing::warn!(
                pool,
                persisted,
                actual = state.current_count,
                "Persisted pool count differs from the cloud; using the cloud count"
            );
        }

        let plan = ScalePlan::new(&state, desired).context("plan scale")?;
        log_scale_step!(
            "plan",
            pool,
            current = plan.current_count,
            desired = plan.desired_count
        );

        match plan.direction() {
            ScaleDirection::Unchanged => {
                tracing::info!(pool, count = desired, "Pool already at desired size");
                Ok(ScaleOutcome {
                    plan,
                    deleted: Vec::new(),
                    deployment: None,
                    specification: spec.clone(),
                })
            }
            ScaleDirection::Down(_) => self.scale_down(spec, plan).await,
            ScaleDirection::Up(_) => self.scale_up(spec, plan).await,
        }
    }

    async fn scale_down(
        &self,
        spec: &ClusterSpecification,
        plan: ScalePlan,
    ) -> EngineResult<ScaleOutcome> {
        let deleted: Vec<String> = plan.to_delete.iter().map(|n| n.name.clone()).collect();
        log_scale_step!("drain and delete", plan.pool, nodes = deleted.len());

        DrainCoordinator::new(
            self.cloud.clone(),
            self.control_plane.clone(),
            &spec.resource_group,
        )
        .with_drain_timeout(self.options.drain_timeout)
        .drain_and_delete(
            plan.to_delete.clone(),
            &spec.kube_config,
            &spec.master_endpoint(),
        )
        .await
        .context("drain and delete nodes")?;

        let updated = spec.with_pool_count(&plan.pool, plan.desired_count)?;
        let updated = self.save(updated).await?;

        Ok(ScaleOutcome {
            plan,
            deleted,
            deployment: None,
            specification: updated,
        })
    }

    async fn scale_up(
        &self,
        spec: &ClusterSpecification,
        plan: ScalePlan,
    ) -> EngineResult<ScaleOutcome> {
        let grown = spec.with_pool_count(&plan.pool, plan.desired_count)?;
        let single = grown.single_pool(&plan.pool)?;

        log_scale_step!("generate template", plan.pool);
        let (mut template, mut parameters) = self
            .generator
            .generate(&single)
            .context("generate template")?;

        patch_for_scale(
            &mut template,
            &mut parameters,
            &plan.pool,
            &plan,
            self.generator.as_ref(),
        )
        .context("patch template")?;

        log_scale_step!("deploy", plan.pool, offset = plan.next_index());
        let name = deploy(
            self.cloud.as_ref(),
            &spec.resource_group,
            &template,
            &parameters,
            self.options.deployment_poll_interval,
        )
        .await?;

        let updated = self.save(grown).await?;

        Ok(ScaleOutcome {
            plan,
            deleted: Vec::new(),
            deployment: Some(name),
            specification: updated,
        })
    }

    async fn save(&self, mut spec: ClusterSpecification) -> EngineResult<ClusterSpecification> {
        spec.last_modified = Some(chrono::Utc::now());
        self.store
            .save(&spec)
            .await
            .context("save specification")?;
        Ok(spec)
    }
}
