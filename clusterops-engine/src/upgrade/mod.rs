//! Upgrade orchestration
//!
//! An upgrade replaces every node of the cluster, one at a time: control
//! plane VMs first in index order, then each agent pool node by node. Each
//! node is drained and deleted, then recreated by a deployment of a template
//! generated at the target version. The specification is saved at the new
//! version only after the last node has been replaced.
//!
//! A failure part way through stops the upgrade. Nodes already replaced stay
//! on the new version and nothing is rolled back.

pub mod versions;

use clusterops_common::{ClusterSpecification, PoolTopology};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cloud::CloudProvider;
use crate::drain::DrainCoordinator;
use crate::error::{EngineError, EngineResult, OperationContext};
use crate::kubernetes::ControlPlane;
use crate::resolver::{resolve_masters, resolve_pool_state, NodeRecord, PoolState, MASTER_POOL_NAME};
use crate::scale::{deploy, OrchestratorOptions};
use crate::store::SpecificationStore;
use crate::template::{patch_for_replacement, Replacement, TemplateGenerator};
use crate::validation::validate_specification;
use crate::{log_node_operation, log_performance, log_scale_step};

pub use versions::{parse_version, validate_upgrade, SupportedVersions, VersionInfoProvider};

/// A validated upgrade request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradePlan {
    pub current_version: String,
    pub target_version: String,
    /// Agent pools in the order they are upgraded
    pub agent_pools: Vec<String>,
    /// Upper bound on each replacement step; unbounded when `None`
    pub step_timeout: Option<Duration>,
}

/// Result of a completed upgrade
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeOutcome {
    pub plan: UpgradePlan,
    /// Nodes replaced, in order
    pub replaced: Vec<String>,
    /// Deployments submitted, in order
    pub deployments: Vec<String>,
    pub specification: ClusterSpecification,
}

pub struct UpgradeOrchestrator {
    cloud: Arc<dyn CloudProvider>,
    control_plane: Arc<dyn ControlPlane>,
    generator: Arc<dyn TemplateGenerator>,
    store: Arc<dyn SpecificationStore>,
    versions: Arc<dyn VersionInfoProvider>,
    options: OrchestratorOptions,
    step_timeout: Option<Duration>,
}

impl UpgradeOrchestrator {
    pub fn new(
        cloud: Arc<dyn CloudProvider>,
        control_plane: Arc<dyn ControlPlane>,
        generator: Arc<dyn TemplateGenerator>,
        store: Arc<dyn SpecificationStore>,
        versions: Arc<dyn VersionInfoProvider>,
    ) -> Self {
        Self {
            cloud,
            control_plane,
            generator,
            store,
            versions,
            options: OrchestratorOptions::default(),
            step_timeout: None,
        }
    }

    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Validate an upgrade of `spec` to `target` without touching the cluster
    pub fn plan(&self, spec: &ClusterSpecification, target: &str) -> EngineResult<UpgradePlan> {
        let target = validate_upgrade(self.versions.as_ref(), &spec.kubernetes_version, target)?;

        Ok(UpgradePlan {
            current_version: spec.kubernetes_version.clone(),
            target_version: target.to_string(),
            agent_pools: spec.agent_pool_names(),
            step_timeout: self.step_timeout,
        })
    }

    /// Upgrade every node of `spec` to `target`
    pub async fn upgrade_cluster(
        &self,
        spec: &ClusterSpecification,
        target: &str,
    ) -> EngineResult<UpgradeOutcome> {
        validate_specification(spec).context("validate specification")?;
        let plan = self.plan(spec, target).context("validate upgrade")?;
        let upgraded = spec.with_version(&plan.target_version);
        let started = std::time::Instant::now();

        tracing::info!(
            cluster = %spec.name,
            from = %plan.current_version,
            to = %plan.target_version,
            "Starting upgrade"
        );

        let masters = resolve_masters(self.cloud.as_ref(), spec)
            .await
            .context("resolve master nodes")?;
        let mut pools = Vec::with_capacity(plan.agent_pools.len());
        for pool in &plan.agent_pools {
            let state = resolve_pool_state(self.cloud.as_ref(), spec, pool)
                .await
                .context(format!("resolve pool state of {}", pool))?;
            pools.push(state);
        }

        let coordinator = DrainCoordinator::new(
            self.cloud.clone(),
            self.control_plane.clone(),
            &spec.resource_group,
        )
        .with_drain_timeout(self.options.drain_timeout);

        let mut replaced = Vec::new();
        let mut deployments = Vec::new();

        for master in &masters {
            log_scale_step!("upgrade master", MASTER_POOL_NAME, node = master.name.as_str());

            self.bounded(
                format!("delete master {}", master.name),
                coordinator.delete_node(master),
            )
            .await?;

            let deployment = self
                .bounded(
                    format!("recreate master {}", master.name),
                    self.redeploy_master(&upgraded, master.index),
                )
                .await?;

            replaced.push(master.name.clone());
            deployments.push(deployment);
        }

        for state in &pools {
            for node in &state.nodes {
                log_scale_step!("upgrade node", state.pool, node = node.name.as_str());

                self.bounded(
                    format!("drain and delete {}", node.name),
                    coordinator.drain_and_delete(
                        vec![node.clone()],
                        &spec.kube_config,
                        &spec.master_endpoint(),
                    ),
                )
                .await?;

                let deployment = self
                    .bounded(
                        format!("recreate {}", node.name),
                        self.redeploy_agent(&upgraded, state, node),
                    )
                    .await?;

                log_node_operation!("upgrade", node.name, version = plan.target_version.as_str());
                replaced.push(node.name.clone());
                deployments.push(deployment);
            }
        }

        let mut upgraded = upgraded;
        upgraded.last_modified = Some(chrono::Utc::now());
        self.store
            .save(&upgraded)
            .await
            .context("save specification")?;

        tracing::info!(
            cluster = %spec.name,
            version = %plan.target_version,
            nodes = replaced.len(),
            "Upgrade complete"
        );
        log_performance!("upgrade_cluster", started.elapsed().as_millis() as u64);

        Ok(UpgradeOutcome {
            plan,
            replaced,
            deployments,
            specification: upgraded,
        })
    }

    /// Run one step, bounded by the step timeout and labelled with `operation`
    async fn bounded<T>(
        &self,
        operation: String,
        step: impl Future<Output = EngineResult<T>>,
    ) -> EngineResult<T> {
        let result = match self.step_timeout {
            Some(limit) => match tokio::time::timeout(limit, step).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout {
                    operation: operation.clone(),
                    timeout: limit,
                }),
            },
            None => step.await,
        };
        result.context(operation)
    }

    async fn redeploy_master(&self, upgraded: &ClusterSpecification, index: u32) -> EngineResult<String> {
        let (mut template, mut parameters) = self.generator.generate(&upgraded.masters_only())?;
        patch_for_replacement(
            &mut template,
            &mut parameters,
            MASTER_POOL_NAME,
            Replacement::Indexed { index },
            None,
            self.generator.as_ref(),
        )?;

        deploy(
            self.cloud.as_ref(),
            &upgraded.resource_group,
            &template,
            &parameters,
            self.options.deployment_poll_interval,
        )
        .await
    }

    async fn redeploy_agent(
        &self,
        upgraded: &ClusterSpecification,
        state: &PoolState,
        node: &NodeRecord,
    ) -> EngineResult<String> {
        let single = upgraded.single_pool(&state.pool)?;
        let (mut template, mut parameters) = self.generator.generate(&single)?;

        let replacement = match state.topology {
            PoolTopology::AvailabilitySet => Replacement::Indexed { index: node.index },
            PoolTopology::VirtualMachineScaleSets => Replacement::Elastic {
                capacity: state.current_count,
            },
        };
        patch_for_replacement(
            &mut template,
            &mut parameters,
            &state.pool,
            replacement,
            state.windows_index,
            self.generator.as_ref(),
        )?;

        deploy(
            self.cloud.as_ref(),
            &upgraded.resource_group,
            &template,
            &parameters,
            self.options.deployment_poll_interval,
        )
        .await
    }
}
