//! Wiring of the engine's collaborators from the loaded configuration

use anyhow::{Context, Result};
use clusterops_common::ClusterSpecification;
use clusterops_engine::cloud::{ArmClient, CloudProvider};
use clusterops_engine::config::EngineConfig;
use clusterops_engine::credentials::{resolve_client_secret, ClientCredentialsToken};
use clusterops_engine::kubernetes::{ControlPlane, DrainOptions, KubeControlPlane};
use clusterops_engine::scale::OrchestratorOptions;
use clusterops_engine::secrets::{SecretStore, VaultManager};
use clusterops_engine::store::{FileSpecStore, SpecificationStore};
use clusterops_engine::template::{ArtifactTemplateGenerator, TemplateGenerator};
use clusterops_engine::upgrade::SupportedVersions;
use std::sync::Arc;
use std::time::Duration;

pub struct Engine {
    config: EngineConfig,
    store: Arc<FileSpecStore>,
    secrets: Option<Arc<VaultManager>>,
}

impl Engine {
    pub async fn new(config: EngineConfig) -> Result<Self> {
        let secrets = if config.vault.enabled {
            let vault = VaultManager::new(config.vault.clone());
            vault
                .initialize()
                .await
                .context("failed to initialize vault")?;
            Some(Arc::new(vault))
        } else {
            None
        };

        Ok(Self {
            store: Arc::new(FileSpecStore::new(&config.store.spec_dir)),
            config,
            secrets,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn SpecificationStore> {
        self.store.clone()
    }

    pub async fn load(&self, cluster: &str) -> Result<ClusterSpecification> {
        self.store
            .load(cluster)
            .await
            .with_context(|| format!("failed to load cluster '{}'", cluster))
    }

    /// Resource Manager client authenticated as the cluster's service principal
    pub async fn cloud_for(&self, spec: &ClusterSpecification) -> Result<Arc<dyn CloudProvider>> {
        let cloud = &self.config.cloud;
        let secrets = self.secrets.as_deref().map(|s| s as &dyn SecretStore);
        let client_secret = resolve_client_secret(&spec.service_principal, secrets)
            .await
            .context("failed to recover the service principal secret")?;

        let token = ClientCredentialsToken::new(
            &cloud.authority,
            &cloud.tenant_id,
            &spec.service_principal.client_id,
            &client_secret,
            &cloud.resource,
        );
        let client = ArmClient::new(&cloud.endpoint, &cloud.subscription_id, Arc::new(token))?
            .with_request_timeout(Duration::from_secs(cloud.request_timeout_secs))?;

        Ok(Arc::new(client))
    }

    pub fn control_plane(&self) -> Arc<dyn ControlPlane> {
        Arc::new(KubeControlPlane::new(DrainOptions {
            grace_period_seconds: self.config.drain.grace_period_seconds,
            ..DrainOptions::default()
        }))
    }

    /// Generator reading the artifacts written when the cluster was created
    pub fn generator_for(&self, spec: &ClusterSpecification) -> Arc<dyn TemplateGenerator> {
        Arc::new(ArtifactTemplateGenerator::new(
            self.config.store.artifacts_dir.join(&spec.name),
        ))
    }

    pub fn versions(&self) -> Result<Arc<SupportedVersions>> {
        let versions = SupportedVersions::new(self.config.upgrade.supported_versions.as_slice())
            .context("invalid supported version list")?;
        Ok(Arc::new(versions))
    }

    pub fn options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            drain_timeout: self.config.drain.timeout(),
            deployment_poll_interval: self.config.cloud.poll_interval(),
        }
    }
}
