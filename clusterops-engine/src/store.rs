//! Cluster specification persistence

use async_trait::async_trait;
use clusterops_common::ClusterSpecification;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult};

/// Load and save cluster specifications by cluster name
#[async_trait]
pub trait SpecificationStore: Send + Sync {
    async fn load(&self, cluster: &str) -> EngineResult<ClusterSpecification>;

    async fn save(&self, spec: &ClusterSpecification) -> EngineResult<()>;

    async fn list(&self) -> EngineResult<Vec<String>>;
}

/// Specifications kept as `<dir>/<cluster>.json`
pub struct FileSpecStore {
    dir: PathBuf,
}

impl FileSpecStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, cluster: &str) -> EngineResult<PathBuf> {
        if cluster.is_empty()
            || cluster.contains(['/', '\\'])
            || cluster.starts_with('.')
        {
            return Err(EngineError::Store(format!(
                "invalid cluster name '{}'",
                cluster
            )));
        }
        Ok(self.dir.join(format!("{}.json", cluster)))
    }
}

#[async_trait]
impl SpecificationStore for FileSpecStore {
    async fn load(&self, cluster: &str) -> EngineResult<ClusterSpecification> {
        let path = self.path_for(cluster)?;
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            EngineError::Store(format!("cannot read {}: {}", path.display(), e))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| EngineError::Store(format!("cannot parse {}: {}", path.display(), e)))
    }

    async fn save(&self, spec: &ClusterSpecification) -> EngineResult<()> {
        let path = self.path_for(&spec.name)?;
        let content = serde_json::to_string_pretty(spec)
            .map_err(|e| EngineError::Store(format!("cannot serialize '{}': {}", spec.name, e)))?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            EngineError::Store(format!("cannot create {}: {}", self.dir.display(), e))
        })?;

        // Write then rename so a crash never leaves a truncated file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| EngineError::Store(format!("cannot write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| EngineError::Store(format!("cannot replace {}: {}", path.display(), e)))?;

        tracing::debug!(cluster = %spec.name, path = %path.display(), "Saved specification");
        Ok(())
    }

    async fn list(&self) -> EngineResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(EngineError::Store(format!(
                    "cannot list {}: {}",
                    self.dir.display(),
                    e
                )))
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::Store(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// In-process store
#[derive(Default)]
pub struct MemorySpecStore {
    specs: RwLock<HashMap<String, ClusterSpecification>>,
}

impl MemorySpecStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spec(spec: ClusterSpecification) -> Self {
        let mut specs = HashMap::new();
        specs.insert(spec.name.clone(), spec);
        Self {
            specs: RwLock::new(specs),
        }
    }
}

#[async_trait]
impl SpecificationStore for MemorySpecStore {
    async fn load(&self, cluster: &str) -> EngineResult<ClusterSpecification> {
        self.specs
            .read()
            .await
            .get(cluster)
            .cloned()
            .ok_or_else(|| EngineError::Store(format!("cluster '{}' not found", cluster)))
    }

    async fn save(&self, spec: &ClusterSpecification) -> EngineResult<()> {
        self.specs
            .write()
            .await
            .insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn list(&self) -> EngineResult<Vec<String>> {
        let mut names: Vec<String> = self.specs.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterops_common::auth::{ClientSecret, ServicePrincipalProfile};
    use clusterops_common::{AgentPool, MasterProfile, OsType, PoolTopology};

    fn spec(name: &str) -> ClusterSpecification {
        ClusterSpecification {
            name: name.to_string(),
            resource_group: format!("{}-rg", name),
            location: "westus2".to_string(),
            name_suffix: "12345678".to_string(),
            kubernetes_version: "1.10.3".to_string(),
            master: MasterProfile {
                count: 1,
                vm_size: "Standard_D2_v2".to_string(),
                dns_prefix: name.to_string(),
                fqdn: None,
            },
            agent_pools: vec![AgentPool {
                name: "agentpool1".to_string(),
                count: 3,
                vm_size: "Standard_D2_v2".to_string(),
                os_type: OsType::Linux,
                os_disk_size_gb: None,
                topology: PoolTopology::AvailabilitySet,
            }],
            service_principal: ServicePrincipalProfile {
                client_id: "client".to_string(),
                secret: ClientSecret::Inline {
                    value: "secret".to_string(),
                },
            },
            kube_config: String::new(),
            last_modified: None,
        }
    }

    #[tokio::test]
    async fn test_file_store_save_load_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSpecStore::new(dir.path().join("specs"));

        assert!(store.list().await.unwrap().is_empty());

        store.save(&spec("prod")).await.unwrap();
        store.save(&spec("dev")).await.unwrap();

        let loaded = store.load("prod").await.unwrap();
        assert_eq!(loaded, spec("prod"));
        assert_eq!(store.list().await.unwrap(), vec!["dev", "prod"]);
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSpecStore::new(dir.path());
        assert!(store.load("../etc/passwd").await.is_err());
        assert!(store.load("").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySpecStore::with_spec(spec("prod"));
        let updated = spec("prod").with_pool_count("agentpool1", 5).unwrap();
        store.save(&updated).await.unwrap();
        assert_eq!(store.load("prod").await.unwrap().agent_pools[0].count, 5);
        assert!(store.load("missing").await.is_err());
    }
}
