//! Template generator backed by pre-generated deployment artifacts
//!
//! The artifact directory holds the `azuredeploy.json` and
//! `azuredeploy.parameters.json` written when the cluster was first
//! generated. Pool sizes, VM sizes and the orchestrator version are overlaid
//! from the specification; pools absent from the specification have their
//! resources removed so a single-pool deployment leaves them alone.

use clusterops_common::ClusterSpecification;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::{count_parameter, set_parameter, TemplateGenerator};
use crate::error::{EngineError, EngineResult};
use crate::resolver::MASTER_POOL_NAME;

pub const TEMPLATE_FILE: &str = "azuredeploy.json";
pub const PARAMETERS_FILE: &str = "azuredeploy.parameters.json";

/// Parameter carrying the Kubernetes version
pub const VERSION_PARAMETER: &str = "orchestratorVersion";

/// Resource types shared by every node, removed before scaling up
const SHARED_RESOURCE_TYPES: &[&str] = &[
    "Microsoft.Network/networkSecurityGroups",
    "Microsoft.Network/routeTables",
];

/// Tag on generated resources naming the agent pool
const POOL_TAG_PATH: &str = "poolName";

pub struct ArtifactTemplateGenerator {
    dir: PathBuf,
}

impl ArtifactTemplateGenerator {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn load(&self, file: &str) -> EngineResult<Value> {
        let path = self.dir.join(file);
        let content = std::fs::read_to_string(&path).map_err(|e| EngineError::Template {
            path: path.display().to_string(),
            message: format!("cannot read: {}", e),
        })?;
        let mut doc: Value = serde_json::from_str(&content).map_err(|e| EngineError::Template {
            path: path.display().to_string(),
            message: format!("invalid JSON: {}", e),
        })?;

        // Parameter files wrap the values in a deployment parameters envelope
        if file == PARAMETERS_FILE {
            if let Some(inner) = doc.get_mut("parameters").map(Value::take) {
                doc = inner;
            }
        }
        Ok(doc)
    }
}

fn set_if_declared(parameters: &mut Value, name: &str, value: Value) -> EngineResult<()> {
    if parameters.get(name).is_some() {
        set_parameter(parameters, name, value)?;
    }
    Ok(())
}

fn resources_mut<'a>(template: &'a mut Value) -> EngineResult<&'a mut Vec<Value>> {
    template
        .get_mut("resources")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| EngineError::Template {
            path: "template.resources".to_string(),
            message: "expected an array".to_string(),
        })
}

/// Drop resources matching `remove` and every `dependsOn` entry naming them
fn remove_resources(template: &mut Value, remove: impl Fn(&Value) -> bool) -> EngineResult<()> {
    let resources = resources_mut(template)?;

    let removed: HashSet<String> = resources
        .iter()
        .filter(|r| remove(r))
        .filter_map(|r| r["name"].as_str().map(String::from))
        .collect();
    resources.retain(|r| !remove(r));

    if removed.is_empty() {
        return Ok(());
    }

    for resource in resources.iter_mut() {
        if let Some(deps) = resource.get_mut("dependsOn").and_then(Value::as_array_mut) {
            deps.retain(|d| {
                d.as_str()
                    .map(|d| !removed.iter().any(|name| d.contains(name.as_str())))
                    .unwrap_or(true)
            });
        }
    }

    Ok(())
}

impl TemplateGenerator for ArtifactTemplateGenerator {
    fn generate(&self, spec: &ClusterSpecification) -> EngineResult<(Value, Value)> {
        let mut template = self.load(TEMPLATE_FILE)?;
        let mut parameters = self.load(PARAMETERS_FILE)?;

        for pool in &spec.agent_pools {
            set_if_declared(&mut parameters, &count_parameter(&pool.name), json!(pool.count))?;
            set_if_declared(
                &mut parameters,
                &format!("{}VMSize", pool.name),
                json!(pool.vm_size),
            )?;
        }
        set_if_declared(&mut parameters, "masterCount", json!(spec.master.count))?;
        set_if_declared(&mut parameters, VERSION_PARAMETER, json!(spec.kubernetes_version))?;

        let mut keep: HashSet<&str> = spec.agent_pools.iter().map(|p| p.name.as_str()).collect();
        keep.insert(MASTER_POOL_NAME);
        remove_resources(&mut template, |r| {
            r["tags"][POOL_TAG_PATH]
                .as_str()
                .is_some_and(|pool| !keep.contains(pool))
        })?;

        Ok((template, parameters))
    }

    fn normalize_for_scale_up(&self, template: &mut Value) -> EngineResult<()> {
        remove_resources(template, |r| {
            r["type"]
                .as_str()
                .is_some_and(|t| SHARED_RESOURCE_TYPES.contains(&t))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_artifacts(dir: &Path) {
        let template = json!({
            "variables": {},
            "resources": [
                { "type": "Microsoft.Network/networkSecurityGroups", "name": "k8s-nsg" },
                {
                    "type": "Microsoft.Compute/virtualMachines",
                    "name": "agentpool1-vm",
                    "tags": { "poolName": "agentpool1" },
                    "dependsOn": ["[concat('Microsoft.Network/networkSecurityGroups/', 'k8s-nsg')]"]
                },
                {
                    "type": "Microsoft.Compute/virtualMachines",
                    "name": "agentpool2-vm",
                    "tags": { "poolName": "agentpool2" }
                }
            ]
        });
        let parameters = json!({
            "$schema": "https://schema.management.azure.com/schemas/2015-01-01/deploymentParameters.json#",
            "parameters": {
                "agentpool1Count": { "value": 3 },
                "agentpool2Count": { "value": 1 },
                "orchestratorVersion": { "value": "1.10.3" }
            }
        });
        std::fs::write(dir.join(TEMPLATE_FILE), template.to_string()).unwrap();
        std::fs::write(dir.join(PARAMETERS_FILE), parameters.to_string()).unwrap();
    }

    fn spec() -> ClusterSpecification {
        serde_json::from_value(json!({
            "name": "prod",
            "resource_group": "prod-rg",
            "location": "westus2",
            "name_suffix": "12345678",
            "kubernetes_version": "1.11.2",
            "master": { "count": 1, "vm_size": "Standard_D2_v2", "dns_prefix": "prod" },
            "agent_pools": [
                { "name": "agentpool1", "count": 5, "vm_size": "Standard_D2_v2",
                  "os_type": "Linux", "topology": "AvailabilitySet" }
            ],
            "service_principal": { "client_id": "c", "secret": { "type": "inline", "value": "s" } },
            "kube_config": ""
        }))
        .unwrap()
    }

    #[test]
    fn test_generate_overlays_spec() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path());

        let generator = ArtifactTemplateGenerator::new(dir.path());
        let (template, parameters) = generator.generate(&spec()).unwrap();

        assert_eq!(parameters["agentpool1Count"]["value"], json!(5));
        assert_eq!(parameters["orchestratorVersion"]["value"], json!("1.11.2"));
        assert!(parameters.get("agentpool1VMSize").is_none());

        let names: Vec<&str> = template["resources"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|r| r["name"].as_str())
            .collect();
        assert_eq!(names, vec!["k8s-nsg", "agentpool1-vm"]);
    }

    #[test]
    fn test_normalize_removes_shared_resources_and_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path());

        let generator = ArtifactTemplateGenerator::new(dir.path());
        let (mut template, _) = generator.generate(&spec()).unwrap();
        generator.normalize_for_scale_up(&mut template).unwrap();

        let resources = template["resources"].as_array().unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0]["dependsOn"], json!([]));
    }

    #[test]
    fn test_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ArtifactTemplateGenerator::new(dir.path());
        assert!(matches!(
            generator.generate(&spec()),
            Err(EngineError::Template { .. })
        ));
    }
}
