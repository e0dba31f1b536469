//! Common test utilities and in-memory fakes for the engine's collaborators

#![allow(dead_code)]

use async_trait::async_trait;
use clusterops_common::auth::{ClientSecret, ServicePrincipalProfile};
use clusterops_common::{AgentPool, ClusterSpecification, MasterProfile, OsType, PoolTopology};
use clusterops_engine::cloud::{
    CloudError, CloudProvider, CloudResult, DeploymentState, DeploymentStatus, ScaleSet,
    ScaleSetInstance, Tags, VirtualMachine, POOL_NAME_TAG, RESOURCE_NAME_SUFFIX_TAG,
    WINDOWS_PUBLISHER,
};
use clusterops_engine::kubernetes::ControlPlane;
use clusterops_engine::scale::OrchestratorOptions;
use clusterops_engine::template::TemplateGenerator;
use clusterops_engine::{EngineError, EngineResult};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

pub const NAME_SUFFIX: &str = "12345678";
pub const RESOURCE_GROUP: &str = "prod-rg";

// ============== Specifications ==============

pub fn pool(name: &str, count: u32, topology: PoolTopology) -> AgentPool {
    AgentPool {
        name: name.to_string(),
        count,
        vm_size: "Standard_D2_v2".to_string(),
        os_type: OsType::Linux,
        os_disk_size_gb: None,
        topology,
    }
}

pub fn windows_pool(name: &str, count: u32) -> AgentPool {
    AgentPool {
        os_type: OsType::Windows,
        ..pool(name, count, PoolTopology::AvailabilitySet)
    }
}

pub fn spec(pools: Vec<AgentPool>) -> ClusterSpecification {
    ClusterSpecification {
        name: "prod".to_string(),
        resource_group: RESOURCE_GROUP.to_string(),
        location: "westus2".to_string(),
        name_suffix: NAME_SUFFIX.to_string(),
        kubernetes_version: "1.10.3".to_string(),
        master: MasterProfile {
            count: 1,
            vm_size: "Standard_D2_v2".to_string(),
            dns_prefix: "prod".to_string(),
            fqdn: None,
        },
        agent_pools: pools,
        service_principal: ServicePrincipalProfile {
            client_id: "client".to_string(),
            secret: ClientSecret::Inline {
                value: "secret".to_string(),
            },
        },
        kube_config: "apiVersion: v1\nkind: Config\n".to_string(),
        last_modified: None,
    }
}

pub fn fast_options() -> OrchestratorOptions {
    OrchestratorOptions {
        drain_timeout: Duration::from_secs(5),
        deployment_poll_interval: Duration::from_millis(5),
    }
}

// ============== Cloud Resources ==============

pub fn node_name(pool: &str, index: u32) -> String {
    format!("k8s-{}-{}-{}", pool, NAME_SUFFIX, index)
}

pub fn linux_vm(pool: &str, index: u32) -> VirtualMachine {
    let name = node_name(pool, index);
    VirtualMachine {
        id: format!("/vms/{}", name),
        tags: Tags::new()
            .with(POOL_NAME_TAG, pool)
            .with(RESOURCE_NAME_SUFFIX_TAG, NAME_SUFFIX),
        os_publisher: Some("Canonical".to_string()),
        nic_ids: vec![format!("/nics/{}-nic-0", name)],
        os_disk_id: Some(format!("/disks/{}_OsDisk", name)),
        name,
    }
}

/// Windows VM named `<suffix[..4]>k8s<900 + pool_index><index>`
pub fn windows_vm(pool: &str, pool_index: u32, index: u32) -> VirtualMachine {
    let name = format!("{}k8s{}{}", &NAME_SUFFIX[..4], 900 + pool_index, index);
    VirtualMachine {
        id: format!("/vms/{}", name),
        tags: Tags::new()
            .with(POOL_NAME_TAG, pool)
            .with(RESOURCE_NAME_SUFFIX_TAG, NAME_SUFFIX),
        os_publisher: Some(WINDOWS_PUBLISHER.to_string()),
        nic_ids: vec![format!("/nics/{}-nic-0", name)],
        os_disk_id: Some(format!("/disks/{}_OsDisk", name)),
        name,
    }
}

pub fn scale_set(pool: &str, capacity: u32) -> (ScaleSet, Vec<ScaleSetInstance>) {
    let name = format!("k8s-{}-{}-vmss", pool, NAME_SUFFIX);
    build_scale_set(pool, name, capacity, "Canonical")
}

/// Windows scale set named `<suffix[..4]>k8s<900 + pool_index>`
pub fn windows_scale_set(pool: &str, pool_index: u32, capacity: u32) -> (ScaleSet, Vec<ScaleSetInstance>) {
    let name = format!("{}k8s{}", &NAME_SUFFIX[..4], 900 + pool_index);
    build_scale_set(pool, name, capacity, WINDOWS_PUBLISHER)
}

fn build_scale_set(
    pool: &str,
    name: String,
    capacity: u32,
    publisher: &str,
) -> (ScaleSet, Vec<ScaleSetInstance>) {
    let instances = (0..capacity).map(|i| scale_set_instance(&name, i)).collect();
    (
        ScaleSet {
            id: format!("/vmss/{}", name),
            tags: Tags::new()
                .with(POOL_NAME_TAG, pool)
                .with(RESOURCE_NAME_SUFFIX_TAG, NAME_SUFFIX),
            capacity,
            os_publisher: Some(publisher.to_string()),
            name,
        },
        instances,
    )
}

fn scale_set_instance(scale_set: &str, id: u32) -> ScaleSetInstance {
    ScaleSetInstance {
        instance_id: id.to_string(),
        computer_name: format!("{}{:06}", scale_set, id),
    }
}

// ============== Fake Cloud ==============

/// A mutating call made against the fake cloud
#[derive(Debug, Clone, PartialEq)]
pub enum CloudEvent {
    DeleteVm(String),
    DeleteNic(String),
    DeleteDisk(String),
    DeleteInstance { scale_set: String, instance_id: String },
    Deploy {
        name: String,
        template: Value,
        parameters: Value,
    },
}

#[derive(Default)]
struct CloudState {
    vms: Vec<VirtualMachine>,
    scale_sets: Vec<(ScaleSet, Vec<ScaleSetInstance>)>,
    events: Vec<CloudEvent>,
}

/// Resource group held in memory. Deployments are applied to it the way
/// the generated templates would: `<pool>Count` and `<pool>Offset` decide
/// which indexed VMs exist, `<pool>Count` sets a scale set's capacity.
pub struct FakeCloud {
    state: Mutex<CloudState>,
    deployment_state: Mutex<DeploymentState>,
    fail_listing: Mutex<bool>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CloudState::default()),
            deployment_state: Mutex::new(DeploymentState::Succeeded),
            fail_listing: Mutex::new(false),
        }
    }

    pub fn with_vms(self, vms: Vec<VirtualMachine>) -> Self {
        self.state.lock().unwrap().vms.extend(vms);
        self
    }

    pub fn with_scale_set(self, scale_set: (ScaleSet, Vec<ScaleSetInstance>)) -> Self {
        self.state.lock().unwrap().scale_sets.push(scale_set);
        self
    }

    pub fn fail_deployments_with(&self, state: DeploymentState) {
        *self.deployment_state.lock().unwrap() = state;
    }

    pub fn fail_listing(&self) {
        *self.fail_listing.lock().unwrap() = true;
    }

    pub fn events(&self) -> Vec<CloudEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn deleted_vms(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CloudEvent::DeleteVm(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_instances(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CloudEvent::DeleteInstance { instance_id, .. } => Some(instance_id),
                _ => None,
            })
            .collect()
    }

    /// `(template, parameters)` of every submitted deployment, in order
    pub fn deployments(&self) -> Vec<(Value, Value)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CloudEvent::Deploy {
                    template,
                    parameters,
                    ..
                } => Some((template, parameters)),
                _ => None,
            })
            .collect()
    }

    pub fn vm_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .vms
            .iter()
            .map(|vm| vm.name.clone())
            .collect();
        names.sort();
        names
    }

    fn check_listing(&self) -> CloudResult<()> {
        if *self.fail_listing.lock().unwrap() {
            return Err(CloudError::Api {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn apply(state: &mut CloudState, parameters: &Value) {
        let Some(parameters) = parameters.as_object() else {
            return;
        };

        for (key, value) in parameters {
            let Some(pool) = key.strip_suffix("Count") else {
                continue;
            };
            let Some(count) = value["value"].as_u64() else {
                continue;
            };
            let count = count as u32;

            if let Some((ss, instances)) = state
                .scale_sets
                .iter_mut()
                .find(|(ss, _)| ss.tags.get(POOL_NAME_TAG) == Ok(pool))
            {
                ss.capacity = count;
                let mut next = instances
                    .iter()
                    .filter_map(|i| i.instance_id.parse::<u32>().ok())
                    .max()
                    .map(|i| i + 1)
                    .unwrap_or(0);
                while (instances.len() as u32) < count {
                    instances.push(scale_set_instance(&ss.name, next));
                    next += 1;
                }
                continue;
            }

            let offset = parameters
                .get(&format!("{}Offset", pool))
                .and_then(|o| o["value"].as_u64())
                .unwrap_or(0) as u32;
            for index in offset..count {
                let vm = linux_vm(pool, index);
                if !state.vms.iter().any(|existing| existing.name == vm.name) {
                    state.vms.push(vm);
                }
            }
        }
    }
}

#[async_trait]
impl CloudProvider for FakeCloud {
    async fn list_virtual_machines(&self, _resource_group: &str) -> CloudResult<Vec<VirtualMachine>> {
        self.check_listing()?;
        Ok(self.state.lock().unwrap().vms.clone())
    }

    async fn list_scale_sets(&self, _resource_group: &str) -> CloudResult<Vec<ScaleSet>> {
        self.check_listing()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .scale_sets
            .iter()
            .map(|(ss, _)| ss.clone())
            .collect())
    }

    async fn list_scale_set_instances(
        &self,
        _resource_group: &str,
        scale_set: &str,
    ) -> CloudResult<Vec<ScaleSetInstance>> {
        self.check_listing()?;
        self.state
            .lock()
            .unwrap()
            .scale_sets
            .iter()
            .find(|(ss, _)| ss.name == scale_set)
            .map(|(_, instances)| instances.clone())
            .ok_or_else(|| CloudError::NotFound(scale_set.to_string()))
    }

    async fn delete_virtual_machine(&self, _resource_group: &str, name: &str) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        state.vms.retain(|vm| vm.name != name);
        state.events.push(CloudEvent::DeleteVm(name.to_string()));
        Ok(())
    }

    async fn delete_network_interface(&self, id: &str) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(CloudEvent::DeleteNic(id.to_string()));
        Ok(())
    }

    async fn delete_managed_disk(&self, id: &str) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(CloudEvent::DeleteDisk(id.to_string()));
        Ok(())
    }

    async fn delete_scale_set_instance(
        &self,
        _resource_group: &str,
        scale_set: &str,
        instance_id: &str,
    ) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some((ss, instances)) = state.scale_sets.iter_mut().find(|(ss, _)| ss.name == scale_set) {
            let before = instances.len();
            instances.retain(|i| i.instance_id != instance_id);
            if instances.len() < before {
                ss.capacity -= 1;
            }
        }
        state.events.push(CloudEvent::DeleteInstance {
            scale_set: scale_set.to_string(),
            instance_id: instance_id.to_string(),
        });
        Ok(())
    }

    async fn submit_deployment(
        &self,
        _resource_group: &str,
        name: &str,
        template: &Value,
        parameters: &Value,
    ) -> CloudResult<DeploymentStatus> {
        let outcome = self.deployment_state.lock().unwrap().clone();
        let mut state = self.state.lock().unwrap();
        state.events.push(CloudEvent::Deploy {
            name: name.to_string(),
            template: template.clone(),
            parameters: parameters.clone(),
        });
        if outcome == DeploymentState::Succeeded {
            Self::apply(&mut state, parameters);
        }
        Ok(DeploymentStatus {
            name: name.to_string(),
            state: DeploymentState::Accepted,
            error: None,
        })
    }

    async fn get_deployment(&self, _resource_group: &str, name: &str) -> CloudResult<DeploymentStatus> {
        let state = self.deployment_state.lock().unwrap().clone();
        let error = match state {
            DeploymentState::Succeeded => None,
            _ => Some("QuotaExceeded: not enough cores".to_string()),
        };
        Ok(DeploymentStatus {
            name: name.to_string(),
            state,
            error,
        })
    }
}

// ============== Fake Control Plane ==============

/// Records drained nodes; nodes in `failing` refuse to drain
#[derive(Default)]
pub struct FakeControlPlane {
    failing: HashSet<String>,
    panicking: HashSet<String>,
    /// Nodes the delay applies to; every node when empty
    slow: HashSet<String>,
    delay: Option<Duration>,
    drained: Mutex<Vec<String>>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(nodes: &[String]) -> Self {
        Self {
            failing: nodes.iter().cloned().collect(),
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Only `nodes` take `delay` to drain
    pub fn slow_on(nodes: &[String], delay: Duration) -> Self {
        Self {
            slow: nodes.iter().cloned().collect(),
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn panicking_on(nodes: &[String]) -> Self {
        Self {
            panicking: nodes.iter().cloned().collect(),
            ..Self::default()
        }
    }

    pub fn drained(&self) -> Vec<String> {
        let mut drained = self.drained.lock().unwrap().clone();
        drained.sort();
        drained
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn drain_node(&self, _kubeconfig: &str, master_endpoint: &str, node: &str) -> EngineResult<()> {
        assert!(master_endpoint.starts_with("https://"), "{}", master_endpoint);

        if let Some(delay) = self.delay {
            if self.slow.is_empty() || self.slow.contains(node) {
                tokio::time::sleep(delay).await;
            }
        }
        if self.panicking.contains(node) {
            panic!("control plane connection to {} dropped", node);
        }
        if self.failing.contains(node) {
            return Err(EngineError::ControlPlane(format!(
                "cannot evict pods from {}: disruption budget exceeded",
                node
            )));
        }
        self.drained.lock().unwrap().push(node.to_string());
        Ok(())
    }
}

// ============== Fake Template Generator ==============

/// Emits a count parameter per pool and remembers what it was asked for
#[derive(Default)]
pub struct FakeGenerator {
    generated: Mutex<Vec<ClusterSpecification>>,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generated(&self) -> Vec<ClusterSpecification> {
        self.generated.lock().unwrap().clone()
    }
}

impl TemplateGenerator for FakeGenerator {
    fn generate(&self, spec: &ClusterSpecification) -> EngineResult<(Value, Value)> {
        self.generated.lock().unwrap().push(spec.clone());

        let mut parameters = json!({
            "orchestratorVersion": { "value": spec.kubernetes_version },
        });
        if spec.agent_pools.is_empty() {
            parameters["masterCount"] = json!({ "value": spec.master.count });
        }
        for pool in &spec.agent_pools {
            parameters[format!("{}Count", pool.name)] = json!({ "value": pool.count });
        }

        let template = json!({
            "variables": {},
            "resources": [],
            "normalized": false,
        });
        Ok((template, parameters))
    }

    fn normalize_for_scale_up(&self, template: &mut Value) -> EngineResult<()> {
        template["normalized"] = json!(true);
        Ok(())
    }
}
