//! Azure Resource Manager client

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{
    CloudError, CloudProvider, CloudResult, DeploymentState, DeploymentStatus, ScaleSet,
    ScaleSetInstance, Tags, VirtualMachine,
};
use crate::credentials::TokenSource;

const COMPUTE_API_VERSION: &str = "2018-04-01";
const NETWORK_API_VERSION: &str = "2018-04-01";
const DEPLOYMENT_API_VERSION: &str = "2017-05-10";

/// Resource Manager client scoped to one subscription
#[derive(Clone)]
pub struct ArmClient {
    client: reqwest::Client,
    base_url: String,
    subscription_id: String,
    token: Arc<dyn TokenSource>,
    poll_interval: Duration,
}

impl ArmClient {
    /// Create a new client
    pub fn new(
        base_url: &str,
        subscription_id: &str,
        token: Arc<dyn TokenSource>,
    ) -> CloudResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            subscription_id: subscription_id.to_string(),
            token,
            poll_interval: Duration::from_secs(10),
        })
    }

    /// Interval between polls of long-running operations
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> CloudResult<Self> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    fn group_path(&self, resource_group: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}",
            self.subscription_id,
            urlencoding::encode(resource_group)
        )
    }

    async fn headers(&self) -> CloudResult<HeaderMap> {
        let token = self.token.token().await?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| CloudError::Unexpected("access token is not a valid header".to_string()))?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    fn url(&self, path: &str, api_version: &str) -> String {
        let sep = if path.contains('?') { '&' } else { '?' };
        format!("{}{}{}api-version={}", self.base_url, path, sep, api_version)
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> CloudResult<T> {
        let response = self
            .client
            .get(url)
            .headers(self.headers().await?)
            .send()
            .await?;

        handle_response(response).await
    }

    /// GET every page of a list endpoint
    async fn list<T: DeserializeOwned>(&self, path: &str, api_version: &str) -> CloudResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(self.url(path, api_version));

        while let Some(url) = next {
            let page: Page<T> = self.get(&url).await?;
            items.extend(page.value);
            next = page.next_link;
        }

        Ok(items)
    }

    /// Issue a delete or action request and wait for the operation to finish
    async fn long_running(&self, request: reqwest::RequestBuilder, what: &str) -> CloudResult<()> {
        let response = request.headers(self.headers().await?).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            tracing::debug!("{} already gone", what);
            return Ok(());
        }
        if !status.is_success() {
            return Err(error_from(response).await);
        }

        let monitor = response
            .headers()
            .get("Azure-AsyncOperation")
            .or_else(|| response.headers().get("Location"))
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let Some(monitor) = monitor else {
            return Ok(());
        };

        loop {
            tokio::time::sleep(self.poll_interval).await;
            let response = self
                .client
                .get(&monitor)
                .headers(self.headers().await?)
                .send()
                .await?;

            match response.status() {
                StatusCode::ACCEPTED => continue,
                s if s.is_success() => {
                    let body = response.text().await?;
                    match operation_status(&body) {
                        None | Some("Succeeded") => return Ok(()),
                        Some("InProgress") => continue,
                        Some(other) => {
                            return Err(CloudError::Unexpected(format!(
                                "{} ended in state {}",
                                what, other
                            )))
                        }
                    }
                }
                _ => return Err(error_from(response).await),
            }
        }
    }
}

#[derive(Deserialize)]
struct Page<T> {
    value: Vec<T>,
    #[serde(rename = "nextLink", default)]
    next_link: Option<String>,
}

async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> CloudResult<T> {
    if response.status().is_success() {
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    } else {
        Err(error_from(response).await)
    }
}

async fn error_from(response: reqwest::Response) -> CloudError {
    let status = response.status();
    let url = response.url().path().to_string();
    match status.as_u16() {
        401 | 403 => CloudError::AuthFailed,
        404 => CloudError::NotFound(url),
        code => CloudError::Api {
            status: code,
            message: response.text().await.unwrap_or_default(),
        },
    }
}

/// `status` field of an async-operation body, when it has one
fn operation_status(body: &str) -> Option<&str> {
    #[derive(Deserialize)]
    struct OperationBody<'a> {
        #[serde(borrow)]
        status: Option<&'a str>,
    }

    serde_json::from_str::<OperationBody>(body)
        .ok()
        .and_then(|b| b.status)
}

#[derive(Deserialize)]
struct ArmVirtualMachine {
    id: String,
    name: String,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    properties: serde_json::Value,
}

impl From<ArmVirtualMachine> for VirtualMachine {
    fn from(vm: ArmVirtualMachine) -> Self {
        let storage = &vm.properties["storageProfile"];
        let os_publisher = storage["imageReference"]["publisher"]
            .as_str()
            .map(String::from);
        let os_disk_id = storage["osDisk"]["managedDisk"]["id"]
            .as_str()
            .map(String::from);
        let nic_ids = vm.properties["networkProfile"]["networkInterfaces"]
            .as_array()
            .map(|nics| {
                nics.iter()
                    .filter_map(|n| n["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        VirtualMachine {
            id: vm.id,
            name: vm.name,
            tags: Tags::from(vm.tags),
            os_publisher,
            nic_ids,
            os_disk_id,
        }
    }
}

#[derive(Deserialize)]
struct ArmScaleSet {
    id: String,
    name: String,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    sku: Option<ArmSku>,
    #[serde(default)]
    properties: serde_json::Value,
}

#[derive(Deserialize)]
struct ArmSku {
    #[serde(default)]
    capacity: u32,
}

impl From<ArmScaleSet> for ScaleSet {
    fn from(ss: ArmScaleSet) -> Self {
        let os_publisher = ss.properties["virtualMachineProfile"]["storageProfile"]
            ["imageReference"]["publisher"]
            .as_str()
            .map(String::from);

        ScaleSet {
            id: ss.id,
            name: ss.name,
            tags: Tags::from(ss.tags),
            capacity: ss.sku.map(|s| s.capacity).unwrap_or(0),
            os_publisher,
        }
    }
}

#[derive(Deserialize)]
struct ArmScaleSetVm {
    #[serde(rename = "instanceId")]
    instance_id: String,
    #[serde(default)]
    properties: serde_json::Value,
}

impl ArmScaleSetVm {
    fn into_instance(self) -> CloudResult<ScaleSetInstance> {
        let computer_name = self.properties["osProfile"]["computerName"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| {
                CloudError::Unexpected(format!(
                    "scale set instance {} has no computer name",
                    self.instance_id
                ))
            })?;

        Ok(ScaleSetInstance {
            instance_id: self.instance_id,
            computer_name,
        })
    }
}

#[derive(Deserialize)]
struct ArmDeployment {
    name: String,
    #[serde(default)]
    properties: serde_json::Value,
}

impl From<ArmDeployment> for DeploymentStatus {
    fn from(d: ArmDeployment) -> Self {
        let state = d.properties["provisioningState"]
            .as_str()
            .map(DeploymentState::parse)
            .unwrap_or(DeploymentState::Accepted);
        let error = d.properties.get("error").map(|e| {
            e["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| e.to_string())
        });

        DeploymentStatus {
            name: d.name,
            state,
            error,
        }
    }
}

#[async_trait]
impl CloudProvider for ArmClient {
    async fn list_virtual_machines(&self, resource_group: &str) -> CloudResult<Vec<VirtualMachine>> {
        let path = format!(
            "{}/providers/Microsoft.Compute/virtualMachines",
            self.group_path(resource_group)
        );
        let vms: Vec<ArmVirtualMachine> = self.list(&path, COMPUTE_API_VERSION).await?;
        Ok(vms.into_iter().map(VirtualMachine::from).collect())
    }

    async fn list_scale_sets(&self, resource_group: &str) -> CloudResult<Vec<ScaleSet>> {
        let path = format!(
            "{}/providers/Microsoft.Compute/virtualMachineScaleSets",
            self.group_path(resource_group)
        );
        let sets: Vec<ArmScaleSet> = self.list(&path, COMPUTE_API_VERSION).await?;
        Ok(sets.into_iter().map(ScaleSet::from).collect())
    }

    async fn list_scale_set_instances(
        &self,
        resource_group: &str,
        scale_set: &str,
    ) -> CloudResult<Vec<ScaleSetInstance>> {
        let path = format!(
            "{}/providers/Microsoft.Compute/virtualMachineScaleSets/{}/virtualMachines",
            self.group_path(resource_group),
            urlencoding::encode(scale_set)
        );
        let vms: Vec<ArmScaleSetVm> = self.list(&path, COMPUTE_API_VERSION).await?;
        vms.into_iter().map(ArmScaleSetVm::into_instance).collect()
    }

    async fn delete_virtual_machine(&self, resource_group: &str, name: &str) -> CloudResult<()> {
        let path = format!(
            "{}/providers/Microsoft.Compute/virtualMachines/{}",
            self.group_path(resource_group),
            urlencoding::encode(name)
        );
        let request = self.client.delete(self.url(&path, COMPUTE_API_VERSION));
        self.long_running(request, &format!("delete of VM {}", name))
            .await
    }

    async fn delete_network_interface(&self, id: &str) -> CloudResult<()> {
        let request = self.client.delete(self.url(id, NETWORK_API_VERSION));
        self.long_running(request, &format!("delete of NIC {}", id))
            .await
    }

    async fn delete_managed_disk(&self, id: &str) -> CloudResult<()> {
        let request = self.client.delete(self.url(id, COMPUTE_API_VERSION));
        self.long_running(request, &format!("delete of disk {}", id))
            .await
    }

    async fn delete_scale_set_instance(
        &self,
        resource_group: &str,
        scale_set: &str,
        instance_id: &str,
    ) -> CloudResult<()> {
        let path = format!(
            "{}/providers/Microsoft.Compute/virtualMachineScaleSets/{}/delete",
            self.group_path(resource_group),
            urlencoding::encode(scale_set)
        );
        let request = self
            .client
            .post(self.url(&path, COMPUTE_API_VERSION))
            .json(&serde_json::json!({ "instanceIds": [instance_id] }));
        self.long_running(
            request,
            &format!("delete of instance {} in {}", instance_id, scale_set),
        )
        .await
    }

    async fn submit_deployment(
        &self,
        resource_group: &str,
        name: &str,
        template: &serde_json::Value,
        parameters: &serde_json::Value,
    ) -> CloudResult<DeploymentStatus> {
        let path = format!(
            "{}/providers/Microsoft.Resources/deployments/{}",
            self.group_path(resource_group),
            urlencoding::encode(name)
        );
        let body = serde_json::json!({
            "properties": {
                "template": template,
                "parameters": parameters,
                "mode": "Incremental",
            }
        });

        let response = self
            .client
            .put(self.url(&path, DEPLOYMENT_API_VERSION))
            .headers(self.headers().await?)
            .json(&body)
            .send()
            .await?;

        let deployment: ArmDeployment = handle_response(response).await?;
        Ok(deployment.into())
    }

    async fn get_deployment(&self, resource_group: &str, name: &str) -> CloudResult<DeploymentStatus> {
        let path = format!(
            "{}/providers/Microsoft.Resources/deployments/{}",
            self.group_path(resource_group),
            urlencoding::encode(name)
        );
        let deployment: ArmDeployment = self.get(&self.url(&path, DEPLOYMENT_API_VERSION)).await?;
        Ok(deployment.into())
    }
}
