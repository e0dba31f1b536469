//! Node operations
//!
//! Cordon and drain a node ahead of deleting the machine behind it.

use crate::kubernetes::client::K8sClient;
#[cfg(not(feature = "kubernetes"))]
use crate::kubernetes::error::K8sError;
use crate::kubernetes::error::K8sResult;
use std::time::Duration;

/// Annotation carried by static pods mirrored from the kubelet
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Drain behaviour
#[derive(Debug, Clone)]
pub struct DrainOptions {
    /// Grace period handed to each eviction
    pub grace_period_seconds: Option<u32>,
    /// Wait between retries of a throttled eviction and between deletion checks
    pub poll_interval: Duration,
}

impl Default for DrainOptions {
    fn default() -> Self {
        Self {
            grace_period_seconds: None,
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Whether a pod is left alone by a drain
#[cfg(feature = "kubernetes")]
fn skipped_by_drain(pod: &k8s_openapi::api::core::v1::Pod) -> bool {
    let mirror = pod
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(MIRROR_POD_ANNOTATION));
    let daemonset = pod
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.kind == "DaemonSet"));
    mirror || daemonset
}

/// Cordon a node (mark as unschedulable)
#[cfg(feature = "kubernetes")]
pub async fn cordon_node(client: &K8sClient, name: &str) -> K8sResult<()> {
    use k8s_openapi::api::core::v1::Node;
    use kube::api::{Api, Patch, PatchParams};

    let nodes: Api<Node> = Api::all(client.inner().clone());

    let patch = serde_json::json!({
        "spec": {
            "unschedulable": true
        }
    });

    nodes
        .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    Ok(())
}

/// Drain a node: cordon it, evict every pod that is neither a mirror pod nor
/// owned by a DaemonSet, then wait until the evicted pods are gone
#[cfg(feature = "kubernetes")]
pub async fn drain_node(client: &K8sClient, name: &str, options: &DrainOptions) -> K8sResult<()> {
    use crate::kubernetes::error::K8sError;
    use k8s_openapi::api::core::v1::Pod;
    use kube::api::{Api, DeleteParams, EvictParams, ListParams};

    cordon_node(client, name).await?;

    let pods: Api<Pod> = Api::all(client.inner().clone());
    let field_selector = format!("spec.nodeName={}", name);
    let pod_list = pods
        .list(&ListParams::default().fields(&field_selector))
        .await?;

    let evict_params = EvictParams {
        delete_options: Some(DeleteParams {
            grace_period_seconds: options.grace_period_seconds,
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut evicted = Vec::new();
    for pod in pod_list.items.iter().filter(|p| !skipped_by_drain(p)) {
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        let pod_namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let pod_api: Api<Pod> = Api::namespaced(client.inner().clone(), &pod_namespace);

        loop {
            match pod_api.evict(&pod_name, &evict_params).await {
                Ok(_) => break,
                Err(kube::Error::Api(e)) if e.code == 404 => break,
                // A disruption budget is holding the pod; try again
                Err(kube::Error::Api(e)) if e.code == 429 => {
                    tracing::debug!(node = name, pod = %pod_name, "Eviction throttled, retrying");
                    tokio::time::sleep(options.poll_interval).await;
                }
                Err(e) => {
                    return Err(K8sError::Eviction {
                        namespace: pod_namespace,
                        pod: pod_name,
                        message: e.to_string(),
                    })
                }
            }
        }

        evicted.push((pod_api, pod_name, pod.metadata.uid.clone()));
    }

    for (pod_api, pod_name, uid) in evicted {
        loop {
            match pod_api.get_opt(&pod_name).await? {
                Some(current) if current.metadata.uid == uid => {
                    tokio::time::sleep(options.poll_interval).await;
                }
                _ => break,
            }
        }
    }

    tracing::info!(node = name, "Node drained");
    Ok(())
}

#[cfg(not(feature = "kubernetes"))]
pub async fn cordon_node(_client: &K8sClient, _name: &str) -> K8sResult<()> {
    Err(K8sError::Internal("Kubernetes feature not enabled".to_string()))
}

#[cfg(not(feature = "kubernetes"))]
pub async fn drain_node(_client: &K8sClient, _name: &str, _options: &DrainOptions) -> K8sResult<()> {
    Err(K8sError::Internal("Kubernetes feature not enabled".to_string()))
}

#[cfg(all(test, feature = "kubernetes"))]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use std::collections::BTreeMap;

    #[test]
    fn test_mirror_and_daemonset_pods_are_skipped() {
        let plain = Pod::default();
        assert!(!skipped_by_drain(&plain));

        let mut annotations = BTreeMap::new();
        annotations.insert(MIRROR_POD_ANNOTATION.to_string(), "abc".to_string());
        let mirror = Pod {
            metadata: ObjectMeta {
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(skipped_by_drain(&mirror));

        let daemon = Pod {
            metadata: ObjectMeta {
                owner_references: Some(vec![OwnerReference {
                    kind: "DaemonSet".to_string(),
                    name: "kube-proxy".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(skipped_by_drain(&daemon));
    }
}
