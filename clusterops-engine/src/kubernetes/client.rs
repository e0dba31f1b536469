//! Kubernetes client wrapper
//!
//! Builds a kube-rs Client from the cluster's admin kubeconfig, pointed at
//! the master endpoint the engine was given rather than whatever server the
//! kubeconfig names.

#[cfg(feature = "kubernetes")]
use kube::{Client, Config};

#[cfg(not(feature = "kubernetes"))]
use super::error::K8sError;
use super::error::K8sResult;

/// Add `https://` to an endpoint that has no scheme
pub fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    }
}

/// Wrapper around kube-rs Client with cluster context
#[derive(Clone)]
pub struct K8sClient {
    #[cfg(feature = "kubernetes")]
    inner: Client,
    api_server: String,
}

impl K8sClient {
    /// Create client from kubeconfig YAML, overriding the server URL of every
    /// cluster entry with `master_endpoint`
    #[cfg(feature = "kubernetes")]
    pub async fn from_kubeconfig(kubeconfig_yaml: &str, master_endpoint: &str) -> K8sResult<Self> {
        use super::error::K8sError;
        use kube::config::{KubeConfigOptions, Kubeconfig};

        let mut kubeconfig = Kubeconfig::from_yaml(kubeconfig_yaml).map_err(|e| {
            K8sError::InvalidKubeconfig(format!("Failed to parse kubeconfig: {}", e))
        })?;

        if kubeconfig.clusters.is_empty() {
            return Err(K8sError::InvalidKubeconfig(
                "kubeconfig has no cluster entries".into(),
            ));
        }

        let api_server = normalize_endpoint(master_endpoint);
        for named in kubeconfig.clusters.iter_mut() {
            if let Some(cluster) = named.cluster.as_mut() {
                cluster.server = Some(api_server.clone());
            }
        }

        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| K8sError::InvalidKubeconfig(format!("Failed to create config: {}", e)))?;

        let client = Client::try_from(config)
            .map_err(|e| K8sError::InvalidKubeconfig(format!("Failed to create client: {}", e)))?;

        Ok(Self {
            inner: client,
            api_server,
        })
    }

    /// Get the inner kube-rs Client
    #[cfg(feature = "kubernetes")]
    pub fn inner(&self) -> &Client {
        &self.inner
    }

    /// Get API server URL
    pub fn api_server(&self) -> &str {
        &self.api_server
    }

    #[cfg(not(feature = "kubernetes"))]
    pub async fn from_kubeconfig(
        _kubeconfig_yaml: &str,
        _master_endpoint: &str,
    ) -> K8sResult<Self> {
        Err(K8sError::Internal(
            "Kubernetes feature not enabled".to_string(),
        ))
    }
}

impl std::fmt::Debug for K8sClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("K8sClient")
            .field("api_server", &self.api_server)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("mycluster.westus2.cloudapp.azure.com"),
            "https://mycluster.westus2.cloudapp.azure.com"
        );
        assert_eq!(normalize_endpoint("https://10.0.0.4"), "https://10.0.0.4");
        assert_eq!(normalize_endpoint("http://localhost:8080"), "http://localhost:8080");
    }
}
