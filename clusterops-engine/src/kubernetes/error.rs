//! Kubernetes error types and EngineError mapping

use crate::error::EngineError;
use thiserror::Error;

/// Kubernetes-specific errors
#[derive(Debug, Error)]
pub enum K8sError {
    /// Error from kube-rs client
    #[cfg(feature = "kubernetes")]
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Invalid kubeconfig
    #[error("Invalid kubeconfig: {0}")]
    InvalidKubeconfig(String),

    /// A pod could not be evicted
    #[error("Eviction of pod {namespace}/{pod} failed: {message}")]
    Eviction {
        namespace: String,
        pod: String,
        message: String,
    },

    /// Internal system error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<K8sError> for EngineError {
    fn from(err: K8sError) -> Self {
        EngineError::ControlPlane(err.to_string())
    }
}

/// Result type alias for Kubernetes operations
pub type K8sResult<T> = std::result::Result<T, K8sError>;
