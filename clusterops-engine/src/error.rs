//! Engine error types
//!
//! Every orchestrator step wraps the error it hits in
//! [`EngineError::Operation`] so the caller sees which step failed.

use crate::cloud::{CloudError, TagError};
use std::time::Duration;
use thiserror::Error;

/// A node whose drain or delete failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub node: String,
    pub cause: String,
}

impl std::fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.node, self.cause)
    }
}

/// Errors surfaced by the scaling and upgrade engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Cloud request failed
    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// Resource tag missing or unusable
    #[error("Tag error: {0}")]
    Tag(#[from] TagError),

    /// Pool expected to have nodes but none were found
    #[error("No resources found for agent pool '{pool}' in resource group '{resource_group}'")]
    EmptyPool {
        pool: String,
        resource_group: String,
    },

    /// Resource name matches neither naming scheme
    #[error("Cannot parse node name '{name}': {reason}")]
    NodeName { name: String, reason: String },

    /// One or more nodes failed to drain or delete
    #[error("{} node(s) failed to drain or delete: {}", .0.len(), format_failures(.0))]
    Drain(Vec<NodeFailure>),

    /// Template or parameter document is malformed
    #[error("Template error at '{path}': {message}")]
    Template { path: String, message: String },

    /// Version string cannot be parsed
    #[error("Invalid Kubernetes version '{0}'")]
    InvalidVersion(String),

    /// Requested version is not reachable from the current one
    #[error("Cannot upgrade from {current} to {target}; allowed targets: [{}]", .allowed.join(", "))]
    InvalidUpgrade {
        current: String,
        target: String,
        allowed: Vec<String>,
    },

    /// Deployment was rejected or ended in a failed state
    #[error("Deployment '{name}' failed: {message}")]
    Deployment { name: String, message: String },

    /// Control plane (drain) error
    #[error("Control plane error: {0}")]
    ControlPlane(String),

    /// Specification store error
    #[error("Specification store error: {0}")]
    Store(String),

    /// Secret store error
    #[error("Secret store error: {0}")]
    Secret(String),

    /// Invalid engine or cluster configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A bounded step ran out of time
    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    /// Error wrapped with the name of the operation that failed
    #[error("{operation}: {source}")]
    Operation {
        operation: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Failed nodes of a drain error, looking through operation wrappers
    pub fn failed_nodes(&self) -> Vec<&str> {
        match self {
            Self::Drain(failures) => failures.iter().map(|f| f.node.as_str()).collect(),
            Self::Operation { source, .. } => source.failed_nodes(),
            _ => Vec::new(),
        }
    }

    /// Innermost error beneath any operation wrappers
    pub fn root(&self) -> &EngineError {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }
}

fn format_failures(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<clusterops_common::Error> for EngineError {
    fn from(err: clusterops_common::Error) -> Self {
        match err {
            clusterops_common::Error::InvalidConfig(msg) => EngineError::Config(msg),
            clusterops_common::Error::Io(e) => EngineError::Store(format!("I/O error: {}", e)),
            other => EngineError::Config(other.to_string()),
        }
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Attach the name of the failing operation to an error
pub trait OperationContext<T> {
    fn context(self, operation: impl Into<String>) -> EngineResult<T>;
}

impl<T, E: Into<EngineError>> OperationContext<T> for std::result::Result<T, E> {
    fn context(self, operation: impl Into<String>) -> EngineResult<T> {
        self.map_err(|e| EngineError::Operation {
            operation: operation.into(),
            source: Box::new(e.into()),
        })
    }
}
