//! Clusterops Engine Library
//!
//! Scaling and upgrade engine for Kubernetes clusters deployed from
//! infrastructure templates. It discovers the nodes of an agent pool, drains
//! and deletes the ones a scale-down removes, patches regenerated templates
//! for scale-ups and node replacements, and sequences rolling upgrades.

// Core modules
pub mod config;
pub mod error;
pub mod validation;

// Cloud access
pub mod cloud;
pub mod credentials;

// Secrets management
pub mod secrets;

// Node discovery
pub mod naming;
pub mod resolver;

// Kubernetes integration
pub mod kubernetes;

// Node removal
pub mod drain;

// Templates
pub mod template;

// Orchestration
pub mod scale;
pub mod upgrade;
pub mod drift;

// Specification persistence
pub mod store;

// Logging configuration
pub mod logging;

pub use error::{EngineError, EngineResult, OperationContext};
pub use scale::{ScaleOrchestrator, ScaleOutcome, ScalePlan};
pub use upgrade::{UpgradeOrchestrator, UpgradeOutcome, UpgradePlan};
