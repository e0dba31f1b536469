//! Input validation for cluster specifications and scale requests
//!
//! Names end up embedded in cloud resource names, so they are held to the
//! character sets those names allow.

use clusterops_common::{ClusterSpecification, Error};
use regex::Regex;
use std::sync::LazyLock;

use crate::resolver::MASTER_POOL_NAME;
use crate::upgrade::versions::parse_version;

/// Maximum allowed lengths for various fields
pub const MAX_CLUSTER_NAME_LENGTH: usize = 63;
pub const MAX_POOL_NAME_LENGTH: usize = 12;
pub const MAX_RESOURCE_GROUP_LENGTH: usize = 90;

/// Upper bound on the node count of a single pool
pub const MAX_POOL_COUNT: u32 = 100;

/// Regex patterns for validation
static CLUSTER_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*$").unwrap()
});

static POOL_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9]*$").unwrap()
});

static RESOURCE_GROUP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-\w\.\(\)]+$").unwrap()
});

static NAME_SUFFIX_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}$").unwrap()
});

/// Validation result type
pub type ValidationResult<T> = Result<T, Error>;

/// Cluster name validation
pub fn validate_cluster_name(name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(Error::Validation("cluster name cannot be empty".to_string()));
    }

    if name.len() > MAX_CLUSTER_NAME_LENGTH {
        return Err(Error::Validation(format!(
            "cluster name too long (max {} characters)",
            MAX_CLUSTER_NAME_LENGTH
        )));
    }

    if !CLUSTER_NAME_REGEX.is_match(name) {
        return Err(Error::Validation(
            "cluster name can only contain alphanumeric characters, hyphens, and underscores"
                .to_string(),
        ));
    }

    Ok(())
}

/// Agent pool name validation
pub fn validate_pool_name(name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(Error::Validation("agent pool name cannot be empty".to_string()));
    }

    if name.len() > MAX_POOL_NAME_LENGTH {
        return Err(Error::Validation(format!(
            "agent pool name '{}' too long (max {} characters)",
            name, MAX_POOL_NAME_LENGTH
        )));
    }

    if !POOL_NAME_REGEX.is_match(name) {
        return Err(Error::Validation(format!(
            "agent pool name '{}' must start with a lowercase letter and contain only lowercase letters and digits",
            name
        )));
    }

    // The control plane uses the same tag and parameter names
    if name == MASTER_POOL_NAME {
        return Err(Error::Validation(format!(
            "agent pool name '{}' is reserved",
            name
        )));
    }

    Ok(())
}

/// Resource group name validation
pub fn validate_resource_group(name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(Error::Validation("resource group cannot be empty".to_string()));
    }

    if name.len() > MAX_RESOURCE_GROUP_LENGTH {
        return Err(Error::Validation(format!(
            "resource group too long (max {} characters)",
            MAX_RESOURCE_GROUP_LENGTH
        )));
    }

    if !RESOURCE_GROUP_REGEX.is_match(name) || name.ends_with('.') {
        return Err(Error::Validation(format!(
            "invalid resource group name '{}'",
            name
        )));
    }

    Ok(())
}

/// Name suffix validation
pub fn validate_name_suffix(suffix: &str) -> ValidationResult<()> {
    if !NAME_SUFFIX_REGEX.is_match(suffix) {
        return Err(Error::Validation(format!(
            "name suffix '{}' must be 8 hexadecimal characters",
            suffix
        )));
    }
    Ok(())
}

/// Kubernetes version validation
pub fn validate_kubernetes_version(version: &str) -> ValidationResult<()> {
    parse_version(version)
        .map(|_| ())
        .map_err(|e| Error::Validation(e.to_string()))
}

/// Requested pool size validation
pub fn validate_pool_count(count: u32) -> ValidationResult<()> {
    if count > MAX_POOL_COUNT {
        return Err(Error::Validation(format!(
            "pool count {} exceeds the maximum of {}",
            count, MAX_POOL_COUNT
        )));
    }
    Ok(())
}

/// Full validation of a cluster specification
pub fn validate_specification(spec: &ClusterSpecification) -> ValidationResult<()> {
    spec.validate()?;

    validate_cluster_name(&spec.name)?;
    validate_resource_group(&spec.resource_group)?;
    validate_name_suffix(&spec.name_suffix)?;
    validate_kubernetes_version(&spec.kubernetes_version)?;

    for pool in &spec.agent_pools {
        validate_pool_name(&pool.name)?;
        validate_pool_count(pool.count)?;
    }

    Ok(())
}
