//! Kubernetes version support and upgrade paths

use semver::Version;

use crate::error::{EngineError, EngineResult};

/// Versions the engine can deploy, oldest first
pub const DEFAULT_SUPPORTED_VERSIONS: &[&str] = &[
    "1.9.10", "1.9.11", "1.10.8", "1.10.9", "1.10.12", "1.10.13", "1.11.5", "1.11.6", "1.11.7",
    "1.11.8", "1.12.5", "1.12.6", "1.12.7", "1.13.4", "1.13.5",
];

/// Source of the upgrade targets allowed from a version
pub trait VersionInfoProvider: Send + Sync {
    /// Versions `current` may be upgraded to, ascending
    fn allowed_upgrades(&self, current: &str) -> EngineResult<Vec<String>>;
}

/// Parse a Kubernetes version, accepting a leading `v`
pub fn parse_version(version: &str) -> EngineResult<Version> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).map_err(|_| EngineError::InvalidVersion(version.to_string()))
}

/// Upgrade paths over a fixed list of supported versions.
///
/// From a given version the allowed targets are the later patch releases of
/// the same minor version and every release of the next minor version.
#[derive(Debug, Clone)]
pub struct SupportedVersions {
    versions: Vec<Version>,
}

impl SupportedVersions {
    pub fn new<S: AsRef<str>>(versions: &[S]) -> EngineResult<Self> {
        let mut parsed = versions
            .iter()
            .map(|v| parse_version(v.as_ref()))
            .collect::<EngineResult<Vec<_>>>()?;
        parsed.sort();
        parsed.dedup();
        Ok(Self { versions: parsed })
    }

    pub fn versions(&self) -> impl Iterator<Item = &Version> {
        self.versions.iter()
    }

    pub fn is_supported(&self, version: &str) -> bool {
        parse_version(version)
            .map(|v| self.versions.contains(&v))
            .unwrap_or(false)
    }
}

impl Default for SupportedVersions {
    fn default() -> Self {
        let mut versions: Vec<Version> = DEFAULT_SUPPORTED_VERSIONS
            .iter()
            .filter_map(|v| Version::parse(v).ok())
            .collect();
        versions.sort();
        Self { versions }
    }
}

impl VersionInfoProvider for SupportedVersions {
    fn allowed_upgrades(&self, current: &str) -> EngineResult<Vec<String>> {
        let current = parse_version(current)?;

        Ok(self
            .versions
            .iter()
            .filter(|v| *v > &current)
            .filter(|v| v.major == current.major)
            .filter(|v| v.minor == current.minor || v.minor == current.minor + 1)
            .map(|v| v.to_string())
            .collect())
    }
}

/// Check that `target` is reachable from `current`, returning the parsed target
pub fn validate_upgrade(
    provider: &dyn VersionInfoProvider,
    current: &str,
    target: &str,
) -> EngineResult<Version> {
    let parsed = parse_version(target)?;
    let allowed = provider.allowed_upgrades(current)?;

    let reachable = allowed
        .iter()
        .filter_map(|v| parse_version(v).ok())
        .any(|v| v == parsed);

    if !reachable {
        return Err(EngineError::InvalidUpgrade {
            current: current.to_string(),
            target: target.to_string(),
            allowed,
        });
    }

    Ok(parsed)
}
