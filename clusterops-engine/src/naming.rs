//! Node name parsing
//!
//! Linux nodes are named `<prefix>-<pool>-<suffix>-<index>` (for example
//! `k8s-agentpool1-12345678-3`). Windows computer names are limited to 15
//! characters, so Windows nodes pack everything into `<suffix><prefix><digits>`
//! (for example `1234k8s9012`), where the first three digits are
//! `900 + pool index` and the rest is the VM index.

use clusterops_common::OsType;
use regex::Regex;
use std::sync::LazyLock;

use crate::cloud::WINDOWS_PUBLISHER;
use crate::error::{EngineError, EngineResult};

static LINUX_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-zA-Z]{3}-(.+)-([0-9a-fA-F]{8})-{0,2}([0-9]+)$").unwrap()
});

static WINDOWS_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-fA-F0-9]{4})([0-9a-zA-Z]{3})([0-9]{3,8})$").unwrap()
});

static WINDOWS_SCALE_SET_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-fA-F0-9]{4})([0-9a-zA-Z]{3})([0-9]{3})$").unwrap()
});

/// Offset added to the pool index in Windows node names
pub const WINDOWS_POOL_INDEX_BASE: u32 = 900;

/// Pieces of a node name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedNodeName {
    /// Pool identifier embedded in the name (Linux only)
    pub pool_identifier: Option<String>,
    /// Name suffix fragment embedded in the name
    pub name_suffix: String,
    /// VM index within the pool
    pub index: u32,
    pub os_type: OsType,
    /// Pool index encoded in Windows names
    pub windows_pool_index: Option<u32>,
}

impl ParsedNodeName {
    pub fn is_windows(&self) -> bool {
        self.os_type == OsType::Windows
    }
}

/// Whether an image publisher selects the Windows naming scheme
pub fn is_windows_publisher(os_publisher: Option<&str>) -> bool {
    os_publisher
        .map(|p| p.eq_ignore_ascii_case(WINDOWS_PUBLISHER))
        .unwrap_or(false)
}

/// Parse a node name, choosing the scheme from the image publisher
pub fn parse_node_name(name: &str, os_publisher: Option<&str>) -> EngineResult<ParsedNodeName> {
    if is_windows_publisher(os_publisher) {
        parse_windows_name(name)
    } else {
        parse_linux_name(name)
    }
}

fn name_error(name: &str, reason: impl Into<String>) -> EngineError {
    EngineError::NodeName {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn parse_linux_name(name: &str) -> EngineResult<ParsedNodeName> {
    let caps = LINUX_NAME_REGEX
        .captures(name)
        .ok_or_else(|| name_error(name, "does not match the Linux naming scheme"))?;

    let index = caps[3]
        .parse::<u32>()
        .map_err(|e| name_error(name, format!("invalid index '{}': {}", &caps[3], e)))?;

    Ok(ParsedNodeName {
        pool_identifier: Some(caps[1].to_string()),
        name_suffix: caps[2].to_string(),
        index,
        os_type: OsType::Linux,
        windows_pool_index: None,
    })
}

fn parse_windows_name(name: &str) -> EngineResult<ParsedNodeName> {
    let caps = WINDOWS_NAME_REGEX
        .captures(name)
        .ok_or_else(|| name_error(name, "does not match the Windows naming scheme"))?;

    let digits = &caps[3];
    let (pool_part, index_part) = digits.split_at(3);
    if index_part.is_empty() {
        return Err(name_error(name, "no VM index after the pool index"));
    }

    let encoded_pool = pool_part
        .parse::<u32>()
        .map_err(|e| name_error(name, format!("invalid pool index '{}': {}", pool_part, e)))?;
    let pool_index = encoded_pool
        .checked_sub(WINDOWS_POOL_INDEX_BASE)
        .ok_or_else(|| {
            name_error(
                name,
                format!("pool index {} is below {}", encoded_pool, WINDOWS_POOL_INDEX_BASE),
            )
        })?;
    let index = index_part
        .parse::<u32>()
        .map_err(|e| name_error(name, format!("invalid index '{}': {}", index_part, e)))?;

    Ok(ParsedNodeName {
        pool_identifier: None,
        name_suffix: caps[1].to_string(),
        index,
        os_type: OsType::Windows,
        windows_pool_index: Some(pool_index),
    })
}

/// Pool index of a Windows scale set named `<suffix><prefix><900 + pool index>`.
///
/// Instance hostnames extend this name with a generated suffix, so the pool
/// index has to come from the scale set itself.
pub fn parse_windows_scale_set_name(name: &str) -> EngineResult<u32> {
    let caps = WINDOWS_SCALE_SET_REGEX
        .captures(name)
        .ok_or_else(|| name_error(name, "does not match the Windows scale set naming scheme"))?;

    let encoded_pool = caps[3]
        .parse::<u32>()
        .map_err(|e| name_error(name, format!("invalid pool index '{}': {}", &caps[3], e)))?;
    encoded_pool
        .checked_sub(WINDOWS_POOL_INDEX_BASE)
        .ok_or_else(|| {
            name_error(
                name,
                format!("pool index {} is below {}", encoded_pool, WINDOWS_POOL_INDEX_BASE),
            )
        })
}
