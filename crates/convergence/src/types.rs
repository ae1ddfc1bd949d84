//! Core types for key convergence

use chrono::{DateTime, Utc};
use kmskit::types::{DEFAULT_KEY_USAGE, DEFAULT_POLICY};
use kmskit::{Error, GrantSpec, RetryConfig, WaitConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type label shown for every managed key.
pub const RESOURCE_TYPE: &str = "AWS-kms-key";

/// Desired state of a key, supplied fresh on every run.
///
/// Empty strings and `None` mean "no opinion".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceDefinition {
    /// Resource name (the key of the definition table)
    pub name: String,
    /// Region the key lives in
    pub region: String,
    /// Accessor credential identifier; empty resolves from the environment
    pub access_key_id: String,
    /// Key policy document; empty uses the service default
    pub policy: String,
    /// Alias, e.g. `alias/app`
    pub alias: String,
    /// Usage kind; empty uses `ENCRYPT/DECRYPT`
    pub key_usage: String,
    /// Whether the key is enabled; created keys default to enabled
    pub enabled: Option<bool>,
    /// Human description
    pub description: String,
    /// Grants to issue, in order
    pub grants: Vec<GrantSpec>,
}

impl ResourceDefinition {
    /// Create a definition with only a name and region.
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            ..Default::default()
        }
    }

    /// Check the fields that must be present before anything else happens.
    pub fn validate(&self) -> kmskit::Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidDefinition {
                field: "name".to_string(),
                message: "resource name must not be empty".to_string(),
            });
        }
        if self.region.trim().is_empty() {
            return Err(Error::InvalidDefinition {
                field: "region".to_string(),
                message: format!("no region given for key '{}'", self.name),
            });
        }
        Ok(())
    }

    /// Policy sent on creation.
    pub fn effective_policy(&self) -> &str {
        if self.policy.is_empty() {
            DEFAULT_POLICY
        } else {
            &self.policy
        }
    }

    /// Usage kind sent on creation.
    pub fn effective_key_usage(&self) -> &str {
        if self.key_usage.is_empty() {
            DEFAULT_KEY_USAGE
        } else {
            &self.key_usage
        }
    }

    /// Enabled flag applied on creation.
    pub fn effective_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// Lifecycle phase of a managed key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// No key exists yet
    #[default]
    Missing,
    /// Key created, readiness not yet confirmed
    Starting,
    /// Key confirmed available
    Up,
}

impl Phase {
    /// Stable name used in storage and output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Missing => "missing",
            Phase::Starting => "starting",
            Phase::Up => "up",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "missing" => Ok(Phase::Missing),
            "starting" => Ok(Phase::Starting),
            "up" => Ok(Phase::Up),
            other => Err(Error::Persistence(format!("unknown phase '{other}'"))),
        }
    }
}

/// Recorded state of a key, carried between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource name
    pub name: String,
    /// Lifecycle phase
    pub phase: Phase,
    /// Service-assigned key identifier, set once
    pub key_id: Option<String>,
    /// Region the key was created in
    pub region: String,
    /// Accessor credential identifier used last
    pub access_key_id: String,
    /// Policy applied on creation
    pub policy: String,
    /// Alias requested on creation
    pub alias: String,
    /// Usage kind applied on creation
    pub key_usage: String,
    /// Whether the key was left enabled
    pub enabled: bool,
    /// Description applied on creation
    pub description: String,
    /// Grants requested on creation
    pub grants: Vec<GrantSpec>,
    /// Last write time
    pub updated_at: Option<DateTime<Utc>>,
}

impl ResourceState {
    /// State of a key that has never been created.
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: Phase::Missing,
            key_id: None,
            region: String::new(),
            access_key_id: String::new(),
            policy: String::new(),
            alias: String::new(),
            key_usage: String::new(),
            enabled: true,
            description: String::new(),
            grants: Vec::new(),
            updated_at: None,
        }
    }

    /// Whether a key has been created.
    pub fn exists(&self) -> bool {
        self.phase != Phase::Missing
    }

    /// Type label, with the region once the key exists.
    pub fn show_type(&self) -> String {
        if self.exists() {
            format!("{RESOURCE_TYPE} [{}]", self.region)
        } else {
            RESOURCE_TYPE.to_string()
        }
    }

    /// Check the phase and key identifier agree.
    pub fn check_consistent(&self) -> kmskit::Result<()> {
        match (self.phase, &self.key_id) {
            (Phase::Missing, None) => Ok(()),
            (Phase::Missing, Some(id)) => Err(Error::Persistence(format!(
                "state of '{}' is missing but records key '{id}'",
                self.name
            ))),
            (_, Some(id)) if !id.is_empty() => Ok(()),
            (phase, _) => Err(Error::Persistence(format!(
                "state of '{}' is {phase} without a key identifier",
                self.name
            ))),
        }
    }
}

/// Options for a single convergence run.
#[derive(Debug, Clone, Default)]
pub struct ConvergeOptions {
    /// Re-confirm readiness even if the key is already up
    pub check: bool,
    /// Retry policy for every remote call
    pub retry: RetryConfig,
    /// Readiness polling policy
    pub wait: WaitConfig,
}

/// What a convergence run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvergeReport {
    /// Resource name
    pub name: String,
    /// Key identifier after the run
    pub key_id: String,
    /// Phase after the run
    pub phase: Phase,
    /// A key was created during this run
    pub created: bool,
    /// Readiness was polled during this run
    pub waited: bool,
    /// The alias now points at the key
    pub alias_applied: bool,
    /// Grants issued successfully
    pub grants_issued: usize,
    /// Alias and grant failures that did not abort the run
    pub warnings: Vec<String>,
}
