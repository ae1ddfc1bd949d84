//! Core types for key service operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Policy value meaning "let the service apply its default key policy".
pub const DEFAULT_POLICY: &str = "DEFAULT";

/// Usage kind applied when a definition leaves it empty.
pub const DEFAULT_KEY_USAGE: &str = "ENCRYPT/DECRYPT";

/// Usage kinds accepted by the key service.
pub const KEY_USAGES: &[&str] = &["ENCRYPT/DECRYPT", "SIGN/VERIFY", "GENERATE/VERIFY_MAC"];

/// Alias of the service-managed key used when no other key is requested.
pub const DEFAULT_EBS_ALIAS: &str = "alias/aws/ebs";

/// Regions served by the key service.
pub const REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "ca-central-1",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-central-1",
    "eu-north-1",
    "ap-south-1",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "sa-east-1",
];

/// Check whether the key service is available in a region.
pub fn is_supported_region(region: &str) -> bool {
    REGIONS.contains(&region)
}

/// Operations a grant may allow.
pub const GRANT_OPERATIONS: &[&str] = &[
    "Decrypt",
    "Encrypt",
    "GenerateDataKey",
    "GenerateDataKeyWithoutPlaintext",
    "ReEncryptFrom",
    "ReEncryptTo",
    "CreateGrant",
    "RetireGrant",
    "DescribeKey",
];

/// Lifecycle state of a key as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyState {
    /// Key material is still being provisioned
    Creating,
    /// Key is usable
    Enabled,
    /// Key exists but is disabled
    Disabled,
    /// Key is scheduled for deletion
    PendingDeletion,
    /// Key is unavailable (e.g. its backing store is disconnected)
    Unavailable,
}

impl KeyState {
    /// Whether the key has settled into a state a provisioner can rely on.
    pub fn is_ready(self) -> bool {
        matches!(self, KeyState::Enabled | KeyState::Disabled)
    }

    /// Whether the key will never become ready without outside intervention.
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, KeyState::PendingDeletion | KeyState::Unavailable)
    }
}

impl std::fmt::Display for KeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            KeyState::Creating => "Creating",
            KeyState::Enabled => "Enabled",
            KeyState::Disabled => "Disabled",
            KeyState::PendingDeletion => "PendingDeletion",
            KeyState::Unavailable => "Unavailable",
        };
        f.write_str(s)
    }
}

/// Full description of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    /// Service-assigned key identifier
    pub key_id: String,
    /// Fully qualified key ARN
    pub arn: String,
    /// Human description
    pub description: String,
    /// Usage kind (e.g. `ENCRYPT/DECRYPT`)
    pub key_usage: String,
    /// Key policy document, or [`DEFAULT_POLICY`]
    pub policy: String,
    /// Current lifecycle state
    pub state: KeyState,
    /// Whether the key is enabled
    pub enabled: bool,
    /// When the key was created
    pub created_at: DateTime<Utc>,
}

/// Entry returned when listing keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyListEntry {
    /// Service-assigned key identifier
    pub key_id: String,
    /// Fully qualified key ARN
    pub arn: String,
}

/// An alias pointing at a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    /// Alias name, always prefixed with `alias/`
    pub alias_name: String,
    /// Key the alias points at
    pub target_key_id: String,
}

/// Parameters for creating a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateKeyRequest {
    /// Key policy document, or [`DEFAULT_POLICY`]
    pub policy: String,
    /// Human description (may be empty)
    pub description: String,
    /// Usage kind
    pub key_usage: String,
}

/// A grant: who may use the key, and for what.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSpec {
    /// Principal receiving the permissions
    pub grantee_principal: String,
    /// Principal allowed to retire the grant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retiring_principal: Option<String>,
    /// Operations the grantee may perform
    #[serde(default)]
    pub operations: BTreeSet<String>,
    /// Encryption-context constraints, passed through to the service unchanged
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constraints: BTreeMap<String, String>,
    /// Grant tokens, passed through to the service unchanged
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grant_tokens: Vec<String>,
}

impl GrantSpec {
    /// Create a grant for a principal with no operations.
    pub fn new(grantee_principal: impl Into<String>) -> Self {
        Self {
            grantee_principal: grantee_principal.into(),
            ..Default::default()
        }
    }

    /// Allow an operation.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operations.insert(operation.into());
        self
    }

    /// Set the retiring principal.
    pub fn with_retiring_principal(mut self, principal: impl Into<String>) -> Self {
        self.retiring_principal = Some(principal.into());
        self
    }
}

/// How a dependent resource asks for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRef {
    /// Create a brand-new key with service defaults
    New,
    /// Use an existing key by identifier
    Id(String),
    /// Use the service-managed default key
    Default,
}

impl KeyRef {
    /// Parse the textual form used in definitions: `""`, `"new"`, or a key id.
    pub fn parse(s: &str) -> Self {
        match s {
            "" => KeyRef::Default,
            "new" => KeyRef::New,
            id => KeyRef::Id(id.to_string()),
        }
    }
}

/// Resolved credentials for a connection.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Accessor identifier
    pub access_key_id: String,
    /// Secret paired with the identifier
    pub secret_access_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts before giving up (extended by rate limiting)
    pub max_attempts: u32,
    /// Fixed floor added to every backoff delay
    pub base_delay: Duration,
    /// Unit scaled by `jitter * 2^attempt` on top of the floor
    pub jitter_unit: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            base_delay: Duration::from_secs(5),
            jitter_unit: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// Calculate the delay after a failed attempt (1-indexed) for a given
    /// jitter sample in `[0, 1)`.
    pub fn delay_for_attempt(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.min(32) as i32;
        let spread = self.jitter_unit.as_secs_f64() * jitter.clamp(0.0, 1.0) * 2f64.powi(exponent);
        self.base_delay + Duration::from_secs_f64(spread)
    }

    /// Calculate the delay after a failed attempt with a random jitter sample.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.delay_for_attempt(attempt, rand::random::<f64>())
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a config that retries without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            jitter_unit: Duration::ZERO,
        }
    }
}

/// Configuration for readiness polling.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Maximum number of status polls
    pub max_attempts: u32,
    /// Fixed interval between polls
    pub interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 90,
            interval: Duration::from_secs(2),
        }
    }
}

impl WaitConfig {
    /// Create a new wait config.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 7);
        assert_eq!(config.base_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let config = RetryConfig::default();

        assert_eq!(config.delay_for_attempt(1, 0.0), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(1, 0.5), Duration::from_secs(6));
        assert_eq!(config.delay_for_attempt(2, 0.5), Duration::from_secs(7));
        assert_eq!(config.delay_for_attempt(3, 0.5), Duration::from_secs(9));
        assert_eq!(config.delay_for_attempt(4, 0.5), Duration::from_secs(13));
    }

    #[test]
    fn test_random_delay_within_bounds() {
        let config = RetryConfig::default();
        for attempt in 1..=7 {
            let delay = config.next_delay(attempt);
            assert!(delay >= config.base_delay);
            assert!(delay < config.base_delay + Duration::from_secs(1 << attempt));
        }
    }

    #[test]
    fn test_immediate_config_never_sleeps() {
        let config = RetryConfig::immediate(3);
        assert_eq!(config.next_delay(5), Duration::ZERO);
    }

    #[test]
    fn test_key_state_readiness() {
        assert!(KeyState::Enabled.is_ready());
        assert!(KeyState::Disabled.is_ready());
        assert!(!KeyState::Creating.is_ready());
        assert!(KeyState::PendingDeletion.is_terminal_failure());
        assert!(!KeyState::Creating.is_terminal_failure());
    }

    #[test]
    fn test_key_ref_parse() {
        assert_eq!(KeyRef::parse(""), KeyRef::Default);
        assert_eq!(KeyRef::parse("new"), KeyRef::New);
        assert_eq!(KeyRef::parse("abc-123"), KeyRef::Id("abc-123".to_string()));
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = Credentials {
            access_key_id: "AKIA".to_string(),
            secret_access_key: "hunter2".to_string(),
        };
        let shown = format!("{creds:?}");
        assert!(shown.contains("AKIA"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_regions() {
        assert!(is_supported_region("us-east-1"));
        assert!(!is_supported_region("mars-north-1"));
    }
}
