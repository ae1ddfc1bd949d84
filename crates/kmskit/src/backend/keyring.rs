//! In-process model of the key service.
//!
//! [`Keyring`] holds the keys, aliases and grants of one region and applies
//! the same validation the service does, so backends built on it raise the
//! same error codes a real connection would.

use crate::backend::key_not_found;
use crate::error::{Error, Result, codes};
use crate::types::{
    AliasEntry, CreateKeyRequest, DEFAULT_EBS_ALIAS, DEFAULT_KEY_USAGE, DEFAULT_POLICY,
    GRANT_OPERATIONS, GrantSpec, KEY_USAGES, KeyListEntry, KeyMetadata, KeyState,
};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static ALIAS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^alias/[a-zA-Z0-9:/_-]+$").expect("ALIAS_PATTERN is a valid regex pattern")
});

const RESERVED_ALIAS_PREFIX: &str = "alias/aws/";
const MAX_DESCRIPTION_LEN: usize = 8192;
const ACCOUNT_ID: &str = "111122223333";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredKey {
    metadata: KeyMetadata,
    /// Describe calls left before the key leaves `Creating`
    pending_polls: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredGrant {
    grant_id: String,
    key_id: String,
    spec: GrantSpec,
}

/// Keys, aliases and grants of a single region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyring {
    region: String,
    /// Describe calls a new key reports `Creating` for
    #[serde(default)]
    settle_polls: u32,
    #[serde(default)]
    keys: BTreeMap<String, StoredKey>,
    #[serde(default)]
    aliases: BTreeMap<String, String>,
    #[serde(default)]
    grants: Vec<StoredGrant>,
}

impl Keyring {
    /// Create a keyring holding only the service-managed default key.
    pub fn new(region: impl Into<String>) -> Self {
        let mut keyring = Self {
            region: region.into(),
            settle_polls: 0,
            keys: BTreeMap::new(),
            aliases: BTreeMap::new(),
            grants: Vec::new(),
        };

        let managed = keyring.insert_key(
            "Default master key that protects my EBS volumes when no other key is defined",
            DEFAULT_KEY_USAGE,
            DEFAULT_POLICY,
            0,
        );
        keyring
            .aliases
            .insert(DEFAULT_EBS_ALIAS.to_string(), managed.key_id);
        keyring
    }

    /// Make new keys report `Creating` for `polls` describe calls.
    pub fn with_settle_polls(mut self, polls: u32) -> Self {
        self.settle_polls = polls;
        self
    }

    /// Region this keyring models.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Number of grants issued so far.
    pub fn grant_count(&self) -> usize {
        self.grants.len()
    }

    /// Grants issued on a key.
    pub fn grants_for(&self, key_id: &str) -> Vec<GrantSpec> {
        self.grants
            .iter()
            .filter(|g| g.key_id == key_id)
            .map(|g| g.spec.clone())
            .collect()
    }

    /// Create a key after validating usage, policy and description.
    pub fn create_key(&mut self, request: &CreateKeyRequest) -> Result<KeyMetadata> {
        if !KEY_USAGES.contains(&request.key_usage.as_str()) {
            return Err(Error::remote(
                codes::VALIDATION,
                format!(
                    "key usage '{}' is not one of {}",
                    request.key_usage,
                    KEY_USAGES.join(", ")
                ),
            ));
        }

        if request.policy != DEFAULT_POLICY {
            let parsed: std::result::Result<serde_json::Value, _> =
                serde_json::from_str(&request.policy);
            if !matches!(parsed, Ok(serde_json::Value::Object(_))) {
                return Err(Error::remote(
                    codes::MALFORMED_POLICY,
                    "the policy is not a JSON object",
                ));
            }
        }

        if request.description.len() > MAX_DESCRIPTION_LEN {
            return Err(Error::remote(
                codes::VALIDATION,
                format!("description exceeds {MAX_DESCRIPTION_LEN} characters"),
            ));
        }

        let settle = self.settle_polls;
        Ok(self.insert_key(
            &request.description,
            &request.key_usage,
            &request.policy,
            settle,
        ))
    }

    /// All keys in the region, including service-managed ones.
    pub fn list_keys(&self) -> Vec<KeyListEntry> {
        self.keys
            .values()
            .map(|k| KeyListEntry {
                key_id: k.metadata.key_id.clone(),
                arn: k.metadata.arn.clone(),
            })
            .collect()
    }

    /// Describe a key. Each call advances a `Creating` key towards settling.
    pub fn describe_key(&mut self, key_id: &str) -> Result<KeyMetadata> {
        let key = self
            .keys
            .get_mut(key_id)
            .ok_or_else(|| key_not_found(key_id))?;

        if key.pending_polls > 0 {
            key.pending_polls -= 1;
            let snapshot = key.metadata.clone();
            if key.pending_polls == 0 {
                key.metadata.state = settled_state(key.metadata.enabled);
            }
            return Ok(snapshot);
        }

        Ok(key.metadata.clone())
    }

    /// Point a new alias at an existing key.
    pub fn create_alias(&mut self, alias_name: &str, target_key_id: &str) -> Result<()> {
        if !is_valid_alias(alias_name) {
            return Err(Error::remote(
                codes::VALIDATION,
                format!(
                    "wrong alias format '{alias_name}', the alias should be like \"alias/my_alias\""
                ),
            ));
        }

        if alias_name.starts_with(RESERVED_ALIAS_PREFIX) {
            return Err(Error::remote(
                codes::VALIDATION,
                format!("aliases like {RESERVED_ALIAS_PREFIX}... are reserved"),
            ));
        }

        if !self.keys.contains_key(target_key_id) {
            return Err(key_not_found(target_key_id));
        }

        if let Some(existing) = self.aliases.get(alias_name) {
            return Err(Error::remote(
                codes::ALREADY_EXISTS,
                format!("alias '{alias_name}' already points at '{existing}'"),
            ));
        }

        self.aliases
            .insert(alias_name.to_string(), target_key_id.to_string());
        Ok(())
    }

    /// All aliases in the region.
    pub fn list_aliases(&self) -> Vec<AliasEntry> {
        self.aliases
            .iter()
            .map(|(alias_name, target)| AliasEntry {
                alias_name: alias_name.clone(),
                target_key_id: target.clone(),
            })
            .collect()
    }

    /// Issue a grant. Re-issuing an identical grant returns the existing id.
    pub fn create_grant(&mut self, key_id: &str, grant: &GrantSpec) -> Result<String> {
        if !self.keys.contains_key(key_id) {
            return Err(key_not_found(key_id));
        }

        if grant.grantee_principal.trim().is_empty() {
            return Err(Error::remote(
                codes::VALIDATION,
                "unrecognized grantee: grantee principal is empty",
            ));
        }

        if grant.operations.is_empty() {
            return Err(Error::remote(
                codes::VALIDATION,
                "a grant must allow at least one operation",
            ));
        }

        if let Some(op) = grant
            .operations
            .iter()
            .find(|op| !GRANT_OPERATIONS.contains(&op.as_str()))
        {
            return Err(Error::remote(
                codes::VALIDATION,
                format!("unsupported grant operation '{op}'"),
            ));
        }

        if let Some(existing) = self
            .grants
            .iter()
            .find(|g| g.key_id == key_id && g.spec == *grant)
        {
            return Ok(existing.grant_id.clone());
        }

        let grant_id = format!("{:032x}{:032x}", rand::random::<u128>(), rand::random::<u128>());
        self.grants.push(StoredGrant {
            grant_id: grant_id.clone(),
            key_id: key_id.to_string(),
            spec: grant.clone(),
        });
        Ok(grant_id)
    }

    /// Disable a key. A key still creating settles as `Disabled`.
    pub fn disable_key(&mut self, key_id: &str) -> Result<()> {
        let key = self
            .keys
            .get_mut(key_id)
            .ok_or_else(|| key_not_found(key_id))?;

        key.metadata.enabled = false;
        if key.metadata.state == KeyState::Enabled {
            key.metadata.state = KeyState::Disabled;
        }
        Ok(())
    }

    fn insert_key(
        &mut self,
        description: &str,
        key_usage: &str,
        policy: &str,
        pending_polls: u32,
    ) -> KeyMetadata {
        let key_id = new_key_id();
        let metadata = KeyMetadata {
            arn: format!("arn:aws:kms:{}:{ACCOUNT_ID}:key/{key_id}", self.region),
            key_id: key_id.clone(),
            description: description.to_string(),
            key_usage: key_usage.to_string(),
            policy: policy.to_string(),
            state: if pending_polls > 0 {
                KeyState::Creating
            } else {
                KeyState::Enabled
            },
            enabled: true,
            created_at: Utc::now(),
        };

        self.keys.insert(
            key_id,
            StoredKey {
                metadata: metadata.clone(),
                pending_polls,
            },
        );
        metadata
    }
}

fn is_valid_alias(alias_name: &str) -> bool {
    ALIAS_PATTERN.is_match(alias_name)
}

fn settled_state(enabled: bool) -> KeyState {
    if enabled {
        KeyState::Enabled
    } else {
        KeyState::Disabled
    }
}

fn new_key_id() -> String {
    let hex = format!("{:032x}", rand::random::<u128>());
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateKeyRequest {
        CreateKeyRequest {
            policy: DEFAULT_POLICY.to_string(),
            description: String::new(),
            key_usage: DEFAULT_KEY_USAGE.to_string(),
        }
    }

    #[test]
    fn test_new_keyring_has_managed_default_key() {
        let keyring = Keyring::new("us-east-1");
        assert_eq!(keyring.list_keys().len(), 1);
        assert_eq!(keyring.list_aliases()[0].alias_name, DEFAULT_EBS_ALIAS);
    }

    #[test]
    fn test_create_key_assigns_id_and_arn() {
        let mut keyring = Keyring::new("eu-west-1");
        let key = keyring.create_key(&request()).unwrap();

        assert_eq!(key.key_id.len(), 36);
        assert!(key.arn.starts_with("arn:aws:kms:eu-west-1:"));
        assert!(key.arn.ends_with(&key.key_id));
        assert_eq!(key.state, KeyState::Enabled);
    }

    #[test]
    fn test_create_key_rejects_bad_usage_and_policy() {
        let mut keyring = Keyring::new("us-east-1");

        let bad_usage = CreateKeyRequest {
            key_usage: "ENCRYPT".to_string(),
            ..request()
        };
        let err = keyring.create_key(&bad_usage).unwrap_err();
        assert_eq!(err.code(), Some(codes::VALIDATION));

        let bad_policy = CreateKeyRequest {
            policy: "not json".to_string(),
            ..request()
        };
        let err = keyring.create_key(&bad_policy).unwrap_err();
        assert_eq!(err.code(), Some(codes::MALFORMED_POLICY));
    }

    #[test]
    fn test_key_settles_after_polls() {
        let mut keyring = Keyring::new("us-east-1").with_settle_polls(2);
        let key = keyring.create_key(&request()).unwrap();
        assert_eq!(key.state, KeyState::Creating);

        assert_eq!(keyring.describe_key(&key.key_id).unwrap().state, KeyState::Creating);
        assert_eq!(keyring.describe_key(&key.key_id).unwrap().state, KeyState::Creating);
        assert_eq!(keyring.describe_key(&key.key_id).unwrap().state, KeyState::Enabled);
    }

    #[test]
    fn test_disabled_key_settles_disabled() {
        let mut keyring = Keyring::new("us-east-1").with_settle_polls(1);
        let key = keyring.create_key(&request()).unwrap();
        keyring.disable_key(&key.key_id).unwrap();

        keyring.describe_key(&key.key_id).unwrap();
        assert_eq!(keyring.describe_key(&key.key_id).unwrap().state, KeyState::Disabled);
    }

    #[test]
    fn test_alias_validation() {
        let mut keyring = Keyring::new("us-east-1");
        let key = keyring.create_key(&request()).unwrap();

        let err = keyring.create_alias("my-key", &key.key_id).unwrap_err();
        assert_eq!(err.code(), Some(codes::VALIDATION));

        let err = keyring.create_alias("alias/aws/mine", &key.key_id).unwrap_err();
        assert_eq!(err.code(), Some(codes::VALIDATION));

        let err = keyring.create_alias("alias/app", "missing").unwrap_err();
        assert_eq!(err.code(), Some(codes::NOT_FOUND));

        keyring.create_alias("alias/app", &key.key_id).unwrap();
        let err = keyring.create_alias("alias/app", &key.key_id).unwrap_err();
        assert_eq!(err.code(), Some(codes::ALREADY_EXISTS));
    }

    #[test]
    fn test_alias_name_shapes() {
        for good in ["alias/app", "alias/team/app-data", "alias/svc:prod_1"] {
            assert!(is_valid_alias(good), "{good}");
        }
        for bad in ["alias/", "app", "alias/has space", "alias/app!", "ALIAS/app"] {
            assert!(!is_valid_alias(bad), "{bad}");
        }
    }

    #[test]
    fn test_identical_grant_is_idempotent() {
        let mut keyring = Keyring::new("us-east-1");
        let key = keyring.create_key(&request()).unwrap();
        let grant = GrantSpec::new("arn:aws:iam::111122223333:role/app").with_operation("Decrypt");

        let first = keyring.create_grant(&key.key_id, &grant).unwrap();
        let second = keyring.create_grant(&key.key_id, &grant).unwrap();

        assert_eq!(first, second);
        assert_eq!(keyring.grant_count(), 1);
    }

    #[test]
    fn test_grant_validation() {
        let mut keyring = Keyring::new("us-east-1");
        let key = keyring.create_key(&request()).unwrap();

        let err = keyring
            .create_grant(&key.key_id, &GrantSpec::new("").with_operation("Decrypt"))
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::VALIDATION));

        let err = keyring
            .create_grant(&key.key_id, &GrantSpec::new("role").with_operation("Fly"))
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::VALIDATION));
    }

    #[test]
    fn test_keyring_survives_json() {
        let mut keyring = Keyring::new("us-east-1");
        let key = keyring.create_key(&request()).unwrap();

        let json = serde_json::to_string(&keyring).unwrap();
        let mut back: Keyring = serde_json::from_str(&json).unwrap();

        assert_eq!(back.describe_key(&key.key_id).unwrap().key_id, key.key_id);
    }
}
