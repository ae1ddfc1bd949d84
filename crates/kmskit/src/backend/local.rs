//! File-backed backend.
//!
//! Each region is stored as `kms-<region>.json` in a directory. Every call
//! loads the file, applies the operation and writes it back, so separate
//! processes see each other's keys.

use super::Backend;
use super::keyring::Keyring;
use crate::error::Result;
use crate::types::{AliasEntry, CreateKeyRequest, GrantSpec, KeyListEntry, KeyMetadata};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Backend that persists one region to a JSON file.
pub struct LocalBackend {
    region: String,
    path: PathBuf,
    lock: Mutex<()>,
}

impl LocalBackend {
    /// Open (or create) the store for `region` inside `dir`.
    pub fn open(dir: &Path, region: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("kms-{region}.json"));

        if !path.exists() {
            log::debug!("initializing key store at {}", path.display());
            write_keyring(&path, &Keyring::new(region))?;
        }

        Ok(Self {
            region: region.to_string(),
            path,
            lock: Mutex::new(()),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_keyring<T>(&self, mutates: bool, f: impl FnOnce(&mut Keyring) -> Result<T>) -> Result<T> {
        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let content = fs::read_to_string(&self.path)?;
        let mut keyring: Keyring = serde_json::from_str(&content)?;
        let value = f(&mut keyring)?;

        if mutates {
            write_keyring(&self.path, &keyring)?;
        }
        Ok(value)
    }
}

fn write_keyring(path: &Path, keyring: &Keyring) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(keyring)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl Backend for LocalBackend {
    fn region(&self) -> &str {
        &self.region
    }

    fn create_key(&self, request: &CreateKeyRequest) -> Result<KeyMetadata> {
        self.with_keyring(true, |k| k.create_key(request))
    }

    fn list_keys(&self) -> Result<Vec<KeyListEntry>> {
        self.with_keyring(false, |k| Ok(k.list_keys()))
    }

    fn describe_key(&self, key_id: &str) -> Result<KeyMetadata> {
        // Describing advances keys that are still settling
        self.with_keyring(true, |k| k.describe_key(key_id))
    }

    fn create_alias(&self, alias_name: &str, target_key_id: &str) -> Result<()> {
        self.with_keyring(true, |k| k.create_alias(alias_name, target_key_id))
    }

    fn list_aliases(&self) -> Result<Vec<AliasEntry>> {
        self.with_keyring(false, |k| Ok(k.list_aliases()))
    }

    fn create_grant(&self, key_id: &str, grant: &GrantSpec) -> Result<String> {
        self.with_keyring(true, |k| k.create_grant(key_id, grant))
    }

    fn disable_key(&self, key_id: &str) -> Result<()> {
        self.with_keyring(true, |k| k.disable_key(key_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DEFAULT_KEY_USAGE, DEFAULT_POLICY, KeyState};
    use tempfile::TempDir;

    fn request() -> CreateKeyRequest {
        CreateKeyRequest {
            policy: DEFAULT_POLICY.to_string(),
            description: String::new(),
            key_usage: DEFAULT_KEY_USAGE.to_string(),
        }
    }

    #[test]
    fn test_open_creates_region_file() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::open(dir.path(), "eu-west-1").unwrap();

        assert!(backend.path().ends_with("kms-eu-west-1.json"));
        assert!(backend.path().exists());
        assert_eq!(backend.region(), "eu-west-1");
    }

    #[test]
    fn test_keys_persist_across_instances() {
        let dir = TempDir::new().unwrap();
        let key = {
            let backend = LocalBackend::open(dir.path(), "us-east-1").unwrap();
            let key = backend.create_key(&request()).unwrap();
            backend.create_alias("alias/app", &key.key_id).unwrap();
            key
        };

        let reopened = LocalBackend::open(dir.path(), "us-east-1").unwrap();
        assert_eq!(
            reopened.describe_key(&key.key_id).unwrap().state,
            KeyState::Enabled
        );
        assert_eq!(
            reopened.key_id_for_alias("alias/app").unwrap(),
            Some(key.key_id)
        );
    }

    #[test]
    fn test_regions_are_isolated() {
        let dir = TempDir::new().unwrap();
        let east = LocalBackend::open(dir.path(), "us-east-1").unwrap();
        let west = LocalBackend::open(dir.path(), "us-west-2").unwrap();

        let key = east.create_key(&request()).unwrap();
        assert!(west.get_key(&key.key_id).unwrap().is_none());
        assert!(east.get_key(&key.key_id).unwrap().is_some());
    }
}
