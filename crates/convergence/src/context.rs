//! Collaborator traits for convergence
//!
//! The engine never looks up credentials, opens connections or touches
//! storage itself; callers supply these through the traits below.

use crate::types::{Phase, ResourceState};
use kmskit::backend::Backend;
use kmskit::{Credentials, Error, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Resolves accessor identifiers to secret credentials
pub trait CredentialResolver {
    /// Accessor identifier to use when a definition names none
    fn default_access_key_id(&self) -> Option<String>;

    /// Resolve the secret for an accessor identifier
    ///
    /// Fails with [`Error::MissingCredentials`] if no secret is known.
    fn resolve(&self, access_key_id: &str) -> Result<Credentials>;
}

/// Opens a connection to the key service
pub trait Connector {
    /// Connect to `region` with the given credentials
    fn connect(&self, region: &str, credentials: &Credentials) -> Result<Box<dyn Backend>>;
}

/// Persists resource state between runs
pub trait StateStore {
    /// Load the state of one resource, if recorded
    fn load(&self, name: &str) -> Result<Option<ResourceState>>;

    /// Write every field of a state in one all-or-nothing operation
    fn save(&self, state: &ResourceState) -> Result<()>;

    /// All recorded states, ordered by name
    fn list(&self) -> Result<Vec<ResourceState>>;

    /// Load a state, or a fresh `Missing` state if none is recorded
    fn load_or_missing(&self, name: &str) -> Result<ResourceState> {
        Ok(self
            .load(name)?
            .unwrap_or_else(|| ResourceState::missing(name)))
    }
}

/// Progress callback for convergence runs
///
/// Notifications only; implementations cannot influence the run.
pub trait ProgressCallback {
    /// Called when a new key has been created
    fn on_key_created(&self, name: &str, key_id: &str);

    /// Called after each persisted phase change
    fn on_phase(&self, name: &str, phase: Phase);

    /// Called when an alias or grant failure is reported instead of raised
    fn on_warning(&self, name: &str, message: &str);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_key_created(&self, _name: &str, _key_id: &str) {}
    fn on_phase(&self, _name: &str, _phase: Phase) {}
    fn on_warning(&self, _name: &str, _message: &str) {}
}

/// Credential resolver backed by a fixed table
#[derive(Debug, Default)]
pub struct StaticCredentials {
    default_id: Option<String>,
    secrets: BTreeMap<String, String>,
}

impl StaticCredentials {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret, making it the default if it is the first one
    pub fn with(mut self, access_key_id: &str, secret: &str) -> Self {
        if self.default_id.is_none() {
            self.default_id = Some(access_key_id.to_string());
        }
        self.secrets
            .insert(access_key_id.to_string(), secret.to_string());
        self
    }
}

impl CredentialResolver for StaticCredentials {
    fn default_access_key_id(&self) -> Option<String> {
        self.default_id.clone()
    }

    fn resolve(&self, access_key_id: &str) -> Result<Credentials> {
        self.secrets
            .get(access_key_id)
            .map(|secret| Credentials {
                access_key_id: access_key_id.to_string(),
                secret_access_key: secret.clone(),
            })
            .ok_or_else(|| Error::MissingCredentials {
                access_key_id: access_key_id.to_string(),
            })
    }
}

/// In-memory state store
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: Mutex<BTreeMap<String, ResourceState>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn states(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, ResourceState>> {
        self.states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl StateStore for MemoryStore {
    fn load(&self, name: &str) -> Result<Option<ResourceState>> {
        Ok(self.states().get(name).cloned())
    }

    fn save(&self, state: &ResourceState) -> Result<()> {
        state.check_consistent()?;
        self.states().insert(state.name.clone(), state.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<ResourceState>> {
        Ok(self.states().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_credentials() {
        let creds = StaticCredentials::new()
            .with("AKIA1", "s1")
            .with("AKIA2", "s2");

        assert_eq!(creds.default_access_key_id().as_deref(), Some("AKIA1"));
        assert_eq!(creds.resolve("AKIA2").unwrap().secret_access_key, "s2");

        let err = creds.resolve("AKIA3").unwrap_err();
        assert!(matches!(err, Error::MissingCredentials { .. }));
        assert!(err.is_user_error());
    }

    #[test]
    fn test_memory_store_rejects_inconsistent_state() {
        let store = MemoryStore::new();
        let mut state = ResourceState::missing("app");
        state.key_id = Some("k".to_string());

        assert!(store.save(&state).is_err());
        assert!(store.load("app").unwrap().is_none());
    }

    #[test]
    fn test_memory_store_load_or_missing() {
        let store = MemoryStore::new();
        let state = store.load_or_missing("app").unwrap();
        assert_eq!(state.phase, Phase::Missing);

        let mut up = ResourceState::missing("app");
        up.phase = Phase::Up;
        up.key_id = Some("k".to_string());
        store.save(&up).unwrap();

        assert_eq!(store.load_or_missing("app").unwrap(), up);
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
