//! Backend abstraction for key service operations.
//!
//! The [`Backend`] trait is the remote connection handle: every method is
//! one remote call and raises errors classifiable by
//! [`crate::error::classify`]. Implementations:
//! - [`memory::MemoryBackend`] keeps the service in process, with fault
//!   injection for tests
//! - [`local::LocalBackend`] persists the service to a JSON file so
//!   convergence can be exercised across runs

pub mod keyring;
pub mod local;
pub mod memory;

use crate::error::{Error, Result, codes};
use crate::types::{AliasEntry, CreateKeyRequest, GrantSpec, KeyListEntry, KeyMetadata, KeyState};

/// Backend trait for key service operations.
pub trait Backend: Send + Sync {
    /// Region this connection talks to.
    fn region(&self) -> &str;

    /// Create a key.
    fn create_key(&self, request: &CreateKeyRequest) -> Result<KeyMetadata>;

    /// List all keys in the region.
    fn list_keys(&self) -> Result<Vec<KeyListEntry>>;

    /// Describe a key. Fails with `NotFoundException` if it does not exist.
    fn describe_key(&self, key_id: &str) -> Result<KeyMetadata>;

    /// Point a new alias at a key.
    fn create_alias(&self, alias_name: &str, target_key_id: &str) -> Result<()>;

    /// List all aliases in the region.
    fn list_aliases(&self) -> Result<Vec<AliasEntry>>;

    /// Issue a grant on a key, returning the grant identifier.
    fn create_grant(&self, key_id: &str, grant: &GrantSpec) -> Result<String>;

    /// Disable a key.
    fn disable_key(&self, key_id: &str) -> Result<()>;

    /// Find a key by identifier in the key listing.
    fn get_key(&self, key_id: &str) -> Result<Option<KeyListEntry>> {
        Ok(self.list_keys()?.into_iter().find(|k| k.key_id == key_id))
    }

    /// Current state of a key, or `None` if it is not visible yet.
    fn key_state(&self, key_id: &str) -> Result<Option<KeyState>> {
        match self.describe_key(key_id) {
            Ok(metadata) => Ok(Some(metadata.state)),
            Err(e) if e.code() == Some(codes::NOT_FOUND) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Resolve an alias to the key it points at.
    fn key_id_for_alias(&self, alias_name: &str) -> Result<Option<String>> {
        Ok(self
            .list_aliases()?
            .into_iter()
            .find(|a| a.alias_name == alias_name)
            .map(|a| a.target_key_id))
    }
}

impl<B: Backend + ?Sized> Backend for std::sync::Arc<B> {
    fn region(&self) -> &str {
        (**self).region()
    }

    fn create_key(&self, request: &CreateKeyRequest) -> Result<KeyMetadata> {
        (**self).create_key(request)
    }

    fn list_keys(&self) -> Result<Vec<KeyListEntry>> {
        (**self).list_keys()
    }

    fn describe_key(&self, key_id: &str) -> Result<KeyMetadata> {
        (**self).describe_key(key_id)
    }

    fn create_alias(&self, alias_name: &str, target_key_id: &str) -> Result<()> {
        (**self).create_alias(alias_name, target_key_id)
    }

    fn list_aliases(&self) -> Result<Vec<AliasEntry>> {
        (**self).list_aliases()
    }

    fn create_grant(&self, key_id: &str, grant: &GrantSpec) -> Result<String> {
        (**self).create_grant(key_id, grant)
    }

    fn disable_key(&self, key_id: &str) -> Result<()> {
        (**self).disable_key(key_id)
    }
}

/// Build the `NotFoundException` every backend reports for a missing key.
pub(crate) fn key_not_found(key_id: &str) -> Error {
    Error::remote(codes::NOT_FOUND, format!("key '{key_id}' does not exist"))
}
