//! # kmskit
//!
//! Key management service plumbing for convergence provisioners.
//!
//! This crate provides:
//! - A classifier that sorts every failure into transient, rate-limited,
//!   user-error or fatal
//! - A bounded retry executor with exponential backoff and jitter
//! - A readiness waiter for asynchronous key creation
//! - A [`Backend`](backend::Backend) trait with an in-memory and a
//!   file-backed implementation of the key service
//!
//! ## Example
//!
//! ```no_run
//! use kmskit::backend::memory::MemoryBackend;
//! use kmskit::{Client, KeyRef};
//!
//! let client = Client::with_backend(Box::new(MemoryBackend::new("us-east-1")));
//!
//! // Create a fresh key with service defaults
//! let key_id = client.provide_key(&KeyRef::New).expect("create failed");
//!
//! // Or fall back to the managed default key
//! let default_id = client.provide_key(&KeyRef::Default).expect("lookup failed");
//! # let _ = (key_id, default_id);
//! ```
//!
//! ## Retry Logic
//!
//! Every remote call made through [`Client`] runs under [`RetryConfig`]:
//! up to 7 attempts with `5s + jitter * 2^attempt` backoff, where throttling
//! extends the budget by one attempt each time it occurs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod retry;
pub mod types;
pub mod wait;

pub use error::{Error, ErrorClass, Result, classify, classify_code, codes};
pub use retry::{LogCallback, NoCallback, RetryCallback, RetryExecutor, with_retry};
pub use types::{
    Credentials, GrantSpec, KeyMetadata, KeyRef, KeyState, RetryConfig, WaitConfig,
};
pub use wait::{Readiness, WaitCallback, wait_until_ready};

use backend::Backend;
use types::{CreateKeyRequest, DEFAULT_EBS_ALIAS, DEFAULT_KEY_USAGE, DEFAULT_POLICY};

/// High-level client for key service operations.
///
/// The client wraps a backend and runs every call through the retry
/// executor.
pub struct Client {
    backend: Box<dyn Backend>,
    retry: RetryConfig,
}

impl Client {
    /// Create a client with a custom backend and the default retry policy.
    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            retry: RetryConfig::default(),
        }
    }

    /// Replace the retry policy.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Region the backend talks to.
    pub fn region(&self) -> &str {
        self.backend.region()
    }

    fn executor(&self) -> RetryExecutor<'_> {
        RetryExecutor::new(&self.retry, Some(&LogCallback))
    }

    /// Describe a key.
    pub fn describe_key(&self, key_id: &str) -> Result<KeyMetadata> {
        self.executor()
            .execute("describe key", || self.backend.describe_key(key_id))
    }

    /// Obtain a key identifier for a dependent resource.
    ///
    /// - [`KeyRef::New`] creates a key with the default policy and usage
    /// - [`KeyRef::Id`] checks that the key exists
    /// - [`KeyRef::Default`] resolves the service-managed default alias
    pub fn provide_key(&self, key: &KeyRef) -> Result<String> {
        let executor = self.executor();

        match key {
            KeyRef::New => {
                let request = CreateKeyRequest {
                    policy: DEFAULT_POLICY.to_string(),
                    description: String::new(),
                    key_usage: DEFAULT_KEY_USAGE.to_string(),
                };
                let metadata =
                    executor.execute("create key", || self.backend.create_key(&request))?;
                log::info!("created key {} in {}", metadata.key_id, self.region());
                Ok(metadata.key_id)
            }
            KeyRef::Id(key_id) => {
                let found = executor.execute("get key", || self.backend.get_key(key_id))?;
                match found {
                    Some(entry) => Ok(entry.key_id),
                    None => Err(Error::KeyNotFound(key_id.clone())),
                }
            }
            KeyRef::Default => {
                let found = executor.execute("list aliases", || {
                    self.backend.key_id_for_alias(DEFAULT_EBS_ALIAS)
                })?;
                found.ok_or_else(|| Error::KeyNotFound(DEFAULT_EBS_ALIAS.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::memory::{Fault, MemoryBackend, Operation};
    use std::sync::Arc;

    fn client() -> (Client, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new("us-east-1"));
        let client = Client::with_backend(Box::new(backend.clone()))
            .with_retry_config(RetryConfig::immediate(7));
        (client, backend)
    }

    #[test]
    fn test_provide_new_key() {
        let (client, backend) = client();
        let key_id = client.provide_key(&KeyRef::New).unwrap();

        let metadata = client.describe_key(&key_id).unwrap();
        assert_eq!(metadata.policy, DEFAULT_POLICY);
        assert_eq!(metadata.key_usage, DEFAULT_KEY_USAGE);
        assert_eq!(backend.calls(Operation::CreateKey), 1);
    }

    #[test]
    fn test_provide_existing_key() {
        let (client, _) = client();
        let key_id = client.provide_key(&KeyRef::New).unwrap();

        assert_eq!(
            client.provide_key(&KeyRef::Id(key_id.clone())).unwrap(),
            key_id
        );

        let err = client
            .provide_key(&KeyRef::Id("missing".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(_)));
        assert!(err.is_user_error());
    }

    #[test]
    fn test_provide_default_key() {
        let (client, backend) = client();
        let expected = backend.key_id_for_alias(DEFAULT_EBS_ALIAS).unwrap();

        assert_eq!(client.provide_key(&KeyRef::Default).ok(), expected);
    }

    #[test]
    fn test_provide_retries_transient_create() {
        let (client, backend) = client();
        backend.fail_times(Operation::CreateKey, &Fault::code(codes::KMS_INTERNAL), 2);

        assert!(client.provide_key(&KeyRef::New).is_ok());
        assert_eq!(backend.calls(Operation::CreateKey), 3);
    }
}
