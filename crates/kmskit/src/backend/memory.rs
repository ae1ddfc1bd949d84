//! In-process backend with fault injection.

use super::Backend;
use super::keyring::Keyring;
use crate::error::{Error, Result};
use crate::types::{AliasEntry, CreateKeyRequest, GrantSpec, KeyListEntry, KeyMetadata};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Remote operations a [`MemoryBackend`] counts and can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `create_key`
    CreateKey,
    /// `list_keys`
    ListKeys,
    /// `describe_key`
    DescribeKey,
    /// `create_alias`
    CreateAlias,
    /// `list_aliases`
    ListAliases,
    /// `create_grant`
    CreateGrant,
    /// `disable_key`
    DisableKey,
}

/// A failure to inject into the next call of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail with a service error code
    Remote {
        /// Service error code
        code: String,
        /// Message returned with the code
        message: String,
    },
    /// Fail before a response is received
    Transport(String),
}

impl Fault {
    /// Fault carrying a service error code.
    pub fn code(code: &str) -> Self {
        Fault::Remote {
            code: code.to_string(),
            message: format!("injected {code}"),
        }
    }

    fn to_error(&self) -> Error {
        match self {
            Fault::Remote { code, message } => Error::remote(code.clone(), message.clone()),
            Fault::Transport(message) => Error::transport(message.clone()),
        }
    }
}

#[derive(Default)]
struct Counters {
    calls: HashMap<Operation, u32>,
    faults: HashMap<Operation, VecDeque<Fault>>,
}

/// Backend that keeps the key service in memory.
///
/// Faults queued with [`MemoryBackend::fail_next`] are raised, in order,
/// by the next calls of the named operation before the keyring is touched.
pub struct MemoryBackend {
    region: String,
    keyring: Mutex<Keyring>,
    counters: Mutex<Counters>,
}

impl MemoryBackend {
    /// Create a backend for a region holding only the managed default key.
    pub fn new(region: impl Into<String>) -> Self {
        Self::from_keyring(Keyring::new(region))
    }

    /// Create a backend around an existing keyring.
    pub fn from_keyring(keyring: Keyring) -> Self {
        Self {
            region: keyring.region().to_string(),
            keyring: Mutex::new(keyring),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Make new keys report `Creating` for `polls` describe calls.
    pub fn with_settle_polls(self, polls: u32) -> Self {
        let keyring = self.into_keyring().with_settle_polls(polls);
        Self::from_keyring(keyring)
    }

    /// Queue a fault for the next call of `operation`.
    pub fn fail_next(&self, operation: Operation, fault: Fault) {
        self.counters()
            .faults
            .entry(operation)
            .or_default()
            .push_back(fault);
    }

    /// Queue the same fault for the next `times` calls of `operation`.
    pub fn fail_times(&self, operation: Operation, fault: &Fault, times: u32) {
        for _ in 0..times {
            self.fail_next(operation, fault.clone());
        }
    }

    /// Calls made to one operation, failed ones included.
    pub fn calls(&self, operation: Operation) -> u32 {
        self.counters().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Calls made to every operation.
    pub fn total_calls(&self) -> u32 {
        self.counters().calls.values().sum()
    }

    /// Forget all recorded calls.
    pub fn reset_calls(&self) {
        self.counters().calls.clear();
    }

    /// Run a closure against the keyring without counting a call.
    pub fn inspect<T>(&self, f: impl FnOnce(&Keyring) -> T) -> T {
        f(&self.keyring())
    }

    /// Take the keyring back out of the backend.
    pub fn into_keyring(self) -> Keyring {
        self.keyring
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn keyring(&self) -> MutexGuard<'_, Keyring> {
        self.keyring
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn call<T>(&self, operation: Operation, f: impl FnOnce(&mut Keyring) -> Result<T>) -> Result<T> {
        let fault = {
            let mut counters = self.counters();
            *counters.calls.entry(operation).or_insert(0) += 1;
            counters
                .faults
                .get_mut(&operation)
                .and_then(VecDeque::pop_front)
        };

        if let Some(fault) = fault {
            log::debug!("injecting {fault:?} into {operation:?}");
            return Err(fault.to_error());
        }

        f(&mut self.keyring())
    }
}

impl Backend for MemoryBackend {
    fn region(&self) -> &str {
        &self.region
    }

    fn create_key(&self, request: &CreateKeyRequest) -> Result<KeyMetadata> {
        self.call(Operation::CreateKey, |k| k.create_key(request))
    }

    fn list_keys(&self) -> Result<Vec<KeyListEntry>> {
        self.call(Operation::ListKeys, |k| Ok(k.list_keys()))
    }

    fn describe_key(&self, key_id: &str) -> Result<KeyMetadata> {
        self.call(Operation::DescribeKey, |k| k.describe_key(key_id))
    }

    fn create_alias(&self, alias_name: &str, target_key_id: &str) -> Result<()> {
        self.call(Operation::CreateAlias, |k| {
            k.create_alias(alias_name, target_key_id)
        })
    }

    fn list_aliases(&self) -> Result<Vec<AliasEntry>> {
        self.call(Operation::ListAliases, |k| Ok(k.list_aliases()))
    }

    fn create_grant(&self, key_id: &str, grant: &GrantSpec) -> Result<String> {
        self.call(Operation::CreateGrant, |k| k.create_grant(key_id, grant))
    }

    fn disable_key(&self, key_id: &str) -> Result<()> {
        self.call(Operation::DisableKey, |k| k.disable_key(key_id))
    }
}
