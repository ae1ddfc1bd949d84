//! # Convergence
//!
//! Declarative management of encryption keys.
//!
//! A [`ResourceDefinition`] says what a key should look like; a
//! [`ResourceState`] records what was done to it on earlier runs. The
//! [`Engine`] compares the two, refuses changes to fields that are fixed
//! once a key exists, creates missing keys and waits for them to come up.
//!
//! ## Core Concepts
//!
//! - **Phase**: `Missing -> Starting -> Up`, one direction only
//! - **Drift**: a declared value that differs from the recorded one on an
//!   existing key; always a user error, never applied
//! - **Collaborators**: credentials, connections and storage are injected
//!   through [`CredentialResolver`], [`Connector`] and [`StateStore`]
//!
//! ## Example
//!
//! ```ignore
//! use convergence::{ConvergeOptions, Engine, MemoryStore, ResourceDefinition, StateStore};
//!
//! let store = MemoryStore::new();
//! let engine = Engine::new(&resolver, &connector, &store);
//!
//! let definition = ResourceDefinition::new("app", "us-east-1");
//! let mut state = store.load_or_missing("app")?;
//! let report = engine.converge(&definition, &mut state, &ConvergeOptions::default())?;
//! println!("{} is {}", report.key_id, report.phase);
//! ```

pub mod context;
pub mod engine;
pub mod guard;
pub mod types;

// Re-export main types at crate root
pub use context::{
    Connector, CredentialResolver, MemoryStore, NoProgress, ProgressCallback, StateStore,
    StaticCredentials,
};
pub use engine::{Engine, converge};
pub use guard::{Violation, check_no_illegal_drift, drift_report};
pub use types::{
    ConvergeOptions, ConvergeReport, Phase, RESOURCE_TYPE, ResourceDefinition, ResourceState,
};
