//! Backend selection for the CLI

use clap::ValueEnum;
use convergence::Connector;
use kmskit::backend::Backend;
use kmskit::backend::local::LocalBackend;
use kmskit::backend::memory::MemoryBackend;
use kmskit::types::is_supported_region;
use kmskit::{Credentials, Error, Result};
use std::path::PathBuf;

/// Where key operations are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BackendKind {
    /// File-backed emulator under the state directory; keys persist across runs
    #[default]
    Local,
    /// In-process emulator; keys vanish when the command exits
    Memory,
}

/// Opens a backend for a region once the region is known to be served
pub struct BackendConnector {
    kind: BackendKind,
    dir: PathBuf,
}

impl BackendConnector {
    pub fn new(kind: BackendKind, dir: PathBuf) -> Self {
        Self { kind, dir }
    }
}

impl Connector for BackendConnector {
    fn connect(&self, region: &str, credentials: &Credentials) -> Result<Box<dyn Backend>> {
        if !is_supported_region(region) {
            return Err(Error::UnknownRegion(region.to_string()));
        }

        log::debug!(
            "connecting to {region} ({:?}) as {}",
            self.kind,
            credentials.access_key_id
        );

        let backend: Box<dyn Backend> = match self.kind {
            BackendKind::Local => Box::new(LocalBackend::open(&self.dir, region)?),
            BackendKind::Memory => Box::new(MemoryBackend::new(region)),
        };
        Ok(backend)
    }
}
