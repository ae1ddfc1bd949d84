pub mod apply;
pub mod provide;
pub mod show;
pub mod status;

use crate::Context;
use crate::config::DefinitionFile;
use crate::connect::BackendKind;
use crate::paths;
use anyhow::{Context as _, Result};
use keystate::SqliteStore;
use std::path::{Path, PathBuf};

/// Definitions file to use: the one given, or the default under the config dir
pub fn definitions_path(file: Option<&Path>) -> Result<PathBuf> {
    match file {
        Some(path) => Ok(paths::expand(&path.to_string_lossy())),
        None => paths::definitions_file(),
    }
}

/// Load definitions, treating a missing default file as empty
pub fn load_definitions(file: Option<&Path>) -> Result<(PathBuf, DefinitionFile)> {
    let path = definitions_path(file)?;
    if file.is_none() && !path.exists() {
        log::debug!("no definitions at {}", path.display());
        return Ok((path, DefinitionFile::default()));
    }
    let definitions = DefinitionFile::load(&path)?;
    Ok((path, definitions))
}

/// State store matching the backend
///
/// The in-process backend forgets its keys on exit, so its states live in an
/// in-memory database too.
pub fn open_store(ctx: &Context) -> Result<SqliteStore> {
    match ctx.backend {
        BackendKind::Local => {
            let path = paths::state_db()?;
            SqliteStore::open(&path)
                .with_context(|| format!("Could not open state database {}", path.display()))
        }
        BackendKind::Memory => {
            SqliteStore::open_in_memory().context("Could not open in-memory state database")
        }
    }
}
