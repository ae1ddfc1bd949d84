//! Path resolution for keyward
//!
//! # Environment Variables
//!
//! - `KEYWARD_CONFIG_DIR` - Override config directory (e.g., `~/dotfiles/keyward`)
//! - `KEYWARD_STATE_DIR` - Override state directory
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `KEYWARD_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/keyward` (if set)
//! 3. `~/.config/keyward`
//!
//! For state_dir():
//! 1. `KEYWARD_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/keyward` (if set)
//! 3. `~/.local/state/keyward`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "KEYWARD_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "KEYWARD_STATE_DIR";

const APP: &str = "keyward";

/// Get the keyward config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join(APP);
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the keyward state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join(APP);
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Default key definitions file
pub fn definitions_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("keys.toml"))
}

/// SQLite database holding recorded key states
pub fn state_db() -> Result<PathBuf> {
    Ok(state_dir()?.join("state.db"))
}

/// Directory where the local emulator keeps one keyring file per region
pub fn emulator_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("kms"))
}

/// Expand `~` and environment variables in a path
///
/// Unknown variables are left as written.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
