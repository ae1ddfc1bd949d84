//! Access key lookup from the environment and key files
//!
//! The accessor id comes from `EC2_ACCESS_KEY` or `AWS_ACCESS_KEY_ID`. The
//! secret comes from `EC2_SECRET_KEY` or `AWS_SECRET_ACCESS_KEY`, and a
//! matching line in the first key file that exists overrides it.
//!
//! Key file lines are `<id> <secret>` or `<id> <secret> <alias>`, with `#`
//! starting a comment. Looking up `<alias>` yields `<id>` and `<secret>`.

use convergence::CredentialResolver;
use kmskit::{Credentials, Error, Result};
use std::path::{Path, PathBuf};

const ACCESS_KEY_VARS: [&str; 2] = ["EC2_ACCESS_KEY", "AWS_ACCESS_KEY_ID"];
const SECRET_KEY_VARS: [&str; 2] = ["EC2_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"];

/// Credentials from environment variables and `~/.ec2-keys` / `~/.aws/credentials`
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    default_id: Option<String>,
    env_secret: Option<String>,
    key_files: Vec<PathBuf>,
}

impl EnvCredentials {
    /// Resolver over an explicit accessor id, secret and key file list
    pub fn new(default_id: Option<String>, env_secret: Option<String>, key_files: Vec<PathBuf>) -> Self {
        Self {
            default_id,
            env_secret,
            key_files,
        }
    }

    /// Capture the current environment and the default key files
    pub fn from_env() -> Self {
        let key_files = dirs::home_dir()
            .map(|home| vec![home.join(".ec2-keys"), home.join(".aws").join("credentials")])
            .unwrap_or_default();

        Self::new(
            first_var(&ACCESS_KEY_VARS),
            first_var(&SECRET_KEY_VARS),
            key_files,
        )
    }

    fn key_file(&self) -> Option<&Path> {
        self.key_files
            .iter()
            .map(PathBuf::as_path)
            .find(|path| path.exists())
    }
}

fn first_var(names: &[&str]) -> Option<String> {
    first_non_empty(names, |name| std::env::var(name).ok())
}

/// First of `names` whose value is set and not empty
fn first_non_empty<F>(names: &[&str], get: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    names
        .iter()
        .find_map(|name| get(name).filter(|value| !value.is_empty()))
}

/// Find `access_key_id` in key file contents
///
/// Returns the accessor id to use (the first column when matched by alias)
/// and its secret. Lines with fewer than two or more than three words are
/// skipped.
pub fn lookup(contents: &str, access_key_id: &str) -> Option<(String, String)> {
    for line in contents.lines() {
        let line = line.split('#').next().unwrap_or_default();
        let words: Vec<&str> = line.split_whitespace().collect();

        match words.as_slice() {
            [id, secret, alias] if *alias == access_key_id => {
                return Some(((*id).to_string(), (*secret).to_string()));
            }
            [id, secret] | [id, secret, _] if *id == access_key_id => {
                return Some(((*id).to_string(), (*secret).to_string()));
            }
            _ => {}
        }
    }
    None
}

impl CredentialResolver for EnvCredentials {
    fn default_access_key_id(&self) -> Option<String> {
        self.default_id.clone()
    }

    fn resolve(&self, access_key_id: &str) -> Result<Credentials> {
        let mut id = access_key_id.to_string();
        let mut secret = self.env_secret.clone();

        if let Some(path) = self.key_file() {
            let contents = std::fs::read_to_string(path)?;
            if let Some((file_id, file_secret)) = lookup(&contents, access_key_id) {
                log::debug!("found secret for {access_key_id} in {}", path.display());
                id = file_id;
                secret = Some(file_secret);
            }
        }

        match secret {
            Some(secret_access_key) => Ok(Credentials {
                access_key_id: id,
                secret_access_key,
            }),
            None => Err(Error::MissingCredentials {
                access_key_id: access_key_id.to_string(),
            }),
        }
    }
}
