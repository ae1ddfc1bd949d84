use crate::Context;
use crate::cli::ProvideArgs;
use crate::connect::BackendConnector;
use crate::credentials::EnvCredentials;
use crate::paths;
use anyhow::{Context as _, Result};
use convergence::{Connector, CredentialResolver};
use kmskit::{Client, Error, KeyRef};

/// Resolve a key reference and print the key id on stdout
pub fn run(ctx: &Context, args: ProvideArgs) -> Result<()> {
    let credentials = EnvCredentials::from_env();
    let access_key_id = args
        .access_key_id
        .clone()
        .or_else(|| credentials.default_access_key_id())
        .ok_or(Error::MissingAccessKeyId)?;
    let credentials = credentials.resolve(&access_key_id)?;

    let connector = BackendConnector::new(ctx.backend, paths::emulator_dir()?);
    let backend = connector.connect(&args.region, &credentials)?;
    let client = Client::with_backend(backend).with_retry_config(args.tuning.retry());

    let key = KeyRef::parse(&args.key);
    let key_id = client
        .provide_key(&key)
        .with_context(|| format!("Could not provide key {key:?} in {}", args.region))?;

    println!("{key_id}");
    Ok(())
}
