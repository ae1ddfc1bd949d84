//! Convergence engine - brings one key in line with its definition
//!
//! A run walks the phases `Missing -> Starting -> Up`:
//! 1. resolve the accessor credential and connect
//! 2. for an existing key, reject illegal drift before touching anything
//! 3. for a missing key, create it and record `Starting` in one write
//! 4. apply alias and grants against the recorded key identifier
//! 5. wait for readiness and record `Up`

use crate::context::{Connector, CredentialResolver, NoProgress, ProgressCallback, StateStore};
use crate::guard;
use crate::types::{ConvergeOptions, ConvergeReport, Phase, ResourceDefinition, ResourceState};
use chrono::Utc;
use kmskit::backend::Backend;
use kmskit::types::CreateKeyRequest;
use kmskit::{Error, LogCallback, Readiness, Result, RetryExecutor, codes, wait_until_ready};

/// Runs convergence against injected collaborators
pub struct Engine<'a> {
    credentials: &'a dyn CredentialResolver,
    connector: &'a dyn Connector,
    store: &'a dyn StateStore,
    progress: &'a dyn ProgressCallback,
}

impl<'a> Engine<'a> {
    /// Create an engine that reports progress through the log only
    pub fn new(
        credentials: &'a dyn CredentialResolver,
        connector: &'a dyn Connector,
        store: &'a dyn StateStore,
    ) -> Self {
        Self {
            credentials,
            connector,
            store,
            progress: &NoProgress,
        }
    }

    /// Attach a progress callback
    pub fn with_progress(mut self, progress: &'a dyn ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Converge one key.
    ///
    /// `state` is updated in place and only after the store accepted the
    /// matching write, so on error it still equals what is persisted.
    pub fn converge(
        &self,
        definition: &ResourceDefinition,
        state: &mut ResourceState,
        options: &ConvergeOptions,
    ) -> Result<ConvergeReport> {
        definition.validate()?;
        state.check_consistent()?;

        let access_key_id = self.access_key_id(definition)?;
        let credentials = self
            .credentials
            .resolve(&access_key_id)
            .map_err(|e| e.in_step("resolve credentials"))?;

        let backend = self
            .connector
            .connect(&definition.region, &credentials)
            .map_err(|e| e.in_step("connect"))?;

        if state.exists() {
            guard::check_no_illegal_drift(definition, state)
                .map_err(|e| e.in_step("check definition"))?;
        }

        let retry = RetryExecutor::new(&options.retry, Some(&LogCallback));
        let mut report = ConvergeReport {
            name: definition.name.clone(),
            ..Default::default()
        };

        if !state.exists() {
            self.create(definition, &access_key_id, state, backend.as_ref(), &retry)?;
            report.created = true;
        }

        let key_id = recorded_key_id(state)?;

        if state.phase == Phase::Starting && !state.enabled {
            retry
                .execute("disable key", || backend.disable_key(&key_id))
                .map_err(|e| e.in_step("disable key"))?;
        }

        self.apply_alias(definition, &key_id, backend.as_ref(), &retry, &mut report)?;
        self.apply_grants(definition, &key_id, backend.as_ref(), &retry, &mut report)?;

        if report.created || state.phase == Phase::Starting || options.check {
            let what = format!("key '{key_id}'");
            log::info!("waiting for {what} to become available...");
            wait_until_ready(&options.wait, &retry, Some(&LogCallback), &what, || {
                readiness(backend.as_ref(), &key_id)
            })
            .map_err(|e| e.in_step("wait for key"))?;
            report.waited = true;

            if state.phase != Phase::Up {
                let mut next = state.clone();
                next.phase = Phase::Up;
                next.access_key_id = access_key_id;
                next.updated_at = Some(Utc::now());
                self.store
                    .save(&next)
                    .map_err(|e| e.in_step("record key"))?;
                *state = next;
                self.progress.on_phase(&state.name, Phase::Up);
            }
        }

        report.key_id = key_id;
        report.phase = state.phase;
        Ok(report)
    }

    fn access_key_id(&self, definition: &ResourceDefinition) -> Result<String> {
        let id = if definition.access_key_id.is_empty() {
            self.credentials.default_access_key_id().unwrap_or_default()
        } else {
            definition.access_key_id.clone()
        };

        if id.is_empty() {
            return Err(Error::MissingAccessKeyId.in_step("resolve credentials"));
        }
        Ok(id)
    }

    fn create(
        &self,
        definition: &ResourceDefinition,
        access_key_id: &str,
        state: &mut ResourceState,
        backend: &dyn Backend,
        retry: &RetryExecutor<'_>,
    ) -> Result<()> {
        let request = CreateKeyRequest {
            policy: definition.effective_policy().to_string(),
            description: definition.description.clone(),
            key_usage: definition.effective_key_usage().to_string(),
        };

        log::info!(
            "creating key '{}' for '{}' usage with '{}' policy...",
            definition.name,
            request.key_usage,
            request.policy
        );

        let metadata = retry
            .execute("create key", || backend.create_key(&request))
            .map_err(|e| e.in_step("create key"))?;

        let next = ResourceState {
            name: definition.name.clone(),
            phase: Phase::Starting,
            key_id: Some(metadata.key_id.clone()),
            region: definition.region.clone(),
            access_key_id: access_key_id.to_string(),
            policy: request.policy,
            alias: definition.alias.clone(),
            key_usage: request.key_usage,
            enabled: definition.effective_enabled(),
            description: request.description,
            grants: definition.grants.clone(),
            updated_at: Some(Utc::now()),
        };

        self.store
            .save(&next)
            .map_err(|e| e.in_step("record key"))?;
        *state = next;

        log::info!("key id is '{}'", metadata.key_id);
        self.progress.on_key_created(&state.name, &metadata.key_id);
        self.progress.on_phase(&state.name, Phase::Starting);
        Ok(())
    }

    fn apply_alias(
        &self,
        definition: &ResourceDefinition,
        key_id: &str,
        backend: &dyn Backend,
        retry: &RetryExecutor<'_>,
        report: &mut ConvergeReport,
    ) -> Result<()> {
        let alias = definition.alias.as_str();
        if alias.is_empty() {
            return Ok(());
        }

        let error = match retry.execute("create alias", || backend.create_alias(alias, key_id)) {
            Ok(()) => {
                log::debug!("alias '{alias}' now points at '{key_id}'");
                report.alias_applied = true;
                return Ok(());
            }
            Err(e) => e,
        };

        if error.code() == Some(codes::ALREADY_EXISTS) {
            let target = retry
                .execute("list aliases", || backend.key_id_for_alias(alias))
                .map_err(|e| e.in_step("create alias"))?;
            if target.as_deref() == Some(key_id) {
                report.alias_applied = true;
                return Ok(());
            }
        }

        if error.is_user_error() {
            self.warn(report, format!("setting alias '{alias}' failed: {error}"));
            return Ok(());
        }

        Err(error.in_step("create alias"))
    }

    fn apply_grants(
        &self,
        definition: &ResourceDefinition,
        key_id: &str,
        backend: &dyn Backend,
        retry: &RetryExecutor<'_>,
        report: &mut ConvergeReport,
    ) -> Result<()> {
        for grant in &definition.grants {
            match retry.execute("create grant", || backend.create_grant(key_id, grant)) {
                Ok(grant_id) => {
                    log::debug!(
                        "granted {:?} on '{key_id}' to '{}' ({grant_id})",
                        grant.operations,
                        grant.grantee_principal
                    );
                    report.grants_issued += 1;
                }
                Err(e) if e.is_user_error() => {
                    self.warn(
                        report,
                        format!(
                            "setting grant for '{}' failed: {e}",
                            grant.grantee_principal
                        ),
                    );
                }
                Err(e) => return Err(e.in_step("create grant")),
            }
        }
        Ok(())
    }

    fn warn(&self, report: &mut ConvergeReport, message: String) {
        log::warn!("{}: {message}", report.name);
        self.progress.on_warning(&report.name, &message);
        report.warnings.push(message);
    }
}

fn recorded_key_id(state: &ResourceState) -> Result<String> {
    state.key_id.clone().ok_or_else(|| {
        Error::Persistence(format!(
            "state of '{}' is {} without a key identifier",
            state.name, state.phase
        ))
    })
}

fn readiness(backend: &dyn Backend, key_id: &str) -> Result<Readiness> {
    Ok(match backend.key_state(key_id)? {
        None => Readiness::Pending("not yet visible".to_string()),
        Some(s) if s.is_ready() => Readiness::Ready,
        Some(s) if s.is_terminal_failure() => Readiness::Failed(s.to_string()),
        Some(s) => Readiness::Pending(s.to_string()),
    })
}

/// Converge one key with no progress callback
pub fn converge(
    credentials: &dyn CredentialResolver,
    connector: &dyn Connector,
    store: &dyn StateStore,
    definition: &ResourceDefinition,
    state: &mut ResourceState,
    options: &ConvergeOptions,
) -> Result<ConvergeReport> {
    Engine::new(credentials, connector, store).converge(definition, state, options)
}
