use crate::Context;
use crate::cli::ApplyArgs;
use crate::commands::{load_definitions, open_store};
use crate::connect::BackendConnector;
use crate::credentials::EnvCredentials;
use crate::paths;
use crate::ui;
use anyhow::{Result, bail};
use convergence::{
    ConvergeOptions, ConvergeReport, Engine, Phase, ProgressCallback, ResourceDefinition,
    ResourceState, StateStore, drift_report,
};

/// Prints engine progress unless `--quiet`
struct UiProgress {
    quiet: bool,
}

impl ProgressCallback for UiProgress {
    fn on_key_created(&self, name: &str, key_id: &str) {
        if !self.quiet {
            ui::info(&format!("{name}: created key {key_id}"));
        }
    }

    fn on_phase(&self, name: &str, phase: Phase) {
        if !self.quiet {
            ui::dim(&format!("{name} is now {}", ui::phase(phase)));
        }
    }

    // Warnings already go through the log at warn level.
    fn on_warning(&self, _name: &str, _message: &str) {}
}

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let (path, file) = load_definitions(args.file.as_deref())?;
    let definitions = file.select(args.target.as_deref())?;

    if definitions.is_empty() {
        ui::info(&format!("No keys defined in {}", path.display()));
        return Ok(());
    }

    let store = open_store(ctx)?;

    if args.plan {
        return plan(&definitions, &store);
    }

    if !ctx.quiet {
        ui::header("Applying Key Definitions");
    }

    let credentials = EnvCredentials::from_env();
    let connector = BackendConnector::new(ctx.backend, paths::emulator_dir()?);
    let progress = UiProgress { quiet: ctx.quiet };
    let engine = Engine::new(&credentials, &connector, &store).with_progress(&progress);

    let options = ConvergeOptions {
        check: args.check,
        retry: args.tuning.retry(),
        wait: args.tuning.wait(),
    };

    let total = definitions.len();
    let failed = converge_all(&engine, &store, &definitions, &options, ctx.quiet);

    if !failed.is_empty() {
        bail!(
            "{} of {total} keys did not converge: {}",
            failed.len(),
            failed.join(", ")
        );
    }

    if !ctx.quiet {
        println!();
        ui::success("Apply complete!");
    }
    Ok(())
}

/// Converge every definition in order, returning the names that failed
///
/// A key whose recorded state cannot be loaded counts as failed; the
/// remaining keys still run.
fn converge_all(
    engine: &Engine<'_>,
    store: &dyn StateStore,
    definitions: &[&ResourceDefinition],
    options: &ConvergeOptions,
    quiet: bool,
) -> Vec<String> {
    let total = definitions.len();
    let mut failed = Vec::new();

    for (i, definition) in definitions.iter().enumerate() {
        if !quiet {
            ui::step(i + 1, total, &definition.name);
        }

        let mut state = match store.load_or_missing(&definition.name) {
            Ok(state) => state,
            Err(err) => {
                ui::error(&format!("{} could not be loaded: {err}", definition.name));
                failed.push(definition.name.clone());
                continue;
            }
        };

        match engine.converge(definition, &mut state, options) {
            Ok(report) => {
                if !quiet {
                    print_report(&report);
                }
            }
            Err(err) => {
                let kind = if err.is_user_error() {
                    "definition rejected"
                } else {
                    "failed"
                };
                ui::error(&format!("{} {kind}: {err}", definition.name));
                failed.push(definition.name.clone());
            }
        }
    }

    failed
}

fn print_report(report: &ConvergeReport) {
    ui::success(&format!(
        "{} ({}) is {}",
        report.name,
        report.key_id,
        ui::phase(report.phase)
    ));
    if report.alias_applied {
        ui::dim("alias set");
    }
    if report.grants_issued > 0 {
        ui::dim(&format!("{} grant(s) issued", report.grants_issued));
    }
    if !report.warnings.is_empty() {
        ui::warn(&format!(
            "{}: {} warning(s), see log output",
            report.name,
            report.warnings.len()
        ));
    }
}

/// What `apply` would do for one key, decided from recorded state alone
#[derive(Debug, PartialEq, Eq)]
enum Planned {
    Create,
    Finish(String),
    UpToDate(String),
    Rejected(Vec<String>),
}

fn plan_one(definition: &ResourceDefinition, state: &ResourceState) -> Planned {
    let violations = drift_report(definition, state);
    if !violations.is_empty() {
        return Planned::Rejected(
            violations
                .into_iter()
                .map(|v| format!("{}: {}", v.field, v.message))
                .collect(),
        );
    }

    match (&state.key_id, state.phase) {
        (Some(key_id), Phase::Up) => Planned::UpToDate(key_id.clone()),
        (Some(key_id), _) => Planned::Finish(key_id.clone()),
        (None, _) => Planned::Create,
    }
}

fn plan(definitions: &[&ResourceDefinition], store: &dyn StateStore) -> Result<()> {
    ui::header("Plan");
    ui::warn("Plan only - the key service is not contacted");
    println!();

    let mut rejected = 0;
    for definition in definitions {
        let state = store.load_or_missing(&definition.name)?;
        match plan_one(definition, &state) {
            Planned::Create => {
                let alias = if definition.alias.is_empty() {
                    String::new()
                } else {
                    format!(" as {}", definition.alias)
                };
                ui::info(&format!(
                    "{}: create key in {}{alias}",
                    definition.name, definition.region
                ));
                if !definition.grants.is_empty() {
                    ui::dim(&format!("then issue {} grant(s)", definition.grants.len()));
                }
            }
            Planned::Finish(key_id) => {
                ui::info(&format!(
                    "{}: finish bringing up {key_id}",
                    definition.name
                ));
            }
            Planned::UpToDate(key_id) => {
                ui::success(&format!("{}: {key_id} is up", definition.name));
            }
            Planned::Rejected(messages) => {
                rejected += 1;
                ui::error(&format!("{}: definition rejected", definition.name));
                for message in messages {
                    ui::dim(&message);
                }
            }
        }
    }

    if rejected > 0 {
        bail!("{rejected} definition(s) change fields of existing keys");
    }
    Ok(())
}
