use crate::Context;
use crate::cli::StatusArgs;
use crate::commands::{load_definitions, open_store};
use crate::ui;
use anyhow::Result;
use colored::Colorize;
use convergence::{Phase, ResourceDefinition, ResourceState, StateStore, drift_report};
use std::collections::BTreeMap;

/// One line of the status table
struct Row<'a> {
    name: &'a str,
    definition: Option<&'a ResourceDefinition>,
    state: Option<&'a ResourceState>,
}

pub fn run(ctx: &Context, args: StatusArgs) -> Result<()> {
    let (path, file) = load_definitions(args.file.as_deref())?;
    let definitions = match args.target.as_deref() {
        Some(name) if !file.keys.contains_key(name) => Vec::new(),
        target => file.select(target)?,
    };
    let store = open_store(ctx)?;
    let states = store.list()?;

    ui::header("Key Status");
    ui::kv("definitions", &path.display().to_string());

    let mut rows: BTreeMap<&str, Row<'_>> = BTreeMap::new();
    for &definition in &definitions {
        rows.insert(
            definition.name.as_str(),
            Row {
                name: &definition.name,
                definition: Some(definition),
                state: None,
            },
        );
    }
    for state in &states {
        if args.target.as_deref().is_some_and(|t| t != state.name) {
            continue;
        }
        rows.entry(state.name.as_str())
            .or_insert(Row {
                name: &state.name,
                definition: None,
                state: None,
            })
            .state = Some(state);
    }

    if rows.is_empty() {
        println!();
        ui::info("No keys defined or recorded");
        return Ok(());
    }

    ui::section("Keys");
    let mut up = 0;
    for row in rows.values() {
        if print_row(row) {
            up += 1;
        }
    }

    println!();
    ui::dim(&format!("{up}/{} up", rows.len()));
    Ok(())
}

/// Print one row, returning whether the key is up with no drift
fn print_row(row: &Row<'_>) -> bool {
    let missing = ResourceState::missing(row.name);
    let state = row.state.unwrap_or(&missing);
    let key = state.key_id.as_deref().unwrap_or("-");

    let Some(definition) = row.definition else {
        println!(
            "  {} {} {} {}",
            "⚠".yellow(),
            row.name.bold(),
            key.dimmed(),
            "(recorded, no longer defined)".yellow()
        );
        return false;
    };

    let violations = drift_report(definition, state);
    let icon = match (state.phase, violations.is_empty()) {
        (_, false) => "✗".red(),
        (Phase::Up, true) => "✓".green(),
        (Phase::Starting, true) => "⚠".yellow(),
        (Phase::Missing, true) => "○".dimmed(),
    };

    println!(
        "  {} {} {} {} {}",
        icon,
        row.name.bold(),
        ui::phase(state.phase),
        key.dimmed(),
        state.show_type().dimmed()
    );
    for violation in &violations {
        println!("      {} {}", violation.field.red(), violation.message.dimmed());
    }

    state.phase == Phase::Up && violations.is_empty()
}
