use crate::Context;
use crate::commands::open_store;
use crate::ui;
use anyhow::{Result, bail};
use convergence::{ResourceState, StateStore};

pub fn run(ctx: &Context, name: &str, json: bool) -> Result<()> {
    let store = open_store(ctx)?;
    let Some(state) = store.load(name)? else {
        bail!("No recorded state for '{name}'");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    print_state(&state);
    Ok(())
}

fn print_state(state: &ResourceState) {
    ui::header(&state.name);
    ui::kv("type", &state.show_type());
    ui::kv("phase", &ui::phase(state.phase));
    ui::kv("key id", state.key_id.as_deref().unwrap_or("-"));
    ui::kv("region", &state.region);
    ui::kv("access key id", &state.access_key_id);
    ui::kv("key usage", &state.key_usage);
    ui::kv("enabled", if state.enabled { "yes" } else { "no" });

    if !state.alias.is_empty() {
        ui::kv("alias", &state.alias);
    }
    if !state.description.is_empty() {
        ui::kv("description", &state.description);
    }
    if let Some(updated) = state.updated_at {
        ui::kv("updated", &updated.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    }

    ui::section("Policy");
    ui::dim(&state.policy);

    if !state.grants.is_empty() {
        ui::section("Grants");
        for grant in &state.grants {
            let operations: Vec<&str> = grant.operations.iter().map(String::as_str).collect();
            println!("  {} {}", grant.grantee_principal, operations.join(", "));
            if let Some(retiring) = &grant.retiring_principal {
                ui::dim(&format!("retired by {retiring}"));
            }
        }
    }
}
