use crate::commands::{print_plan, report};
use crate::utils::{self, LoadedStack};
use colored::Colorize;
use std::path::Path;
use stratus_cloud::{ApplyResult, GlobalState, StateManager};
use stratus_core::stack::URL_EXPORT;

pub async fn handle(
    config_path: Option<&Path>,
    desired_count: Option<u32>,
    yes: bool,
) -> anyhow::Result<()> {
    let loaded = utils::load_stack(config_path, desired_count)?;
    utils::print_loaded_config_file(&loaded.path);
    println!("Stack: {}", loaded.stack.name().cyan());

    let manager = loaded.state_manager();
    let state = manager.load().await?;
    let plan = loaded
        .engine(&state)
        .plan(&loaded.stack.to_resource_set(), &state)?;

    println!();
    if !plan.has_changes {
        println!("{}", "No changes. The stack is up to date.".green());
        return print_url(&loaded, &state);
    }
    print_plan(&plan);

    if !yes {
        println!();
        println!("{}", "Nothing was applied.".yellow());
        println!("  Run with --yes to apply this plan.");
        return Ok(());
    }

    println!();
    println!("{}", "Applying...".blue());
    let lock = manager.acquire_lock().await?;
    let outcome = apply_locked(&loaded, &manager).await;
    lock.release().await?;
    let (result, state) = outcome?;

    report(&result)?;
    println!();
    println!("{}", "✓ Stack is up!".green().bold());
    print_url(&loaded, &state)
}

/// Re-plan against the state read under the lock, apply, and save
async fn apply_locked(
    loaded: &LoadedStack,
    manager: &StateManager,
) -> anyhow::Result<(ApplyResult, GlobalState)> {
    let mut state = manager.load().await?;
    let engine = loaded.engine(&state);
    let desired = loaded.stack.to_resource_set();
    let plan = engine.plan(&desired, &state)?;

    let result = engine.apply(&plan, &desired, &mut state).await?;
    // Saved even when some actions failed so created resources stay tracked.
    manager.save(&state).await?;
    Ok((result, state))
}

fn print_url(loaded: &LoadedStack, state: &GlobalState) -> anyhow::Result<()> {
    loaded.stack.resolve(state)?;
    if let Some(url) = loaded.stack.url() {
        println!("  {} = {}", URL_EXPORT, format!("http://{}", url).cyan());
    }
    Ok(())
}
