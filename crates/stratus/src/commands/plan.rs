use crate::commands::print_plan;
use crate::utils;
use colored::Colorize;
use std::path::Path;

pub async fn handle(config_path: Option<&Path>, desired_count: Option<u32>) -> anyhow::Result<()> {
    let loaded = utils::load_stack(config_path, desired_count)?;
    utils::print_loaded_config_file(&loaded.path);

    let state = loaded.state_manager().load().await?;
    let engine = loaded.engine(&state);
    let plan = engine.plan(&loaded.stack.to_resource_set(), &state)?;

    println!();
    if !plan.has_changes {
        println!("{}", "No changes. The stack is up to date.".green());
        println!("{}", plan.summary().to_string().dimmed());
        return Ok(());
    }
    println!("{}", format!("Plan for '{}':", loaded.stack.name()).bold());
    print_plan(&plan);

    Ok(())
}
