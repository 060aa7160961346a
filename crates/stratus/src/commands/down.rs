use crate::commands::report;
use crate::utils;
use colored::Colorize;
use std::path::Path;
use stratus_cloud::DependencyGraph;

pub async fn handle(config_path: Option<&Path>, yes: bool) -> anyhow::Result<()> {
    let loaded = utils::load_stack(config_path, None)?;
    utils::print_loaded_config_file(&loaded.path);
    println!("Stack: {}", loaded.stack.name().cyan());

    let manager = loaded.state_manager();
    let state = manager.load().await?;
    if state.is_empty() {
        println!("{}", "Nothing to delete: no resources are recorded.".green());
        return Ok(());
    }

    let order = DependencyGraph::from_state(&state)?.teardown_order();
    println!();
    println!(
        "{}",
        format!("Resources to delete ({}):", order.len()).bold()
    );
    for key in &order {
        println!("  {} {}", "-".red().bold(), key);
    }

    if !yes {
        println!();
        println!("{}", "Nothing was deleted.".yellow());
        println!("  Run with --yes to delete these resources.");
        return Ok(());
    }

    println!();
    println!("{}", "Deleting...".yellow());
    let lock = manager.acquire_lock().await?;
    let outcome = async {
        let mut state = manager.load().await?;
        let result = loaded.engine(&state).destroy(&mut state).await?;
        manager.save(&state).await?;
        anyhow::Ok(result)
    }
    .await;
    lock.release().await?;
    let result = outcome?;

    report(&result)?;
    println!();
    println!("{}", "✓ Stack deleted!".green().bold());
    Ok(())
}
