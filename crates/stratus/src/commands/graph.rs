use crate::utils;
use colored::Colorize;
use std::path::Path;
use stratus_cloud::DependencyGraph;

pub fn handle(config_path: Option<&Path>) -> anyhow::Result<()> {
    let loaded = utils::load_stack(config_path, None)?;
    let graph = DependencyGraph::from_resources(&loaded.stack.to_resource_set())?;

    println!(
        "{}",
        format!("Build order for '{}':", loaded.stack.name()).bold()
    );
    // Resources within one wave are created concurrently.
    for (index, wave) in graph.waves().iter().enumerate() {
        println!();
        println!("{}", format!("Wave {}", index + 1).blue().bold());
        for key in wave {
            let dependencies = graph.dependencies(key);
            if dependencies.is_empty() {
                println!("  • {}", key.cyan());
            } else {
                println!(
                    "  • {} {}",
                    key.cyan(),
                    format!("← {}", dependencies.join(", ")).dimmed()
                );
            }
        }
    }

    Ok(())
}
