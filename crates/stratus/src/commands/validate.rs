use crate::utils;
use colored::Colorize;
use std::path::Path;

pub fn handle(config_path: Option<&Path>) -> anyhow::Result<()> {
    println!("{}", "Validating stack...".blue());

    let loaded = match utils::load_stack(config_path, None) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Invalid stack".red().bold());
            eprintln!("  {}", e);
            return Err(e);
        }
    };
    utils::print_loaded_config_file(&loaded.path);

    let config = &loaded.config;
    let stack = &loaded.stack;
    println!("{}", "✓ Stack is valid!".green().bold());
    println!();
    println!("Summary:");
    println!("  Project: {}", stack.name().cyan());
    println!("  Region: {}", config.region);
    println!("  Zones: {}", stack.zones().zones().join(", "));
    println!("  VPC: {}", stack.network().vpc().cidr_block);
    println!("  Private egress: {}", config.private_egress);

    println!("  Subnets: {}", stack.network().subnets().len());
    for subnet in stack.network().subnets() {
        println!(
            "    - {} ({}, {}, {})",
            subnet.entity.name.cyan(),
            subnet.tier(),
            subnet.spec.zone,
            subnet.spec.cidr_block
        );
    }

    let chain: Vec<String> = stack
        .security()
        .chain()
        .iter()
        .map(|g| g.entity.name.clone())
        .collect();
    println!("  Security chain: internet → {}", chain.join(" → "));

    println!("  Containers: {}", stack.workload().containers.len());
    for container in stack.workload().containers.iter() {
        println!(
            "    - {} ({}, port {})",
            container.name.cyan(),
            container.image,
            container.container_port
        );
    }
    println!("  Desired count: {}", stack.service().desired_count);

    println!("  Resources: {}", stack.scope().len());
    for (kind, count) in stack.kind_counts() {
        println!("    - {}: {}", kind, count);
    }

    Ok(())
}
