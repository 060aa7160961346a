mod commands;
mod utils;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "Declarative two-tier web stacks from one YAML file", long_about = None)]
struct Cli {
    /// Stack file (discovered from the current directory when omitted)
    #[arg(short, long, global = true, env = stratus_config::CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose the stack and report what it declares
    Validate,
    /// Show the creation order, wave by wave
    Graph,
    /// Show what `up` would change
    Plan {
        /// Override desiredCount from the stack file
        #[arg(long)]
        desired_count: Option<u32>,
    },
    /// Create or update the stack
    Up {
        /// Override desiredCount from the stack file
        #[arg(long)]
        desired_count: Option<u32>,
        /// Apply without asking
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Delete every resource of the stack
    Down {
        /// Delete without asking
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Print the stack outputs
    Output {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `output --json` stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Validate => commands::validate::handle(config)?,
        Commands::Graph => commands::graph::handle(config)?,
        Commands::Plan { desired_count } => commands::plan::handle(config, desired_count).await?,
        Commands::Up { desired_count, yes } => {
            commands::up::handle(config, desired_count, yes).await?
        }
        Commands::Down { yes } => commands::down::handle(config, yes).await?,
        Commands::Output { json } => commands::output::handle(config, json).await?,
        Commands::Version => println!("stratus {}", env!("CARGO_PKG_VERSION")),
    }

    Ok(())
}
