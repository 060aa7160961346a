pub mod error;
pub mod stack;

pub use error::*;
pub use stack::{PrivateEgress, StackConfig};

use std::path::PathBuf;

/// Environment variable that points directly at a stack file
pub const CONFIG_PATH_ENV: &str = "STRATUS_CONFIG_PATH";

const CANDIDATES: [&str; 4] = [
    "stratus.local.yaml",
    ".stratus.local.yaml",
    "stratus.yaml",
    ".stratus.yaml",
];

/// Locate the stack file
///
/// Search order:
/// 1. `STRATUS_CONFIG_PATH` (direct path)
/// 2. current directory: stratus.local.yaml, .stratus.local.yaml, stratus.yaml, .stratus.yaml
/// 3. the same names under `./.stratus/`
/// 4. `~/.config/stratus/stratus.yaml`
pub fn find_stack_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(
            "{} points at {} which does not exist",
            CONFIG_PATH_ENV,
            path.display()
        );
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let stack_dir = current_dir.join(".stratus");
    if stack_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = stack_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("stratus").join("stratus.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::StackFileNotFound)
}

/// Find and load the stack file in one step
pub fn load_stack_config() -> Result<(PathBuf, StackConfig)> {
    let path = find_stack_file()?;
    let config = StackConfig::load(&path)?;
    Ok((path, config))
}
