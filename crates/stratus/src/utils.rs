use colored::Colorize;
use std::path::{Path, PathBuf};
use stratus_cloud::{Engine, GlobalState, LocalProvider, StateManager};
use stratus_config::StackConfig;
use stratus_core::Stack;

/// Stack file, its parsed configuration and the composed stack
pub struct LoadedStack {
    pub path: PathBuf,
    /// Directory holding `.stratus/` state
    pub state_root: PathBuf,
    pub config: StackConfig,
    pub stack: Stack,
}

impl LoadedStack {
    pub fn state_manager(&self) -> StateManager {
        StateManager::new(&self.state_root)
    }

    /// Engine whose provider already knows every resource recorded in `state`
    pub fn engine(&self, state: &GlobalState) -> Engine<LocalProvider> {
        let provider = LocalProvider::new(&self.config.region);
        provider.adopt_state(state);
        Engine::new(provider)
    }
}

/// Load the stack file from `--config` or by discovery, then compose it
pub fn load_stack(
    config_path: Option<&Path>,
    desired_count: Option<u32>,
) -> anyhow::Result<LoadedStack> {
    // A discovered file may live in `./.stratus/` itself, so state stays in
    // the working directory; an explicit path keeps it next to the file.
    let (path, state_root, mut config) = match config_path {
        Some(path) => (path.to_path_buf(), parent_dir(path), StackConfig::load(path)?),
        None => {
            let (path, config) = stratus_config::load_stack_config()?;
            (path, std::env::current_dir()?, config)
        }
    };
    if let Some(count) = desired_count {
        config = config.with_desired_count(count);
    }
    let stack = Stack::compose(&config)?;
    Ok(LoadedStack {
        path,
        state_root,
        config,
        stack,
    })
}

fn parent_dir(stack_file: &Path) -> PathBuf {
    match stack_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Show which stack file was loaded
pub fn print_loaded_config_file(path: &Path) {
    println!("📄 Stack file: {}", path.display().to_string().cyan());
}
