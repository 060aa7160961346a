use crate::utils;
use colored::Colorize;
use serde_json::{Map, Value};
use std::path::Path;

pub async fn handle(config_path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let loaded = utils::load_stack(config_path, None)?;
    let state = loaded.state_manager().load().await?;
    loaded.stack.resolve(&state)?;

    let exports = loaded.stack.exports();
    if json {
        let values: Map<String, Value> = exports
            .iter()
            .map(|(name, output)| {
                let value = output.get().map_or(Value::Null, |v| Value::String(v.clone()));
                (name.to_string(), value)
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&Value::Object(values))?);
        return Ok(());
    }

    for (name, output) in exports {
        match output.get() {
            Some(value) => println!("{} = {}", name, value.cyan()),
            None => println!("{} = {}", name, "(not deployed)".dimmed()),
        }
    }
    Ok(())
}
