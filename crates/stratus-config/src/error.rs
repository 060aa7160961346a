use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "Stack file not found. Looked in:\n\
        - current directory: stratus.local.yaml, .stratus.local.yaml, stratus.yaml, .stratus.yaml\n\
        - ./.stratus/ directory\n\
        - ~/.config/stratus/stratus.yaml\n\
        Set STRATUS_CONFIG_PATH to point at a file directly"
    )]
    StackFileNotFound,

    #[error("Failed to parse stack file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Missing required setting: {0}")]
    MissingValue(&'static str),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
