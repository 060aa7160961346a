//! Errors raised by providers, the engine and the state store

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Provider rejected the call; the message is passed through verbatim
    #[error("Provider error: {0}")]
    ApiError(String),

    #[error("Invalid resource configuration: {0}")]
    InvalidConfig(String),

    #[error("Output {attribute} of {resource} is not available")]
    UnresolvedOutput { resource: String, attribute: String },

    #[error("Resource {resource} depends on undeclared resource {dependency}")]
    UnknownDependency { resource: String, dependency: String },

    #[error("Dependency cycle detected at {0}")]
    DependencyCycle(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("State lock unavailable: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
