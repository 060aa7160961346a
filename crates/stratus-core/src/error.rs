use stratus_cloud::CloudError;
use stratus_config::ConfigError;
use thiserror::Error;

/// Errors raised while composing a topology
///
/// Everything except `Cloud` is detected locally, before any resource is
/// handed to a provider.
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Address space exhausted: {0}")]
    AddressSpaceExhausted(String),

    #[error("Invalid workload: {0}")]
    InvalidWorkload(String),

    #[error("Container not found: no container '{name}' exposes port {port}")]
    ContainerNotFound { name: String, port: u16 },

    #[error("Invalid health check path '{path}': {reason}")]
    InvalidHealthCheck { path: String, reason: String },

    #[error("Invalid CIDR '{cidr}': {reason}")]
    InvalidCidr { cidr: String, reason: String },

    #[error("Invalid security rule: {0}")]
    InvalidSecurityRule(String),

    #[error("Entity declared twice: {0}")]
    DuplicateEntity(String),

    #[error("{entity} uses {dependency} without declaring it as a dependency")]
    UndeclaredDependency { entity: String, dependency: String },

    #[error("Output {0} has already been resolved")]
    OutputAlreadyResolved(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),
}

pub type Result<T> = std::result::Result<T, TopologyError>;
