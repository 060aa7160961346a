//! Stack configuration model
//!
//! A `StackConfig` is built once from the stack file and then passed by
//! reference through every composition step. Nothing mutates it afterwards.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";
pub const DEFAULT_ZONE_COUNT: usize = 2;

/// How private subnets reach the internet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrivateEgress {
    /// No default route: private workloads cannot reach or be reached from the internet
    #[default]
    None,
    /// One NAT gateway in the first public subnet, shared by all private subnets
    NatGateway,
}

impl std::fmt::Display for PrivateEgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrivateEgress::None => write!(f, "none"),
            PrivateEgress::NatGateway => write!(f, "nat-gateway"),
        }
    }
}

/// Complete configuration for one stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StackConfig {
    /// Prefix for every resource name
    pub project_name: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Zones offered by the region, in the order they are consumed
    #[serde(default)]
    pub availability_zones: Option<Vec<String>>,

    #[serde(default = "default_vpc_cidr")]
    pub vpc_cidr: String,

    #[serde(default = "default_zone_count")]
    pub zone_count: usize,

    #[serde(default = "default_true")]
    pub enable_dns_support: bool,

    #[serde(default = "default_true")]
    pub enable_dns_hostnames: bool,

    #[serde(default)]
    pub private_egress: PrivateEgress,

    pub frontend_image: String,

    pub backend_image: String,

    /// External database endpoint handed to the backend container
    #[serde(default)]
    pub mongo_uri: Option<String>,

    #[serde(default = "default_desired_count")]
    pub desired_count: u32,

    #[serde(default = "default_cpu")]
    pub cpu: String,

    #[serde(default = "default_memory")]
    pub memory: String,

    #[serde(default)]
    pub execution_role_arn: Option<String>,

    #[serde(default = "default_listener_port")]
    pub listener_port: u16,

    #[serde(default = "default_target_port")]
    pub target_port: u16,

    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_vpc_cidr() -> String {
    DEFAULT_VPC_CIDR.to_string()
}

fn default_zone_count() -> usize {
    DEFAULT_ZONE_COUNT
}

fn default_true() -> bool {
    true
}

fn default_desired_count() -> u32 {
    1
}

fn default_cpu() -> String {
    "512".to_string()
}

fn default_memory() -> String {
    "1024".to_string()
}

fn default_listener_port() -> u16 {
    80
}

fn default_target_port() -> u16 {
    8000
}

fn default_health_check_path() -> String {
    "/health".to_string()
}

impl StackConfig {
    /// Minimal configuration with every optional setting at its default
    pub fn new(
        project_name: impl Into<String>,
        frontend_image: impl Into<String>,
        backend_image: impl Into<String>,
    ) -> Self {
        Self {
            project_name: project_name.into(),
            region: default_region(),
            availability_zones: None,
            vpc_cidr: default_vpc_cidr(),
            zone_count: default_zone_count(),
            enable_dns_support: true,
            enable_dns_hostnames: true,
            private_egress: PrivateEgress::None,
            frontend_image: frontend_image.into(),
            backend_image: backend_image.into(),
            mongo_uri: None,
            desired_count: default_desired_count(),
            cpu: default_cpu(),
            memory: default_memory(),
            execution_role_arn: None,
            listener_port: default_listener_port(),
            target_port: default_target_port(),
            health_check_path: default_health_check_path(),
            tags: BTreeMap::new(),
        }
    }

    /// Parse a stack file body
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: StackConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a stack file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: StackConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        tracing::debug!(
            "Loaded stack '{}' from {}",
            config.project_name,
            path.display()
        );
        Ok(config)
    }

    /// Shape checks only; topology rules live in the composition core
    pub fn validate(&self) -> Result<()> {
        if self.project_name.trim().is_empty() {
            return Err(ConfigError::MissingValue("projectName"));
        }
        if self.frontend_image.trim().is_empty() {
            return Err(ConfigError::MissingValue("frontendImage"));
        }
        if self.backend_image.trim().is_empty() {
            return Err(ConfigError::MissingValue("backendImage"));
        }
        if self.zone_count == 0 {
            return Err(ConfigError::InvalidValue {
                key: "zoneCount",
                message: "must be at least 1".to_string(),
            });
        }
        if !self
            .project_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ConfigError::InvalidValue {
                key: "projectName",
                message: format!(
                    "'{}' may only contain ASCII letters, digits and '-'",
                    self.project_name
                ),
            });
        }
        Ok(())
    }

    /// Zones offered by the region; `<region>a`, `b`, `c` when none are configured
    pub fn available_zones(&self) -> Vec<String> {
        match &self.availability_zones {
            Some(zones) => zones.clone(),
            None => ["a", "b", "c"]
                .iter()
                .map(|suffix| format!("{}{}", self.region, suffix))
                .collect(),
        }
    }

    /// Database URI with a scheme, as the backend expects it
    pub fn mongo_endpoint(&self) -> Option<String> {
        self.mongo_uri.as_ref().map(|uri| {
            if uri.contains("://") {
                uri.clone()
            } else {
                format!("https://{}", uri)
            }
        })
    }

    /// Tags with the stack's `project` tag filled in
    pub fn resource_tags(&self) -> BTreeMap<String, String> {
        let mut tags = self.tags.clone();
        tags.entry("project".to_string())
            .or_insert_with(|| self.project_name.clone());
        tags
    }

    /// Return a copy with the desired count replaced
    pub fn with_desired_count(mut self, desired_count: u32) -> Self {
        self.desired_count = desired_count;
        self
    }
}
