//! Worker identity configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use crate::validation::Validatable;
use crate::error::ConfigResult;

/// A place the worker may read its identity from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// JSON file written by the coordinator's runtime
    RuntimeConfig,
    /// `DOCWORKER_INSTANCE_ID` and friends
    Environment,
}

impl fmt::Display for IdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentitySource::RuntimeConfig => write!(f, "runtime_config"),
            IdentitySource::Environment => write!(f, "environment"),
        }
    }
}

impl FromStr for IdentitySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "runtime_config" | "runtime-config" => Ok(IdentitySource::RuntimeConfig),
            "environment" | "env" => Ok(IdentitySource::Environment),
            _ => Err(format!("Invalid identity source: {}", s)),
        }
    }
}

/// Identity resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Sources tried in order; the first that resolves wins
    #[serde(default = "default_sources")]
    pub sources: Vec<IdentitySource>,

    /// Identity file read by the `runtime_config` source
    #[serde(default = "default_runtime_config_path")]
    pub runtime_config_path: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            runtime_config_path: default_runtime_config_path(),
        }
    }
}

impl Validatable for IdentityConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.sources.is_empty() {
            return Err(self.validation_error("At least one identity source must be configured"));
        }

        for (i, source) in self.sources.iter().enumerate() {
            if self.sources[..i].contains(source) {
                return Err(self.validation_error(format!("identity source {} listed twice", source)));
            }
        }

        if self.sources.contains(&IdentitySource::RuntimeConfig)
            && self.runtime_config_path.as_os_str().is_empty()
        {
            return Err(self.validation_error("runtime_config_path cannot be empty"));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "identity"
    }
}

fn default_sources() -> Vec<IdentitySource> {
    vec![IdentitySource::RuntimeConfig, IdentitySource::Environment]
}

fn default_runtime_config_path() -> PathBuf {
    PathBuf::from("/var/lib/docworker/runtimeconfig/identity_config.json")
}
