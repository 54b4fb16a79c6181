//! Worker identity resolution.
//!
//! The identity names the host the worker runs for. It is resolved once at
//! startup through an [`IdentitySelector`]; the default selector is a chain
//! that tries the runtime identity file first and the environment second.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use docworker_config::{IdentityConfig, IdentitySource};

/// Who this worker runs as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    #[serde(alias = "InstanceId")]
    pub instance_id: String,

    #[serde(default, alias = "Region", skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default, alias = "IdentityType", skip_serializing_if = "Option::is_none")]
    pub identity_type: Option<String>,
}

impl AgentIdentity {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            region: None,
            identity_type: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    fn validate(self, source: &'static str) -> Result<Self, IdentityError> {
        if self.instance_id.trim().is_empty() {
            return Err(IdentityError::Invalid {
                source_name: source,
                reason: "instance id is empty".to_string(),
            });
        }
        Ok(self)
    }
}

#[derive(Error, Debug)]
pub enum IdentityError {
    /// The source has nothing to offer; a chain moves on to the next one
    #[error("identity source {source_name} unavailable: {reason}")]
    Unavailable {
        source_name: &'static str,
        reason: String,
    },

    /// The source exists but holds garbage; a chain stops here
    #[error("identity source {source_name} is invalid: {reason}")]
    Invalid {
        source_name: &'static str,
        reason: String,
    },

    #[error("no identity source produced an identity ({0})")]
    Exhausted(String),
}

/// Strategy for resolving the worker identity
pub trait IdentitySelector: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    fn resolve(&self) -> Result<AgentIdentity, IdentityError>;
}

/// Reads a JSON identity document written by the host agent
#[derive(Debug, Clone)]
pub struct RuntimeConfigSelector {
    path: PathBuf,
}

impl RuntimeConfigSelector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentitySelector for RuntimeConfigSelector {
    fn name(&self) -> &'static str {
        "runtime_config"
    }

    fn resolve(&self) -> Result<AgentIdentity, IdentityError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| IdentityError::Unavailable {
            source_name: self.name(),
            reason: format!("{}: {}", self.path.display(), e),
        })?;

        let identity: AgentIdentity =
            serde_json::from_str(&content).map_err(|e| IdentityError::Invalid {
                source_name: self.name(),
                reason: format!("{}: {}", self.path.display(), e),
            })?;

        identity.validate(self.name())
    }
}

/// Reads `<PREFIX>_INSTANCE_ID` and optionally `<PREFIX>_REGION`
#[derive(Debug, Clone)]
pub struct EnvironmentSelector {
    prefix: String,
}

impl EnvironmentSelector {
    pub fn new() -> Self {
        Self::with_prefix("DOCWORKER")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var(&self, name: &str) -> Option<String> {
        std::env::var(format!("{}_{}", self.prefix, name))
            .ok()
            .filter(|value| !value.trim().is_empty())
    }
}

impl Default for EnvironmentSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentitySelector for EnvironmentSelector {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn resolve(&self) -> Result<AgentIdentity, IdentityError> {
        let instance_id = self.var("INSTANCE_ID").ok_or_else(|| IdentityError::Unavailable {
            source_name: self.name(),
            reason: format!("{}_INSTANCE_ID is not set", self.prefix),
        })?;

        let mut identity = AgentIdentity::new(instance_id);
        identity.region = self.var("REGION");
        identity.identity_type = Some("environment".to_string());
        identity.validate(self.name())
    }
}

/// Tries selectors in order; the first identity wins
pub struct ChainSelector {
    selectors: Vec<Box<dyn IdentitySelector>>,
}

impl ChainSelector {
    pub fn new(selectors: Vec<Box<dyn IdentitySelector>>) -> Self {
        Self { selectors }
    }

    /// Build the chain described by the identity configuration
    pub fn from_config(config: &IdentityConfig) -> Self {
        let selectors = config
            .sources
            .iter()
            .map(|source| -> Box<dyn IdentitySelector> {
                match source {
                    IdentitySource::RuntimeConfig => {
                        Box::new(RuntimeConfigSelector::new(&config.runtime_config_path))
                    }
                    IdentitySource::Environment => Box::new(EnvironmentSelector::new()),
                }
            })
            .collect();
        Self::new(selectors)
    }
}

impl IdentitySelector for ChainSelector {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn resolve(&self) -> Result<AgentIdentity, IdentityError> {
        let mut skipped = Vec::with_capacity(self.selectors.len());

        for selector in &self.selectors {
            match selector.resolve() {
                Ok(identity) => {
                    debug!("Resolved identity from {}", selector.name());
                    return Ok(identity);
                }
                Err(IdentityError::Unavailable { source_name, reason }) => {
                    debug!("Identity source {} unavailable: {}", source_name, reason);
                    skipped.push(format!("{}: {}", source_name, reason));
                }
                Err(e) => return Err(e),
            }
        }

        Err(IdentityError::Exhausted(if skipped.is_empty() {
            "no sources configured".to_string()
        } else {
            skipped.join("; ")
        }))
    }
}
