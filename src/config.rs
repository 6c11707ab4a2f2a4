//! Engine configuration, loaded from TOML.
//!
//! ```toml
//! language = "en"
//! apply_penalties = true
//!
//! [cas]
//! url = "http://localhost:8080/cas"
//! timeout_secs = 30
//!
//! [security]
//! max_input_length = 500
//! allowed_words = ["ev"]
//!
//! [logging]
//! filter = "stateful=debug"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::input::SecurityRules;

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Localisation language bound for every batch, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Apply accumulated penalties when grading.
    #[serde(default = "default_apply_penalties")]
    pub apply_penalties: bool,
    #[serde(default)]
    pub security: SecurityRules,
    #[serde(default)]
    pub cas: CasConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_apply_penalties() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            language: None,
            apply_penalties: default_apply_penalties(),
            security: SecurityRules::default(),
            cas: CasConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Where the CAS evaluator lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasConfig {
    #[serde(default = "default_cas_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_cas_url() -> String {
    "http://localhost:8080/cas".into()
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            url: default_cas_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CasConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        toml::from_str(source).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }
}
