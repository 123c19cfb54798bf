//! Configuration type definitions
//!
//! Optional fields fall back to defaults so a minimal file only needs the
//! backend endpoint and one platform with a port range.

use crate::core_types::{Platform, RunConfig};
use crate::errors::ConfigError;
use crate::host::EngineEndpoint;
use crate::messages::Locale;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchpadConfig {
    /// Public endpoint of this backend, used to recognize co-located engines.
    pub backend_endpoint: String,
    #[serde(default)]
    pub database: Option<PathBuf>,
    /// Root for run-log staging directories; the system temp dir when unset.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    #[serde(default)]
    pub locale: Locale,
    #[serde(default = "default_run_interval_minutes")]
    pub default_run_interval_minutes: i64,
    #[serde(default)]
    pub addressing: AddressingConfig,
    #[serde(default)]
    pub platforms: BTreeMap<Platform, PlatformConfig>,
}

/// Base-URL templates stored as `engine_host_url` on execution records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressingConfig {
    #[serde(default = "default_local_base_url")]
    pub local_base_url: String,
    /// `{host}` is replaced by the engine endpoint's host.
    #[serde(default = "default_remote_base_url")]
    pub remote_base_url: String,
}

impl Default for AddressingConfig {
    fn default() -> Self {
        Self {
            local_base_url: default_local_base_url(),
            remote_base_url: default_remote_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Engine endpoint, e.g. `unix:///var/run/docker.sock` or `tcp://10.0.0.4:2376`.
    /// The engine's local defaults are used when absent.
    #[serde(default)]
    pub engine_endpoint: Option<String>,
    #[serde(default)]
    pub ports: Option<PortRange>,
    #[serde(default = "default_container_port")]
    pub container_port: u16,
    #[serde(default = "default_run_log_file")]
    pub run_log_file: String,
    #[serde(default = "default_engine_timeout_secs")]
    pub engine_timeout_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            engine_endpoint: None,
            ports: None,
            container_port: default_container_port(),
            run_log_file: default_run_log_file(),
            engine_timeout_secs: default_engine_timeout_secs(),
        }
    }
}

/// Inclusive range of reservable host ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub fn new(from: u16, to: u16) -> Self {
        Self { from, to }
    }

    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.from..=self.to
    }

    pub fn len(&self) -> usize {
        if self.to < self.from {
            0
        } else {
            usize::from(self.to - self.from) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn default_run_interval_minutes() -> i64 {
    30
}

fn default_local_base_url() -> String {
    "http://localhost".to_string()
}

fn default_remote_base_url() -> String {
    "http://{host}".to_string()
}

fn default_container_port() -> u16 {
    8080
}

fn default_run_log_file() -> String {
    "run.log".to_string()
}

fn default_engine_timeout_secs() -> u64 {
    120
}

impl LaunchpadConfig {
    pub fn new(backend_endpoint: impl Into<String>) -> Self {
        Self {
            backend_endpoint: backend_endpoint.into(),
            database: None,
            staging_dir: None,
            locale: Locale::default(),
            default_run_interval_minutes: default_run_interval_minutes(),
            addressing: AddressingConfig::default(),
            platforms: BTreeMap::new(),
        }
    }

    pub fn with_platform(mut self, platform: Platform, config: PlatformConfig) -> Self {
        self.platforms.insert(platform, config);
        self
    }

    pub fn platform(&self, platform: Platform) -> Option<&PlatformConfig> {
        self.platforms.get(&platform)
    }

    /// The configured port pool, or `None` when the platform is not supported.
    pub fn port_range(&self, platform: Platform) -> Option<PortRange> {
        self.platform(platform).and_then(|p| p.ports)
    }

    pub fn default_run_config(&self) -> RunConfig {
        RunConfig::from_minutes(self.default_run_interval_minutes)
    }

    pub fn database_path(&self) -> PathBuf {
        match &self.database {
            Some(path) => path.clone(),
            None => dirs::data_dir()
                .map(|dir| dir.join("launchpad").join("launchpad.db"))
                .unwrap_or_else(|| PathBuf::from("launchpad.db")),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend_endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "backend_endpoint must not be empty".to_string(),
            ));
        }
        EngineEndpoint::parse(&self.backend_endpoint).map_err(|e| {
            ConfigError::Invalid(format!("backend_endpoint: {}", e))
        })?;

        if RunConfig::try_from_minutes(self.default_run_interval_minutes).is_err() {
            return Err(ConfigError::Invalid(
                "default_run_interval_minutes must be a positive number of minutes".to_string(),
            ));
        }

        if !self.addressing.remote_base_url.contains("{host}") {
            return Err(ConfigError::Invalid(
                "addressing.remote_base_url must contain a {host} placeholder".to_string(),
            ));
        }

        for (platform, config) in &self.platforms {
            if let Some(endpoint) = &config.engine_endpoint {
                EngineEndpoint::parse(endpoint).map_err(|e| {
                    ConfigError::Invalid(format!("platforms.{}.engine_endpoint: {}", platform, e))
                })?;
            }
            if let Some(range) = config.ports {
                if range.from == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "platforms.{}.ports.from must be greater than 0",
                        platform
                    )));
                }
                if range.from > range.to {
                    return Err(ConfigError::Invalid(format!(
                        "platforms.{}.ports: from ({}) is greater than to ({})",
                        platform, range.from, range.to
                    )));
                }
            }
            if config.run_log_file.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "platforms.{}.run_log_file must not be empty",
                    platform
                )));
            }
        }

        Ok(())
    }
}
