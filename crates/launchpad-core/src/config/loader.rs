//! Configuration loader for YAML files and environment overrides

use crate::config::types::LaunchpadConfig;
use crate::errors::ConfigError;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const ENV_BACKEND_ENDPOINT: &str = "LAUNCHPAD_BACKEND_ENDPOINT";
pub const ENV_DATABASE: &str = "LAUNCHPAD_DATABASE";
pub const ENV_STAGING_DIR: &str = "LAUNCHPAD_STAGING_DIR";

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<LaunchpadConfig, ConfigError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        log::debug!("Loaded configuration file {}", path.display());
        Self::from_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<LaunchpadConfig, ConfigError> {
        let mut config: LaunchpadConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Self::apply_overrides(&mut config, |key| env::var(key).ok());

        config.validate()?;
        Ok(config)
    }

    /// Override selected values from the environment. `lookup` is injectable
    /// so tests do not have to mutate the process environment.
    pub fn apply_overrides<F>(config: &mut LaunchpadConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_BACKEND_ENDPOINT).filter(|v| !v.is_empty()) {
            log::debug!("Backend endpoint overridden by {}", ENV_BACKEND_ENDPOINT);
            config.backend_endpoint = endpoint;
        }
        if let Some(database) = lookup(ENV_DATABASE).filter(|v| !v.is_empty()) {
            config.database = Some(PathBuf::from(database));
        }
        if let Some(staging) = lookup(ENV_STAGING_DIR).filter(|v| !v.is_empty()) {
            config.staging_dir = Some(PathBuf::from(staging));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::Platform;
    use crate::messages::Locale;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
backend_endpoint: "https://198.51.100.9:8443"
locale: hu
default_run_interval_minutes: 45
addressing:
  remote_base_url: "https://{host}"
platforms:
  linux:
    engine_endpoint: "tcp://203.0.113.5:2376"
    ports: { from: 20000, to: 20004 }
  windows:
    engine_endpoint: "npipe:////./pipe/docker_engine"
"#;

    #[test]
    fn test_parse_sample() {
        let config = ConfigLoader::from_str(SAMPLE).unwrap();
        assert_eq!(config.locale, Locale::Hu);
        assert_eq!(config.default_run_interval_minutes, 45);
        assert_eq!(config.addressing.local_base_url, "http://localhost");
        assert_eq!(config.addressing.remote_base_url, "https://{host}");

        let linux = config.platform(Platform::Linux).unwrap();
        assert_eq!(linux.container_port, 8080);
        assert_eq!(linux.run_log_file, "run.log");
        assert_eq!(config.port_range(Platform::Linux).unwrap().len(), 5);

        // Windows has an engine but no port pool, so it cannot launch.
        assert!(config.platform(Platform::Windows).is_some());
        assert!(config.port_range(Platform::Windows).is_none());
    }

    #[test]
    fn test_overrides() {
        let mut config = ConfigLoader::from_str(SAMPLE).unwrap();
        ConfigLoader::apply_overrides(&mut config, |key| match key {
            ENV_BACKEND_ENDPOINT => Some("https://203.0.113.5".to_string()),
            ENV_DATABASE => Some("/tmp/launchpad-test.db".to_string()),
            _ => None,
        });
        assert_eq!(config.backend_endpoint, "https://203.0.113.5");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/launchpad-test.db"));
        assert!(config.staging_dir.is_none());
    }

    #[test]
    fn test_invalid_yaml() {
        let err = ConfigLoader::from_str("platforms: [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[tokio::test]
    async fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", SAMPLE).unwrap();
        let config = ConfigLoader::from_file(file.path()).await.unwrap();
        assert_eq!(config.backend_endpoint, "https://198.51.100.9:8443");

        let missing = ConfigLoader::from_file("/nonexistent/launchpad.yaml").await;
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
