//! Configuration for the launchpad lifecycle manager
//!
//! Configuration is a YAML document describing the backend's own public
//! endpoint, the addressing templates used for engine hosts, and one entry
//! per supported platform (engine endpoint plus reservable port range).

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;

use crate::errors::ConfigError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<LaunchpadConfig, ConfigError> {
    ConfigLoader::from_file(path).await
}
