// src/engine/docker.rs
use async_trait::async_trait;
use bollard::errors::Error as BollardError;
use bollard::query_parameters::{
    DownloadFromContainerOptions as BollardDownloadFromContainerOptionsQuery,
    InspectContainerOptions as BollardInspectContainerOptionsQuery,
    StopContainerOptionsBuilder,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{ContainerEngine, ContainerRef};
use crate::config::{LaunchpadConfig, PlatformConfig};
use crate::core_types::{ContainerHandle, Platform};
use crate::errors::EngineError;
use crate::host::EngineEndpoint;

const DEFAULT_TCP_PORT: u16 = 2375;
const STOP_GRACE_SECONDS: i32 = 10;

struct PlatformClient {
    docker: Docker,
    run_log_file: String,
}

/// Docker-backed engine client with one connection per configured platform.
pub struct DockerEngine {
    clients: BTreeMap<Platform, PlatformClient>,
}

impl DockerEngine {
    pub fn from_config(config: &LaunchpadConfig) -> Result<Self, EngineError> {
        let mut clients = BTreeMap::new();
        for (platform, platform_config) in &config.platforms {
            let docker = connect(platform_config)?;
            log::debug!(
                "Configured container engine for {} at {}",
                platform,
                platform_config
                    .engine_endpoint
                    .as_deref()
                    .unwrap_or("local defaults")
            );
            clients.insert(
                *platform,
                PlatformClient {
                    docker,
                    run_log_file: platform_config.run_log_file.clone(),
                },
            );
        }
        Ok(Self { clients })
    }

    /// Client for the engine serving `platform`, shared with the runner.
    pub fn docker(&self, platform: Platform) -> Result<Docker, EngineError> {
        self.clients
            .get(&platform)
            .map(|c| c.docker.clone())
            .ok_or(EngineError::NotConfigured(platform))
    }
}

fn connect(config: &PlatformConfig) -> Result<Docker, EngineError> {
    let timeout = config.engine_timeout_secs;
    let Some(raw) = config.engine_endpoint.as_deref() else {
        return Ok(Docker::connect_with_local_defaults()?);
    };
    let docker = match EngineEndpoint::parse(raw)? {
        EngineEndpoint::UnixSocket(path) => {
            let path = path
                .to_str()
                .ok_or_else(|| EngineError::InvalidEndpoint(raw.to_string()))?;
            Docker::connect_with_socket(path, timeout, API_DEFAULT_VERSION)?
        }
        EngineEndpoint::NamedPipe(pipe) => {
            Docker::connect_with_socket(&pipe, timeout, API_DEFAULT_VERSION)?
        }
        EngineEndpoint::Network { scheme, host, port } => {
            if scheme == "https" {
                log::warn!(
                    "Engine endpoint {} uses https; connecting without TLS client certificates",
                    raw
                );
            }
            let host = if host.contains(':') {
                format!("[{}]", host)
            } else {
                host
            };
            let addr = format!("tcp://{}:{}", host, port.unwrap_or(DEFAULT_TCP_PORT));
            Docker::connect_with_http(&addr, timeout, API_DEFAULT_VERSION)?
        }
    };
    Ok(docker)
}

pub(crate) fn is_not_found_error(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError { status_code: 404, .. }
    )
}

fn is_not_modified_error(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError { status_code: 304, .. }
    )
}

fn run_log_path(working_dir: Option<&str>, run_log_file: &str) -> String {
    let dir = working_dir
        .map(|d| d.trim_end_matches('/'))
        .filter(|d| !d.is_empty())
        .unwrap_or("");
    format!("{}/{}", dir, run_log_file.trim_start_matches('/'))
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn resolve_running(
        &self,
        platform: Platform,
        handle: &ContainerHandle,
    ) -> Result<Option<Box<dyn ContainerRef>>, EngineError> {
        let client = self
            .clients
            .get(&platform)
            .ok_or(EngineError::NotConfigured(platform))?;

        match client
            .docker
            .inspect_container(&handle.0, None::<BollardInspectContainerOptionsQuery>)
            .await
        {
            Ok(details) => {
                let working_dir = details.config.and_then(|c| c.working_dir);
                Ok(Some(Box::new(DockerContainer {
                    docker: client.docker.clone(),
                    id: details.id.unwrap_or_else(|| handle.0.clone()),
                    log_path: run_log_path(working_dir.as_deref(), &client.run_log_file),
                })))
            }
            Err(e) if is_not_found_error(&e) => {
                log::debug!("Container {} not found on {} engine", handle, platform);
                Ok(None)
            }
            Err(e) => Err(EngineError::BollardError(e)),
        }
    }
}

struct DockerContainer {
    docker: Docker,
    id: String,
    log_path: String,
}

#[async_trait]
impl ContainerRef for DockerContainer {
    fn identity(&self) -> ContainerHandle {
        ContainerHandle(self.id.clone())
    }

    fn run_log_path(&self) -> String {
        self.log_path.clone()
    }

    async fn stop(&self) -> Result<(), EngineError> {
        let options = StopContainerOptionsBuilder::new()
            .t(STOP_GRACE_SECONDS)
            .build();
        match self.docker.stop_container(&self.id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified_error(&e) || is_not_found_error(&e) => {
                log::debug!("Container {} was already stopped", self.id);
                Ok(())
            }
            Err(e) => Err(EngineError::BollardError(e)),
        }
    }

    async fn download_archive(
        &self,
        path_in_container: &str,
        dest: &Path,
    ) -> Result<(), EngineError> {
        let options = BollardDownloadFromContainerOptionsQuery {
            path: path_in_container.to_string(),
        };
        let mut stream = self.docker.download_from_container(&self.id, Some(options));
        let mut file = fs::File::create(dest).await?;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_log_path() {
        assert_eq!(run_log_path(Some("/app"), "run.log"), "/app/run.log");
        assert_eq!(run_log_path(Some("/app/"), "/run.log"), "/app/run.log");
        assert_eq!(run_log_path(Some(""), "run.log"), "/run.log");
        assert_eq!(run_log_path(None, "logs/run.log"), "/logs/run.log");
    }

    #[test]
    fn test_error_classification() {
        let not_found = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container: abc".to_string(),
        };
        let not_modified = BollardError::DockerResponseServerError {
            status_code: 304,
            message: String::new(),
        };
        let server = BollardError::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        };
        assert!(is_not_found_error(&not_found));
        assert!(!is_not_found_error(&server));
        assert!(is_not_modified_error(&not_modified));
        assert!(!is_not_modified_error(&not_found));
    }

    #[tokio::test]
    async fn test_unconfigured_platform() {
        let engine = DockerEngine {
            clients: BTreeMap::new(),
        };
        let result = engine
            .resolve_running(Platform::Windows, &ContainerHandle("abc".to_string()))
            .await;
        assert!(matches!(
            result,
            Err(EngineError::NotConfigured(Platform::Windows))
        ));
    }
}
