// src/runner/docker.rs
use async_trait::async_trait;
use bollard::models::{ContainerCreateBody, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    CreateImageOptions as BollardCreateImageOptionsQuery,
    RemoveContainerOptionsBuilder,
    StartContainerOptions as BollardStartContainerOptionsQuery,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::ArtifactRunner;
use crate::config::LaunchpadConfig;
use crate::core_types::{Artifact, ContainerHandle, Platform};
use crate::engine::docker::is_not_found_error;
use crate::engine::DockerEngine;
use crate::errors::{EngineError, RunnerError, RunnerFailureKind};

struct RunnerTarget {
    docker: Docker,
    container_port: u16,
}

/// Starts prebuilt artifact images on the platform's container engine.
pub struct DockerImageRunner {
    targets: BTreeMap<Platform, RunnerTarget>,
}

impl DockerImageRunner {
    pub fn new(engine: &DockerEngine, config: &LaunchpadConfig) -> Result<Self, EngineError> {
        let mut targets = BTreeMap::new();
        for (platform, platform_config) in &config.platforms {
            targets.insert(
                *platform,
                RunnerTarget {
                    docker: engine.docker(*platform)?,
                    container_port: platform_config.container_port,
                },
            );
        }
        Ok(Self { targets })
    }

    async fn ensure_image(&self, docker: &Docker, image: &str) -> Result<(), RunnerError> {
        match docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(e) if is_not_found_error(&e) => {}
            Err(e) => {
                return Err(RunnerError::new(
                    RunnerFailureKind::Preparation,
                    format!("Failed to inspect image {}: {}", image, e),
                ))
            }
        }

        log::info!("Pulling image {}", image);
        let options = Some(BollardCreateImageOptionsQuery {
            from_image: Some(image.to_string()),
            ..Default::default()
        });
        let mut pull_stream = docker.create_image(options, None, None);
        while let Some(progress) = pull_stream.next().await {
            if let Err(e) = progress {
                return Err(RunnerError::new(
                    RunnerFailureKind::Preparation,
                    format!("Failed to pull image {}: {}", image, e),
                ));
            }
        }
        Ok(())
    }
}

fn container_name(artifact: &Artifact, port: u16) -> String {
    let id: String = artifact
        .id
        .0
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("launchpad-{}-{}-{}", id, port, &suffix[..8])
}

fn port_bindings(container_port: u16, host_port: u16) -> HashMap<String, Option<Vec<PortBinding>>> {
    HashMap::from([(
        format!("{}/tcp", container_port),
        Some(vec![PortBinding {
            host_ip: None,
            host_port: Some(host_port.to_string()),
        }]),
    )])
}

/// Force-remove a container that was created but never started. Returns
/// whether the engine confirmed the removal.
async fn remove_failed_container(docker: &Docker, id: &str) -> bool {
    let remove = RemoveContainerOptionsBuilder::new().force(true).build();
    match docker.remove_container(id, Some(remove)).await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Failed to remove container {} after failed start: {}", id, e);
            false
        }
    }
}

#[async_trait]
impl ArtifactRunner for DockerImageRunner {
    async fn run(&self, artifact: &Artifact, port: u16) -> Result<ContainerHandle, RunnerError> {
        let target = self.targets.get(&artifact.platform).ok_or_else(|| {
            RunnerError::new(
                RunnerFailureKind::Preparation,
                format!("No container engine configured for {}", artifact.platform),
            )
        })?;

        self.ensure_image(&target.docker, &artifact.image).await?;

        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(container_name(artifact, port)),
            ..Default::default()
        });
        let config = ContainerCreateBody {
            image: Some(artifact.image.clone()),
            labels: Some(HashMap::from([
                ("launchpad.artifact".to_string(), artifact.id.0.clone()),
                ("launchpad.port".to_string(), port.to_string()),
            ])),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings(target.container_port, port)),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container = target
            .docker
            .create_container(options, config)
            .await
            .map_err(|e| {
                RunnerError::new(
                    RunnerFailureKind::Preparation,
                    format!("Failed to create container: {}", e),
                )
            })?;

        if let Err(e) = target
            .docker
            .start_container(&container.id, None::<BollardStartContainerOptionsQuery>)
            .await
        {
            log::warn!("Container {} failed to start: {}", container.id, e);
            remove_failed_container(&target.docker, &container.id).await;
            return Err(RunnerError::new(
                RunnerFailureKind::Run,
                format!("Failed to start container: {}", e),
            ));
        }

        log::info!(
            "Started container {} for artifact {} on port {}",
            container.id,
            artifact.id,
            port
        );
        Ok(ContainerHandle(container.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{ArtifactId, BuildStatus, TaskType};

    #[test]
    fn test_container_name_is_sanitized() {
        let artifact = Artifact {
            id: ArtifactId::from("course/42:sub"),
            task_type: TaskType::WebApp,
            build_status: BuildStatus::Built,
            platform: Platform::Linux,
            image: "img".to_string(),
            error_message: None,
        };
        let name = container_name(&artifact, 20001);
        assert!(name.starts_with("launchpad-course-42-sub-20001-"));
        assert_eq!(name.len(), "launchpad-course-42-sub-20001-".len() + 8);
    }

    #[tokio::test]
    async fn test_remove_failed_container_reports_unreachable_engine() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("missing.sock");
        std::fs::write(&socket, b"").unwrap();
        let docker =
            Docker::connect_with_socket(socket.to_str().unwrap(), 1, bollard::API_DEFAULT_VERSION)
                .unwrap();
        assert!(!remove_failed_container(&docker, "abc123").await);
    }

    #[test]
    fn test_port_bindings() {
        let bindings = port_bindings(8080, 20005);
        let binding = bindings.get("8080/tcp").unwrap().as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("20005"));
        assert!(binding[0].host_ip.is_none());
    }
}
