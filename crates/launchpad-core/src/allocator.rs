//! Port allocation for new executions.
//!
//! A reservation is a registry record with a claimed port and no container
//! handle. Reading the held ports and writing the reservation happen inside
//! one serializable transaction, so two concurrent reservations on the same
//! engine host can never claim the same port.

use crate::config::{LaunchpadConfig, PortRange};
use crate::core_types::{Artifact, ExecutionId, ExecutionRecord, OperatorId};
use crate::errors::{LaunchError, PreparationReason};
use crate::host;
use crate::store::ExecutionRegistry;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct PortAllocator {
    registry: ExecutionRegistry,
    config: Arc<LaunchpadConfig>,
}

impl PortAllocator {
    pub fn new(registry: ExecutionRegistry, config: Arc<LaunchpadConfig>) -> Self {
        Self { registry, config }
    }

    /// Claim the lowest free port of the artifact's platform pool on its
    /// engine host and persist a reservation-only record.
    pub fn reserve(
        &self,
        artifact: &Artifact,
        operator_id: &OperatorId,
    ) -> Result<ExecutionRecord, LaunchError> {
        let engine_host_url = host::engine_host_url(&self.config, artifact.platform)?;
        let range = self
            .config
            .port_range(artifact.platform)
            .ok_or(PreparationReason::PlatformNotSupported(artifact.platform))?;

        let record = self.registry.run_serializable(|tx| {
            // Re-checked here so identical concurrent requests cannot both pass.
            if tx.find_active(&artifact.id, operator_id)?.is_some() {
                return Err(LaunchError::from(PreparationReason::AlreadyRunning));
            }

            let held = tx.held_ports(&engine_host_url)?;
            let port = lowest_free_port(range, &held).ok_or(PreparationReason::NoPortsAvailable)?;

            let record = ExecutionRecord {
                id: ExecutionId::generate(),
                artifact_id: artifact.id.clone(),
                operator_id: operator_id.clone(),
                engine_host_url: engine_host_url.clone(),
                port,
                container_handle: None,
                started_at: None,
                scheduled_shutdown_at: None,
            };
            tx.insert(&record)?;
            Ok(record)
        })?;

        log::info!(
            "Reserved port {} on {} for artifact {} (execution {})",
            record.port,
            record.engine_host_url,
            record.artifact_id,
            record.id
        );
        Ok(record)
    }
}

/// The configured range minus the held ports, lowest first.
pub fn lowest_free_port(range: PortRange, held: &BTreeSet<u16>) -> Option<u16> {
    range.ports().find(|port| !held.contains(port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformConfig;
    use crate::core_types::{ArtifactId, BuildStatus, Platform, TaskType};
    use crate::store::Database;

    fn artifact(id: &str, platform: Platform) -> Artifact {
        Artifact {
            id: ArtifactId::from(id),
            task_type: TaskType::WebApp,
            build_status: BuildStatus::Built,
            platform,
            image: format!("img/{}", id),
            error_message: None,
        }
    }

    fn allocator(from: u16, to: u16) -> (PortAllocator, ExecutionRegistry) {
        let config = LaunchpadConfig::new("198.51.100.9").with_platform(
            Platform::Linux,
            PlatformConfig {
                engine_endpoint: Some("unix:///var/run/docker.sock".to_string()),
                ports: Some(PortRange::new(from, to)),
                ..Default::default()
            },
        );
        let registry = ExecutionRegistry::new(Database::open_in_memory().unwrap());
        (PortAllocator::new(registry.clone(), Arc::new(config)), registry)
    }

    #[test]
    fn test_lowest_free_port() {
        let range = PortRange::new(100, 104);
        let held: BTreeSet<u16> = [100, 101, 103].into_iter().collect();
        assert_eq!(lowest_free_port(range, &held), Some(102));

        let all: BTreeSet<u16> = range.ports().collect();
        assert_eq!(lowest_free_port(range, &all), None);
    }

    #[test]
    fn test_reserve_until_exhausted() {
        let (allocator, registry) = allocator(20000, 20002);
        let operator = OperatorId::from("op-1");

        let ports: Vec<u16> = ["a", "b", "c"]
            .iter()
            .map(|id| allocator.reserve(&artifact(id, Platform::Linux), &operator).unwrap().port)
            .collect();
        assert_eq!(ports, vec![20000, 20001, 20002]);

        let err = allocator
            .reserve(&artifact("d", Platform::Linux), &operator)
            .unwrap_err();
        assert!(matches!(
            err,
            LaunchError::Preparation(PreparationReason::NoPortsAvailable)
        ));
        assert_eq!(registry.list().unwrap().len(), 3);
    }

    #[test]
    fn test_released_port_is_reused() {
        let (allocator, registry) = allocator(20000, 20001);
        let operator = OperatorId::from("op-1");
        let first = allocator.reserve(&artifact("a", Platform::Linux), &operator).unwrap();
        allocator.reserve(&artifact("b", Platform::Linux), &operator).unwrap();

        registry.delete(&first.id).unwrap();
        let third = allocator.reserve(&artifact("c", Platform::Linux), &operator).unwrap();
        assert_eq!(third.port, first.port);
        assert!(third.is_reservation());
        assert_eq!(third.engine_host_url, "http://localhost");
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let (allocator, _) = allocator(20000, 20009);
        let operator = OperatorId::from("op-1");
        allocator.reserve(&artifact("a", Platform::Linux), &operator).unwrap();
        let err = allocator
            .reserve(&artifact("a", Platform::Linux), &operator)
            .unwrap_err();
        assert!(matches!(
            err,
            LaunchError::Preparation(PreparationReason::AlreadyRunning)
        ));

        // Another operator may run the same artifact.
        assert!(allocator
            .reserve(&artifact("a", Platform::Linux), &OperatorId::from("op-2"))
            .is_ok());
    }

    #[test]
    fn test_unconfigured_platform() {
        let (allocator, registry) = allocator(20000, 20009);
        let err = allocator
            .reserve(&artifact("a", Platform::Windows), &OperatorId::from("op-1"))
            .unwrap_err();
        assert!(matches!(
            err,
            LaunchError::Preparation(PreparationReason::PlatformNotSupported(Platform::Windows))
        ));
        assert!(registry.list().unwrap().is_empty());
    }
}
