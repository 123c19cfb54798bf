//! Execution lifecycle manager.
//!
//! Starting an execution runs validation, port reservation, the artifact
//! runner, and finalization of the registry record, in that order. Any
//! failure after the reservation is committed deletes the reservation before
//! the error reaches the caller, so the registry never keeps a record
//! without a container handle beyond the attempt that created it.
//!
//! Stopping always deletes the record, even when the engine fails to stop
//! the container: an orphaned record would block its port and slot, while an
//! orphaned container is reclaimed by the engine on its own.
//!
//! Reading a run log stages the container's archive in a fresh temporary
//! directory that is removed on every exit path.

use crate::allocator::PortAllocator;
use crate::config::LaunchpadConfig;
use crate::core_types::{
    Artifact, ArtifactId, BuildStatus, ContainerHandle, ExecutionDescriptor, ExecutionId,
    ExecutionRecord, OperatorId, RunConfig, TaskType,
};
use crate::engine::{ContainerEngine, ContainerRef};
use crate::errors::{LaunchError, PreparationReason, RunnerError, RunnerFailureKind};
use crate::runner::ArtifactRunner;
use crate::store::{ArtifactCatalog, Database, ExecutionRegistry};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tempfile::{Builder, TempDir};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Build status recorded on the artifact for a runner failure, if any.
pub fn diagnostic_status(kind: RunnerFailureKind) -> Option<BuildStatus> {
    match kind {
        RunnerFailureKind::Preparation => Some(BuildStatus::InitializationFailed),
        RunnerFailureKind::Compile => Some(BuildStatus::CompilationFailed),
        RunnerFailureKind::Run | RunnerFailureKind::Unknown => None,
    }
}

pub struct LifecycleManager {
    config: Arc<LaunchpadConfig>,
    registry: ExecutionRegistry,
    allocator: PortAllocator,
    catalog: Arc<dyn ArtifactCatalog>,
    engine: Arc<dyn ContainerEngine>,
    runner: Arc<dyn ArtifactRunner>,
    clock: Arc<dyn Clock>,
}

impl LifecycleManager {
    pub fn new(
        config: Arc<LaunchpadConfig>,
        database: Database,
        catalog: Arc<dyn ArtifactCatalog>,
        engine: Arc<dyn ContainerEngine>,
        runner: Arc<dyn ArtifactRunner>,
    ) -> Self {
        let registry = ExecutionRegistry::new(database);
        let allocator = PortAllocator::new(registry.clone(), config.clone());
        Self {
            config,
            registry,
            allocator,
            catalog,
            engine,
            runner,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.registry
    }

    /// Launch `artifact_id` for `operator_id` and return its descriptor.
    pub async fn start_execution(
        &self,
        artifact_id: &ArtifactId,
        operator_id: &OperatorId,
        run_config: RunConfig,
    ) -> Result<ExecutionDescriptor, LaunchError> {
        let artifact = self.load_artifact(artifact_id)?;
        self.validate(&artifact, operator_id)?;
        if run_config.shutdown_after(self.clock.now()).is_none() {
            return Err(PreparationReason::InvalidRunInterval.into());
        }

        let reservation = self.allocator.reserve(&artifact, operator_id)?;
        let mut guard = ReservationGuard::new(&self.registry, &reservation.id);

        match self.provision(&artifact, &reservation, run_config).await {
            Ok(descriptor) => {
                guard.disarm();
                Ok(descriptor)
            }
            Err(err) => {
                guard.compensate();
                Err(err)
            }
        }
    }

    fn validate(&self, artifact: &Artifact, operator_id: &OperatorId) -> Result<(), LaunchError> {
        if self.registry.find_active(&artifact.id, operator_id)?.is_some() {
            return Err(PreparationReason::AlreadyRunning.into());
        }
        if artifact.task_type != TaskType::WebApp {
            return Err(PreparationReason::NotWebApp.into());
        }
        if artifact.build_status == BuildStatus::CompilationFailed {
            return Err(PreparationReason::CompilationFailed.into());
        }
        Ok(())
    }

    async fn provision(
        &self,
        artifact: &Artifact,
        reservation: &ExecutionRecord,
        run_config: RunConfig,
    ) -> Result<ExecutionDescriptor, LaunchError> {
        let handle = match self.runner.run(artifact, reservation.port).await {
            Ok(handle) => handle,
            Err(err) => {
                log::warn!(
                    "Runner failed for artifact {} on port {}: {} failure, exit code {:?}",
                    artifact.id,
                    reservation.port,
                    err.kind,
                    err.exit_code
                );
                self.record_diagnostics(artifact, &err);
                return Err(err.into());
            }
        };

        let started_at = self.clock.now();
        let finalized = match run_config.shutdown_after(started_at) {
            Some(shutdown_at) => self
                .registry
                .activate(&reservation.id, &handle, started_at, shutdown_at)
                .map(|record| (record, shutdown_at))
                .map_err(LaunchError::from),
            None => Err(PreparationReason::InvalidRunInterval.into()),
        };
        let (record, shutdown_at) = match finalized {
            Ok(finalized) => finalized,
            Err(err) => {
                // The container is running but cannot be recorded; do not leave it behind.
                log::error!(
                    "Failed to record container {} for execution {}: {}",
                    handle,
                    reservation.id,
                    err
                );
                self.stop_orphan(artifact, &handle).await;
                return Err(err);
            }
        };

        log::info!(
            "Execution {} started: artifact {} on {}:{} until {}",
            record.id,
            record.artifact_id,
            record.engine_host_url,
            record.port,
            shutdown_at
        );
        Ok(ExecutionDescriptor {
            id: record.id,
            port: record.port,
            engine_host_url: record.engine_host_url,
            started_at,
            scheduled_shutdown_at: shutdown_at,
        })
    }

    fn record_diagnostics(&self, artifact: &Artifact, err: &RunnerError) {
        let Some(status) = diagnostic_status(err.kind) else {
            return;
        };
        if let Err(e) = self
            .catalog
            .record_diagnostics(&artifact.id, status, &err.captured_output())
        {
            log::error!(
                "Failed to record diagnostics for artifact {}: {}",
                artifact.id,
                e
            );
        }
    }

    async fn stop_orphan(&self, artifact: &Artifact, handle: &ContainerHandle) {
        match self.engine.resolve_running(artifact.platform, handle).await {
            Ok(Some(container)) => {
                if let Err(e) = container.stop().await {
                    log::error!("Failed to stop unrecorded container {}: {}", handle, e);
                }
            }
            Ok(None) => {}
            Err(e) => log::error!("Failed to resolve unrecorded container {}: {}", handle, e),
        }
    }

    /// Stop the execution's container and delete its record. The record is
    /// deleted even when stopping fails; that failure is then reported as
    /// `LaunchError::Shutdown`.
    pub async fn stop_execution(&self, execution_id: &ExecutionId) -> Result<(), LaunchError> {
        let record = self
            .registry
            .get(execution_id)?
            .ok_or_else(|| LaunchError::ExecutionNotFound(execution_id.clone()))?;
        self.stop_record(&record).await
    }

    async fn stop_record(&self, record: &ExecutionRecord) -> Result<(), LaunchError> {
        let mut shutdown_error = None;

        if let Some(handle) = &record.container_handle {
            match self.catalog.get(&record.artifact_id) {
                Ok(Some(artifact)) => {
                    match self.engine.resolve_running(artifact.platform, handle).await {
                        Ok(Some(container)) => {
                            if let Err(e) = container.stop().await {
                                log::error!("Failed to stop container {}: {}", handle, e);
                                shutdown_error = Some(e.to_string());
                            } else {
                                log::info!("Stopped container {}", handle);
                            }
                        }
                        Ok(None) => {
                            log::info!("Container {} is already gone", handle);
                        }
                        Err(e) => {
                            log::error!("Failed to resolve container {}: {}", handle, e);
                            shutdown_error = Some(e.to_string());
                        }
                    }
                }
                Ok(None) => {
                    log::warn!(
                        "Artifact {} of execution {} no longer exists; cannot locate its engine",
                        record.artifact_id,
                        record.id
                    );
                    shutdown_error = Some(format!("artifact {} not found", record.artifact_id));
                }
                Err(e) => {
                    log::error!("Failed to load artifact {}: {}", record.artifact_id, e);
                    shutdown_error = Some(e.to_string());
                }
            }
        }

        self.registry.delete(&record.id)?;
        log::info!("Execution {} removed from registry", record.id);

        match shutdown_error {
            Some(message) => Err(LaunchError::Shutdown {
                execution_id: record.id.clone(),
                message,
            }),
            None => Ok(()),
        }
    }

    /// Read the run log of a running or terminated execution.
    pub async fn fetch_run_log(&self, execution_id: &ExecutionId) -> Result<String, LaunchError> {
        let record = self
            .registry
            .get(execution_id)?
            .ok_or_else(|| LaunchError::ExecutionNotFound(execution_id.clone()))?;
        let handle = record.container_handle.as_ref().ok_or_else(|| {
            LaunchError::LogUnavailable(format!("execution {} has not started", record.id))
        })?;
        let artifact = self.load_artifact(&record.artifact_id)?;
        let container = self
            .engine
            .resolve_running(artifact.platform, handle)
            .await?
            .ok_or_else(|| {
                LaunchError::LogUnavailable(format!("container {} no longer exists", handle))
            })?;

        let staging = self.staging_dir()?;
        log::debug!(
            "Staging run log of {} in {}",
            container.identity(),
            staging.path().display()
        );
        let result = read_run_log(container.as_ref(), staging.path()).await;

        let staging_path = staging.path().to_path_buf();
        if let Err(e) = staging.close() {
            log::warn!(
                "Failed to remove staging directory {}: {}",
                staging_path.display(),
                e
            );
        }
        result
    }

    fn staging_dir(&self) -> Result<TempDir, LaunchError> {
        let mut builder = Builder::new();
        builder.prefix("run-log-");
        let dir = match &self.config.staging_dir {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    /// Started executions whose scheduled shutdown is at or before `now`.
    /// The expiry sweep calls `stop_execution` for each of them.
    pub fn expired_executions(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionRecord>, LaunchError> {
        Ok(self.registry.list_expired(now)?)
    }

    pub fn list_executions(&self) -> Result<Vec<ExecutionRecord>, LaunchError> {
        Ok(self.registry.list()?)
    }

    fn load_artifact(&self, artifact_id: &ArtifactId) -> Result<Artifact, LaunchError> {
        self.catalog
            .get(artifact_id)?
            .ok_or_else(|| LaunchError::ArtifactNotFound(artifact_id.clone()))
    }
}

/// Download, extract, and read the run log into `staging`.
async fn read_run_log(container: &dyn ContainerRef, staging: &Path) -> Result<String, LaunchError> {
    let log_path = container.run_log_path();
    let file_name = Path::new(&log_path)
        .file_name()
        .ok_or_else(|| LaunchError::LogUnavailable(format!("invalid log path {}", log_path)))?
        .to_os_string();

    let archive_path = staging.join("run-log.tar");
    container.download_archive(&log_path, &archive_path).await?;

    let extract_dir = staging.join("extracted");
    let unpack_dir = extract_dir.clone();
    tokio::task::spawn_blocking(move || unpack_archive(&archive_path, &unpack_dir))
        .await
        .map_err(|e| std::io::Error::new(ErrorKind::Other, e))??;

    match tokio::fs::read(extract_dir.join(&file_name)).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(LaunchError::LogUnavailable(format!(
            "{} not present in container archive",
            log_path
        ))),
        Err(e) => Err(e.into()),
    }
}

fn unpack_archive(archive_path: &Path, extract_dir: &Path) -> Result<(), LaunchError> {
    std::fs::create_dir_all(extract_dir)?;
    let mut archive = tar::Archive::new(File::open(archive_path)?);
    archive
        .unpack(extract_dir)
        .map_err(|e| LaunchError::LogUnavailable(format!("failed to extract archive: {}", e)))
}

/// Deletes a reservation unless disarmed. Covers both explicit compensation
/// and a start future that is dropped before it completes.
struct ReservationGuard<'a> {
    registry: &'a ExecutionRegistry,
    id: &'a ExecutionId,
    armed: bool,
}

impl<'a> ReservationGuard<'a> {
    fn new(registry: &'a ExecutionRegistry, id: &'a ExecutionId) -> Self {
        Self {
            registry,
            id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    fn compensate(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        match self.registry.delete(self.id) {
            Ok(_) => log::info!("Reservation {} released after failed start", self.id),
            Err(e) => log::error!("Failed to release reservation {}: {}", self.id, e),
        }
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        self.compensate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduled_shutdown_is_exact() {
        let t = DateTime::parse_from_rfc3339("2026-10-19T10:15:30.250Z")
            .unwrap()
            .with_timezone(&Utc);
        let expected = DateTime::parse_from_rfc3339("2026-10-19T10:45:30.250Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(RunConfig::from_minutes(30).shutdown_after(t), Some(expected));
    }

    #[test]
    fn test_diagnostic_status() {
        assert_eq!(
            diagnostic_status(RunnerFailureKind::Preparation),
            Some(BuildStatus::InitializationFailed)
        );
        assert_eq!(
            diagnostic_status(RunnerFailureKind::Compile),
            Some(BuildStatus::CompilationFailed)
        );
        assert_eq!(diagnostic_status(RunnerFailureKind::Run), None);
        assert_eq!(diagnostic_status(RunnerFailureKind::Unknown), None);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let registry = ExecutionRegistry::new(Database::open_in_memory().unwrap());
        let record = ExecutionRecord {
            id: ExecutionId::from("exec-guard"),
            artifact_id: ArtifactId::from("a"),
            operator_id: OperatorId::from("op"),
            engine_host_url: "http://localhost".to_string(),
            port: 20000,
            container_handle: None,
            started_at: None,
            scheduled_shutdown_at: None,
        };
        registry.run_serializable(|tx| tx.insert(&record)).unwrap();

        {
            let mut kept = ReservationGuard::new(&registry, &record.id);
            kept.disarm();
        }
        assert!(registry.get(&record.id).unwrap().is_some());

        {
            let _dropped = ReservationGuard::new(&registry, &record.id);
        }
        assert!(registry.get(&record.id).unwrap().is_none());
    }
}
