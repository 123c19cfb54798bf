//! Domain types shared by the allocator, registry, engine, and manager.

use crate::errors::PreparationReason;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn generate() -> Self {
        Self(format!("exec-{}", Uuid::new_v4()))
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub String);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperatorId(pub String);

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperatorId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Engine-assigned identity of a container (its id or name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerHandle(pub String);

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Target OS/platform of an artifact. Each platform has its own engine
/// endpoint and port pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Windows => "windows",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linux" => Ok(Platform::Linux),
            "windows" => Ok(Platform::Windows),
            other => Err(format!("unknown platform '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Sandboxed web application, the only type that can be launched.
    WebApp,
    Console,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::WebApp => "web_app",
            TaskType::Console => "console",
        }
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web_app" | "web-app" | "webapp" => Ok(TaskType::WebApp),
            "console" => Ok(TaskType::Console),
            other => Err(format!("unknown task type '{}'", other)),
        }
    }
}

/// Last known build/test status of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    NotBuilt,
    Built,
    CompilationFailed,
    InitializationFailed,
    ExecutionFailed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::NotBuilt => "not_built",
            BuildStatus::Built => "built",
            BuildStatus::CompilationFailed => "compilation_failed",
            BuildStatus::InitializationFailed => "initialization_failed",
            BuildStatus::ExecutionFailed => "execution_failed",
        }
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_built" => Ok(BuildStatus::NotBuilt),
            "built" => Ok(BuildStatus::Built),
            "compilation_failed" => Ok(BuildStatus::CompilationFailed),
            "initialization_failed" => Ok(BuildStatus::InitializationFailed),
            "execution_failed" => Ok(BuildStatus::ExecutionFailed),
            other => Err(format!("unknown build status '{}'", other)),
        }
    }
}

/// Read-only view of a submitted artifact, as far as launching is concerned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub task_type: TaskType,
    pub build_status: BuildStatus,
    pub platform: Platform,
    /// Image reference the runner starts.
    pub image: String,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// One row per active (or transiently reserved) execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub artifact_id: ArtifactId,
    pub operator_id: OperatorId,
    pub engine_host_url: String,
    pub port: u16,
    pub container_handle: Option<ContainerHandle>,
    pub started_at: Option<DateTime<Utc>>,
    pub scheduled_shutdown_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// A record without a container handle only claims a port.
    pub fn is_reservation(&self) -> bool {
        self.container_handle.is_none()
    }

    pub fn descriptor(&self) -> Option<ExecutionDescriptor> {
        Some(ExecutionDescriptor {
            id: self.id.clone(),
            port: self.port,
            engine_host_url: self.engine_host_url.clone(),
            started_at: self.started_at?,
            scheduled_shutdown_at: self.scheduled_shutdown_at?,
        })
    }
}

/// What callers learn about a successfully started execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDescriptor {
    pub id: ExecutionId,
    pub port: u16,
    pub engine_host_url: String,
    pub started_at: DateTime<Utc>,
    pub scheduled_shutdown_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    pub run_interval: Duration,
}

impl RunConfig {
    /// Panics when `minutes` is out of range for a `Duration`; use
    /// `try_from_minutes` for untrusted input.
    pub fn from_minutes(minutes: i64) -> Self {
        Self {
            run_interval: Duration::minutes(minutes),
        }
    }

    pub fn try_from_minutes(minutes: i64) -> Result<Self, PreparationReason> {
        match Duration::try_minutes(minutes) {
            Some(run_interval) if run_interval > Duration::zero() => Ok(Self { run_interval }),
            _ => Err(PreparationReason::InvalidRunInterval),
        }
    }

    /// When an execution started at `started_at` is due to shut down, or
    /// `None` if the interval is not positive or the sum leaves chrono's range.
    pub fn shutdown_after(&self, started_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.run_interval <= Duration::zero() {
            return None;
        }
        started_at.checked_add_signed(self.run_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(handle: Option<&str>) -> ExecutionRecord {
        let now = Utc::now();
        ExecutionRecord {
            id: ExecutionId::from("exec-1"),
            artifact_id: ArtifactId::from("a-1"),
            operator_id: OperatorId::from("op-1"),
            engine_host_url: "http://localhost".to_string(),
            port: 20000,
            container_handle: handle.map(|h| ContainerHandle(h.to_string())),
            started_at: handle.map(|_| now),
            scheduled_shutdown_at: handle.map(|_| now + Duration::minutes(30)),
        }
    }

    #[test]
    fn test_reservation_has_no_descriptor() {
        let reservation = record(None);
        assert!(reservation.is_reservation());
        assert!(reservation.descriptor().is_none());
    }

    #[test]
    fn test_started_record_descriptor() {
        let started = record(Some("c0ffee"));
        let descriptor = started.descriptor().unwrap();
        assert_eq!(descriptor.port, 20000);
        assert_eq!(descriptor.engine_host_url, "http://localhost");
        assert_eq!(
            descriptor.scheduled_shutdown_at - descriptor.started_at,
            Duration::minutes(30)
        );
    }

    #[test]
    fn test_run_interval_bounds() {
        assert_eq!(
            RunConfig::try_from_minutes(30).unwrap().run_interval,
            Duration::minutes(30)
        );
        assert_eq!(
            RunConfig::try_from_minutes(0),
            Err(PreparationReason::InvalidRunInterval)
        );
        assert_eq!(
            RunConfig::try_from_minutes(-5),
            Err(PreparationReason::InvalidRunInterval)
        );
        assert_eq!(
            RunConfig::try_from_minutes(i64::MAX),
            Err(PreparationReason::InvalidRunInterval)
        );
    }

    #[test]
    fn test_shutdown_after_overflow() {
        let now = Utc::now();
        let far = RunConfig {
            run_interval: Duration::days(365 * 300_000),
        };
        assert!(far.shutdown_after(now).is_none());

        let negative = RunConfig {
            run_interval: Duration::minutes(-1),
        };
        assert!(negative.shutdown_after(now).is_none());

        let usual = RunConfig::from_minutes(30);
        assert_eq!(usual.shutdown_after(now), Some(now + Duration::minutes(30)));
    }

    #[test]
    fn test_enum_string_forms() {
        assert_eq!("Linux".parse::<Platform>().unwrap(), Platform::Linux);
        assert!("solaris".parse::<Platform>().is_err());
        assert_eq!("web-app".parse::<TaskType>().unwrap(), TaskType::WebApp);
        assert!("compiling".parse::<BuildStatus>().is_err());
    }
}
