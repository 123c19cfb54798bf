//! Error types for the execution lifecycle.
//!
//! `LaunchError` is what callers of the manager see. It is classified by the
//! phase in which the failure happened: before any external start attempt
//! (`Preparation`), after a port was reserved and the runner failed
//! (`Startup`), or while stopping a container (`Shutdown`). The lower-level
//! enums below carry the details of the collaborator that failed and convert
//! into `LaunchError` with `?`.

use crate::core_types::{ArtifactId, ExecutionId, Platform};
use std::fmt;
use thiserror::Error;

/// Why a launch was refused before any external start attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreparationReason {
    #[error("an instance is already running or scheduled for this artifact")]
    AlreadyRunning,
    #[error("the artifact is not a web application")]
    NotWebApp,
    #[error("the artifact failed to compile")]
    CompilationFailed,
    #[error("platform '{0}' is not supported")]
    PlatformNotSupported(Platform),
    #[error("all ports reserved at the moment")]
    NoPortsAvailable,
    #[error("the run interval must be positive and end within the supported time range")]
    InvalidRunInterval,
}

/// Classification reported by an artifact runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerFailureKind {
    Preparation,
    Compile,
    Run,
    Unknown,
}

impl fmt::Display for RunnerFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunnerFailureKind::Preparation => "preparation",
            RunnerFailureKind::Compile => "compile",
            RunnerFailureKind::Run => "run",
            RunnerFailureKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

// Error produced by an ArtifactRunner
#[derive(Error, Debug, Clone)]
#[error("{kind} failure with exit code {exit_code:?}:\nStdout: {stdout}\nStderr: {stderr}")]
pub struct RunnerError {
    pub kind: RunnerFailureKind,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
}

impl RunnerError {
    pub fn new(kind: RunnerFailureKind, stderr: impl Into<String>) -> Self {
        Self {
            kind,
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: None,
        }
    }

    pub fn with_exit_code(mut self, exit_code: i64) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// Stdout and stderr joined the way they are stored on the artifact.
    pub fn captured_output(&self) -> String {
        let mut output = String::new();
        if let Some(code) = self.exit_code {
            output.push_str(&format!("exit code: {}\n", code));
        }
        if !self.stdout.is_empty() {
            output.push_str(&self.stdout);
            if !self.stdout.ends_with('\n') {
                output.push('\n');
            }
        }
        output.push_str(&self.stderr);
        output
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    /// A concurrent serializable transaction held the database.
    #[error("registry transaction conflict: {0}")]
    Conflict(String),
    #[error("registry constraint violated: {0}")]
    Constraint(String),
    #[error("registry database error: {0}")]
    Database(String),
    #[error("{0} not found in registry")]
    NotFound(String),
    #[error("corrupt registry row: {0}")]
    Corrupt(String),
    #[error("registry lock poisoned")]
    LockPoisoned,
}

impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match &err {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    RegistryError::Conflict(err.to_string())
                }
                ErrorCode::ConstraintViolation => RegistryError::Constraint(err.to_string()),
                _ => RegistryError::Database(err.to_string()),
            },
            _ => RegistryError::Database(err.to_string()),
        }
    }
}

// Specific error for the container engine client
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Bollard (Docker client) error: {0}")]
    BollardError(#[from] bollard::errors::Error),
    #[error("no container engine configured for platform '{0}'")]
    NotConfigured(Platform),
    #[error("invalid engine endpoint '{0}'")]
    InvalidEndpoint(String),
    #[error("I/O error during engine operation: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to parse YAML config: {0}")]
    Parse(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Preparation failed: {0}")]
    Preparation(#[from] PreparationReason),
    #[error("Startup failed during {kind} with exit code {exit_code:?}")]
    Startup {
        kind: RunnerFailureKind,
        exit_code: Option<i64>,
        output: String,
    },
    #[error("Shutdown of execution {execution_id} failed: {message}")]
    Shutdown {
        execution_id: ExecutionId,
        message: String,
    },
    #[error("Execution {0} not found")]
    ExecutionNotFound(ExecutionId),
    #[error("Artifact {0} not found")]
    ArtifactNotFound(ArtifactId),
    #[error("Run log unavailable: {0}")]
    LogUnavailable(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("Container engine error: {0}")]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LaunchError {
    /// Whether the caller can reasonably retry or change inputs.
    pub fn is_recoverable(&self) -> bool {
        match self {
            LaunchError::Preparation(_) => true,
            LaunchError::Registry(RegistryError::Conflict(_)) => true,
            _ => false,
        }
    }

    pub fn runner_failure_kind(&self) -> Option<RunnerFailureKind> {
        match self {
            LaunchError::Startup { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<RunnerError> for LaunchError {
    fn from(err: RunnerError) -> Self {
        LaunchError::Startup {
            kind: err.kind,
            exit_code: err.exit_code,
            output: err.captured_output(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_error_captured_output() {
        let err = RunnerError::new(RunnerFailureKind::Compile, "error[E0425]: unresolved name")
            .with_stdout("Compiling app")
            .with_exit_code(101);
        assert_eq!(
            err.captured_output(),
            "exit code: 101\nCompiling app\nerror[E0425]: unresolved name"
        );

        let launch: LaunchError = err.into();
        assert_eq!(launch.runner_failure_kind(), Some(RunnerFailureKind::Compile));
        assert!(!launch.is_recoverable());
    }

    #[test]
    fn test_busy_database_is_conflict() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let registry: RegistryError = err.into();
        assert!(matches!(registry, RegistryError::Conflict(_)));
        assert!(LaunchError::from(registry).is_recoverable());
    }

    #[test]
    fn test_preparation_is_recoverable() {
        let err = LaunchError::from(PreparationReason::NoPortsAvailable);
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "Preparation failed: all ports reserved at the moment"
        );
    }
}
