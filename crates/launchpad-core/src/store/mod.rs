//! SQLite persistence for execution records and artifact metadata.
//!
//! One `Database` handle is shared by the execution registry and the
//! artifact catalog. Writes that must be atomic with respect to concurrent
//! requests go through `ExecutionRegistry::run_serializable`.

pub mod artifacts;
pub mod registry;

pub use artifacts::{ArtifactCatalog, SqliteArtifactCatalog};
pub use registry::{ExecutionRegistry, RegistryTx};

use crate::errors::RegistryError;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                RegistryError::Database(format!(
                    "create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        log::debug!("Opened registry database {}", path.display());
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, RegistryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, RegistryError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    fn ensure_schema(&self) -> Result<(), RegistryError> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
              id TEXT PRIMARY KEY,
              artifact_id TEXT NOT NULL,
              operator_id TEXT NOT NULL,
              engine_host_url TEXT NOT NULL,
              port INTEGER NOT NULL,
              container_handle TEXT NULL,
              started_at_ms INTEGER NULL,
              scheduled_shutdown_at_ms INTEGER NULL,
              created_at_ms INTEGER NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_executions_host_port
              ON executions(engine_host_url, port);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_executions_artifact_operator
              ON executions(artifact_id, operator_id);
            CREATE INDEX IF NOT EXISTS idx_executions_shutdown
              ON executions(scheduled_shutdown_at_ms);
            CREATE TABLE IF NOT EXISTS artifacts (
              id TEXT PRIMARY KEY,
              task_type TEXT NOT NULL,
              build_status TEXT NOT NULL,
              platform TEXT NOT NULL,
              image TEXT NOT NULL,
              error_message TEXT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, RegistryError> {
        self.conn.lock().map_err(|_| RegistryError::LockPoisoned)
    }
}

pub(crate) fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(crate) fn ms_to_dt(ms: i64, column: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(column, ms))
}
