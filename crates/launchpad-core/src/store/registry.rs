//! Execution registry: the source of truth for which ports and
//! (artifact, operator) slots are in use.

use super::{dt_to_ms, ms_to_dt, Database};
use crate::core_types::{ArtifactId, ContainerHandle, ExecutionId, ExecutionRecord, OperatorId};
use crate::errors::RegistryError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::BTreeSet;

const RECORD_COLUMNS: &str = "id, artifact_id, operator_id, engine_host_url, port, \
     container_handle, started_at_ms, scheduled_shutdown_at_ms";

#[derive(Clone)]
pub struct ExecutionRegistry {
    db: Database,
}

impl ExecutionRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Run `f` inside one serializable transaction and commit when it
    /// returns `Ok`. The write lock is taken up front, so the reads inside
    /// `f` cannot be invalidated by a concurrent writer before commit. A
    /// writer that cannot obtain the lock within the busy timeout fails with
    /// `RegistryError::Conflict`.
    pub fn run_serializable<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&RegistryTx<'_>) -> Result<T, E>,
        E: From<RegistryError>,
    {
        let mut conn = self.db.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(RegistryError::from)?;
        let value = f(&RegistryTx { conn: &tx })?;
        tx.commit().map_err(RegistryError::from)?;
        Ok(value)
    }

    pub fn get(&self, id: &ExecutionId) -> Result<Option<ExecutionRecord>, RegistryError> {
        let conn = self.db.lock()?;
        RegistryTx { conn: &conn }.get(id)
    }

    pub fn find_active(
        &self,
        artifact_id: &ArtifactId,
        operator_id: &OperatorId,
    ) -> Result<Option<ExecutionRecord>, RegistryError> {
        let conn = self.db.lock()?;
        RegistryTx { conn: &conn }.find_active(artifact_id, operator_id)
    }

    pub fn list(&self) -> Result<Vec<ExecutionRecord>, RegistryError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM executions ORDER BY created_at_ms, id",
            RECORD_COLUMNS
        ))?;
        let rows = stmt.query_map([], map_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Started records whose scheduled shutdown is at or before `now`.
    pub fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionRecord>, RegistryError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM executions
             WHERE scheduled_shutdown_at_ms IS NOT NULL AND scheduled_shutdown_at_ms <= ?1
             ORDER BY scheduled_shutdown_at_ms",
            RECORD_COLUMNS
        ))?;
        let rows = stmt.query_map(params![dt_to_ms(now)], map_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Attach the container handle and timing metadata to a reservation.
    /// This is the only mutation a record ever sees.
    pub fn activate(
        &self,
        id: &ExecutionId,
        handle: &ContainerHandle,
        started_at: DateTime<Utc>,
        scheduled_shutdown_at: DateTime<Utc>,
    ) -> Result<ExecutionRecord, RegistryError> {
        let conn = self.db.lock()?;
        let updated = conn.execute(
            "UPDATE executions
             SET container_handle = ?2, started_at_ms = ?3, scheduled_shutdown_at_ms = ?4
             WHERE id = ?1 AND container_handle IS NULL",
            params![
                id.0,
                handle.0,
                dt_to_ms(started_at),
                dt_to_ms(scheduled_shutdown_at)
            ],
        )?;
        if updated == 0 {
            return Err(RegistryError::NotFound(format!("reservation {}", id)));
        }
        RegistryTx { conn: &conn }
            .get(id)?
            .ok_or_else(|| RegistryError::NotFound(format!("execution {}", id)))
    }

    /// Delete a record inside a serializable transaction. Returns whether a
    /// row was removed.
    pub fn delete(&self, id: &ExecutionId) -> Result<bool, RegistryError> {
        self.run_serializable(|tx| tx.delete(id))
    }
}

/// Registry operations available inside a serializable transaction.
pub struct RegistryTx<'a> {
    conn: &'a Connection,
}

impl RegistryTx<'_> {
    pub fn get(&self, id: &ExecutionId) -> Result<Option<ExecutionRecord>, RegistryError> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {} FROM executions WHERE id = ?1", RECORD_COLUMNS),
                params![id.0],
                map_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn find_active(
        &self,
        artifact_id: &ArtifactId,
        operator_id: &OperatorId,
    ) -> Result<Option<ExecutionRecord>, RegistryError> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM executions WHERE artifact_id = ?1 AND operator_id = ?2",
                    RECORD_COLUMNS
                ),
                params![artifact_id.0, operator_id.0],
                map_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Ports held by any record (reserved or started) on `engine_host_url`.
    pub fn held_ports(&self, engine_host_url: &str) -> Result<BTreeSet<u16>, RegistryError> {
        let mut stmt = self
            .conn
            .prepare("SELECT port FROM executions WHERE engine_host_url = ?1")?;
        let rows = stmt.query_map(params![engine_host_url], |row| {
            let port: i64 = row.get(0)?;
            u16::try_from(port).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(0, port))
        })?;
        Ok(rows.collect::<Result<BTreeSet<_>, _>>()?)
    }

    pub fn insert(&self, record: &ExecutionRecord) -> Result<(), RegistryError> {
        self.conn.execute(
            "INSERT INTO executions (id, artifact_id, operator_id, engine_host_url, port,
               container_handle, started_at_ms, scheduled_shutdown_at_ms, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id.0,
                record.artifact_id.0,
                record.operator_id.0,
                record.engine_host_url,
                i64::from(record.port),
                record.container_handle.as_ref().map(|h| h.0.clone()),
                record.started_at.map(dt_to_ms),
                record.scheduled_shutdown_at.map(dt_to_ms),
                dt_to_ms(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn delete(&self, id: &ExecutionId) -> Result<bool, RegistryError> {
        let deleted = self
            .conn
            .execute("DELETE FROM executions WHERE id = ?1", params![id.0])?;
        Ok(deleted > 0)
    }
}

fn map_record(row: &Row<'_>) -> Result<ExecutionRecord, rusqlite::Error> {
    let port: i64 = row.get(4)?;
    let started_at: Option<i64> = row.get(6)?;
    let scheduled_shutdown_at: Option<i64> = row.get(7)?;
    Ok(ExecutionRecord {
        id: ExecutionId(row.get(0)?),
        artifact_id: ArtifactId(row.get(1)?),
        operator_id: OperatorId(row.get(2)?),
        engine_host_url: row.get(3)?,
        port: u16::try_from(port).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(4, port))?,
        container_handle: row.get::<_, Option<String>>(5)?.map(ContainerHandle),
        started_at: started_at.map(|ms| ms_to_dt(ms, 6)).transpose()?,
        scheduled_shutdown_at: scheduled_shutdown_at.map(|ms| ms_to_dt(ms, 7)).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reservation(id: &str, artifact: &str, host: &str, port: u16) -> ExecutionRecord {
        ExecutionRecord {
            id: ExecutionId::from(id),
            artifact_id: ArtifactId::from(artifact),
            operator_id: OperatorId::from("op-1"),
            engine_host_url: host.to_string(),
            port,
            container_handle: None,
            started_at: None,
            scheduled_shutdown_at: None,
        }
    }

    fn registry() -> ExecutionRegistry {
        ExecutionRegistry::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_insert_activate_delete() {
        let registry = registry();
        let record = reservation("exec-1", "a-1", "http://localhost", 20000);
        registry
            .run_serializable(|tx| tx.insert(&record))
            .unwrap();

        let stored = registry.get(&record.id).unwrap().unwrap();
        assert!(stored.is_reservation());

        let started = DateTime::from_timestamp_millis(1_760_000_000_000).unwrap();
        let shutdown = started + Duration::minutes(30);
        let activated = registry
            .activate(&record.id, &ContainerHandle("c0ffee".to_string()), started, shutdown)
            .unwrap();
        assert_eq!(activated.container_handle, Some(ContainerHandle("c0ffee".to_string())));
        assert_eq!(activated.started_at, Some(started));
        assert_eq!(activated.scheduled_shutdown_at, Some(shutdown));

        // A record is activated at most once.
        let again = registry.activate(&record.id, &ContainerHandle("other".to_string()), started, shutdown);
        assert!(matches!(again, Err(RegistryError::NotFound(_))));

        assert!(registry.delete(&record.id).unwrap());
        assert!(!registry.delete(&record.id).unwrap());
        assert!(registry.get(&record.id).unwrap().is_none());
    }

    #[test]
    fn test_held_ports_scoped_by_host() {
        let registry = registry();
        registry
            .run_serializable(|tx| {
                tx.insert(&reservation("e1", "a-1", "http://localhost", 20000))?;
                tx.insert(&reservation("e2", "a-2", "http://localhost", 20002))?;
                tx.insert(&reservation("e3", "a-3", "http://203.0.113.5", 20001))
            })
            .unwrap();

        let held = registry
            .run_serializable(|tx| tx.held_ports("http://localhost"))
            .unwrap();
        assert_eq!(held.into_iter().collect::<Vec<_>>(), vec![20000, 20002]);
    }

    #[test]
    fn test_duplicate_port_rejected_by_storage() {
        let registry = registry();
        registry
            .run_serializable(|tx| tx.insert(&reservation("e1", "a-1", "http://localhost", 20000)))
            .unwrap();
        let err = registry
            .run_serializable(|tx| tx.insert(&reservation("e2", "a-2", "http://localhost", 20000)))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Constraint(_)));
    }

    #[test]
    fn test_failed_closure_rolls_back() {
        let registry = registry();
        let result: Result<(), RegistryError> = registry.run_serializable(|tx| {
            tx.insert(&reservation("e1", "a-1", "http://localhost", 20000))?;
            Err(RegistryError::Database("abort".to_string()))
        });
        assert!(result.is_err());
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_expired() {
        let registry = registry();
        let t0 = DateTime::from_timestamp_millis(1_760_000_000_000).unwrap();
        registry
            .run_serializable(|tx| {
                tx.insert(&reservation("e1", "a-1", "http://localhost", 20000))?;
                tx.insert(&reservation("e2", "a-2", "http://localhost", 20001))?;
                tx.insert(&reservation("e3", "a-3", "http://localhost", 20002))
            })
            .unwrap();
        let handle = ContainerHandle("c".to_string());
        registry
            .activate(&ExecutionId::from("e1"), &handle, t0, t0 + Duration::minutes(10))
            .unwrap();
        registry
            .activate(&ExecutionId::from("e2"), &handle, t0, t0 + Duration::minutes(60))
            .unwrap();

        let expired = registry.list_expired(t0 + Duration::minutes(10)).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, ExecutionId::from("e1"));
        assert_eq!(registry.list().unwrap().len(), 3);
    }
}
