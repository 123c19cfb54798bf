//! Artifact metadata consumed by launch validation.
//!
//! The owning system of submissions keeps the authoritative copy; the manager
//! only reads task type, build status, and platform, and writes back
//! diagnostics when the runner reports a preparation or compile failure.

use super::Database;
use crate::core_types::{Artifact, ArtifactId, BuildStatus, TaskType};
use crate::errors::RegistryError;
use rusqlite::{params, OptionalExtension};

pub trait ArtifactCatalog: Send + Sync {
    fn get(&self, id: &ArtifactId) -> Result<Option<Artifact>, RegistryError>;

    /// Persist captured runner output and the resulting status on the artifact.
    fn record_diagnostics(
        &self,
        id: &ArtifactId,
        status: BuildStatus,
        message: &str,
    ) -> Result<(), RegistryError>;
}

#[derive(Clone)]
pub struct SqliteArtifactCatalog {
    db: Database,
}

impl SqliteArtifactCatalog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace an artifact.
    pub fn register(&self, artifact: &Artifact) -> Result<(), RegistryError> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO artifacts (id, task_type, build_status, platform, image, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
               task_type = excluded.task_type,
               build_status = excluded.build_status,
               platform = excluded.platform,
               image = excluded.image,
               error_message = excluded.error_message",
            params![
                artifact.id.0,
                artifact.task_type.as_str(),
                artifact.build_status.as_str(),
                artifact.platform.as_str(),
                artifact.image,
                artifact.error_message,
            ],
        )?;
        Ok(())
    }
}

impl ArtifactCatalog for SqliteArtifactCatalog {
    fn get(&self, id: &ArtifactId) -> Result<Option<Artifact>, RegistryError> {
        let conn = self.db.lock()?;
        let row = conn
            .query_row(
                "SELECT task_type, build_status, platform, image, error_message
                 FROM artifacts WHERE id = ?1",
                params![id.0],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((task_type, build_status, platform, image, error_message)) = row else {
            return Ok(None);
        };
        Ok(Some(Artifact {
            id: id.clone(),
            task_type: task_type.parse::<TaskType>().map_err(RegistryError::Corrupt)?,
            build_status: build_status
                .parse::<BuildStatus>()
                .map_err(RegistryError::Corrupt)?,
            platform: platform.parse().map_err(RegistryError::Corrupt)?,
            image,
            error_message,
        }))
    }

    fn record_diagnostics(
        &self,
        id: &ArtifactId,
        status: BuildStatus,
        message: &str,
    ) -> Result<(), RegistryError> {
        let conn = self.db.lock()?;
        let updated = conn.execute(
            "UPDATE artifacts SET build_status = ?2, error_message = ?3 WHERE id = ?1",
            params![id.0, status.as_str(), message],
        )?;
        if updated == 0 {
            return Err(RegistryError::NotFound(format!("artifact {}", id)));
        }
        Ok(())
    }
}
