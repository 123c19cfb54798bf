//! Container engine client used to stop containers and read files out of
//! them.
//!
//! Starting containers belongs to the artifact runner; this side only deals
//! with containers that already exist.

use crate::core_types::{ContainerHandle, Platform};
use crate::errors::EngineError;
use async_trait::async_trait;
use std::path::Path;

pub mod docker;

pub use docker::DockerEngine;

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Look up a container by handle on the engine serving `platform`.
    /// Returns `None` when the engine no longer knows the container.
    async fn resolve_running(
        &self,
        platform: Platform,
        handle: &ContainerHandle,
    ) -> Result<Option<Box<dyn ContainerRef>>, EngineError>;
}

#[async_trait]
pub trait ContainerRef: Send + Sync {
    fn identity(&self) -> ContainerHandle;

    /// Absolute path of the run log inside the container.
    fn run_log_path(&self) -> String;

    /// Stop the container. Stopping a container that is already stopped or
    /// gone succeeds.
    async fn stop(&self) -> Result<(), EngineError>;

    /// Write the engine's tar archive of `path_in_container` to `dest`.
    async fn download_archive(&self, path_in_container: &str, dest: &Path)
        -> Result<(), EngineError>;
}
