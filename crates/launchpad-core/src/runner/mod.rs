//! Artifact runners start a submitted artifact as a container listening on
//! a reserved host port.
//!
//! Building and compiling submissions is owned by whatever produces the
//! runnable image; the manager only needs the contract below and the failure
//! classification carried by `RunnerError`.

use crate::core_types::{Artifact, ContainerHandle};
use crate::errors::RunnerError;
use async_trait::async_trait;

pub mod docker;

pub use docker::DockerImageRunner;

#[async_trait]
pub trait ArtifactRunner: Send + Sync {
    /// Start `artifact` with its web port bound to `port` on the engine host.
    async fn run(&self, artifact: &Artifact, port: u16) -> Result<ContainerHandle, RunnerError>;
}
