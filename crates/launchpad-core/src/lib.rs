//! Lifecycle management for ephemeral, sandboxed web-application executions.
//!
//! An execution is a submitted artifact running inside a container on a
//! container engine, reachable on a host port claimed from a configured pool
//! for a limited, supervised time. This crate owns the hard parts of that
//! lifecycle:
//!
//! - **Port allocation**: claiming a unique host port per engine host under
//!   serializable isolation, so concurrent launches never share a port
//! - **Provisioning**: driving an artifact runner to start the container and
//!   compensating (deleting the reservation) when any step fails
//! - **Shutdown**: stopping the container and always removing the record
//! - **Diagnostics**: pulling the run log out of a container through a
//!   staging directory that is removed on every exit path
//!
//! Authentication, HTTP routing, and the build pipeline that produces a
//! runnable image live outside this crate and are consumed through traits.

pub mod allocator;
pub mod config;
pub mod core_types;
pub mod engine;
pub mod errors;
pub mod host;
pub mod manager;
pub mod messages;
pub mod runner;
pub mod store;

pub use allocator::PortAllocator;
pub use config::*;
pub use core_types::*;
pub use engine::{ContainerEngine, ContainerRef};
pub use errors::LaunchError;
pub use manager::{Clock, LifecycleManager, SystemClock};
pub use messages::Locale;
pub use runner::ArtifactRunner;
pub use store::{ArtifactCatalog, Database, ExecutionRegistry, SqliteArtifactCatalog};
