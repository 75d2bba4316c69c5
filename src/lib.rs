//! volagent - Host-side Volume Agent
//!
//! The agent that attaches a container host to the volmaster control plane.
//! It serves the runtime's volume-plugin verbs on a local Unix socket,
//! resolves symbolic volume names against cluster state, drives pluggable
//! storage backends, and holds heartbeated use leases so a read-write
//! volume is attached to at most one host at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    container runtime                         │
//! │        POST /VolumeDriver.* over volplugin.sock              │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//! ┌──────────────────────────────┴───────────────────────────────┐
//! │                          Agent                               │
//! │  ┌──────────────┐  ┌────────────────┐  ┌──────────────────┐  │
//! │  │ Plugin RPC   │  │ Mount Registry │  │   Reconciler     │  │
//! │  │  (axum/UDS)  │  │ refcounts +    │  │ startup mount    │  │
//! │  │              │  │ stop channels  │  │ rediscovery      │  │
//! │  └──────┬───────┘  └───────┬────────┘  └────────┬─────────┘  │
//! │         │                  │                    │            │
//! │  ┌──────┴──────────────────┴────────────────────┴─────────┐  │
//! │  │     Driver Registry → Mount / CRUD / Snapshot          │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ HTTP: volumes, leases, heartbeats
//! ┌──────────────────────────────┴───────────────────────────────┐
//! │                         volmaster                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`agent`]: verb semantics, plugin server, reconciler, mount registry
//! - [`domain`]: data model and the storage driver contract
//! - [`driver`]: backend name → driver constructor registry
//! - [`master`]: volmaster HTTP client and lease heartbeats
//! - [`error`]: error types and handling

pub mod agent;
pub mod domain;
pub mod driver;
pub mod error;
pub mod master;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use agent::registry::{AcquireOutcome, MountBarrier, MountRegistry};
pub use agent::server::{PluginServer, SOCKET_NAME};
pub use agent::{Agent, VolumeListing};
pub use domain::{
    CrudDriver, DriverOptions, FsOptions, GlobalConfig, ListOptions, MountDriver, MountRecord,
    RuntimeOptions, SnapshotDriver, UseLease, Volume, VolumeBackends, VolumeName,
};
pub use driver::DriverRegistry;
pub use error::{Error, Result};
pub use master::MasterClient;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
