//! Storage driver contract
//!
//! A backend advertises a stable name and implements any subset of three
//! capability groups: mounting, volume CRUD, and snapshots. Operations are
//! blocking from the caller's perspective and idempotent where the contract
//! says so; the agent serializes calls per volume, not per driver.

use crate::domain::types::Volume;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Driver Call Options
// =============================================================================

/// Filesystem creation parameters. `create_command` is a shell template in
/// which `%` stands for the device path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsOptions {
    pub fs_type: String,
    pub create_command: String,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            fs_type: "ext4".to_string(),
            create_command: "mkfs.ext4 -m0 %".to_string(),
        }
    }
}

/// The keystone value passed to every driver operation.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub volume: Volume,
    pub fs: FsOptions,
    pub timeout: Duration,
    /// Extra options beyond the volume's own parameters.
    pub options: BTreeMap<String, String>,
}

/// Filter for [`CrudDriver::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub params: BTreeMap<String, String>,
}

/// The result of a mount operation, and the shape of reconciliation scans.
/// `volume_name` is the raw name the driver derived from the mountpoint;
/// the agent parses and validates it.
#[derive(Debug, Clone)]
pub struct MountRecord {
    pub device: String,
    pub path: String,
    pub dev_major: u32,
    pub dev_minor: u32,
    pub volume_name: String,
}

// =============================================================================
// Capability Traits
// =============================================================================

/// Mount capability: attach and detach volumes on this host.
#[async_trait]
pub trait MountDriver: Send + Sync {
    /// Stable backend name.
    fn name(&self) -> &str;

    /// Mount a volume. Mounting a device already mounted at the expected
    /// path succeeds and returns the existing record.
    async fn mount(&self, opts: &DriverOptions) -> Result<MountRecord>;

    /// Unmount a volume. Unmounting an unmounted device is a no-op success.
    async fn unmount(&self, opts: &DriverOptions) -> Result<()>;

    /// Kernel-visible mounts owned by this system, used solely for
    /// reconciliation. Must not mutate state.
    async fn mounted(&self, timeout: Duration) -> Result<Vec<MountRecord>>;

    /// The path at which the volume mounts. Pure in its inputs and stable
    /// across process restarts.
    fn mount_path(&self, opts: &DriverOptions) -> Result<PathBuf>;
}

/// CRUD capability: create, format, destroy, and enumerate volumes on the
/// backend.
#[async_trait]
pub trait CrudDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Create a volume. Creating an existing volume returns
    /// [`crate::error::Error::VolumeExists`] rather than overwriting.
    async fn create(&self, opts: &DriverOptions) -> Result<()>;

    /// Lay a filesystem onto a created volume.
    async fn format(&self, opts: &DriverOptions) -> Result<()>;

    /// Destroy a volume. Destroying a missing volume is an error.
    async fn destroy(&self, opts: &DriverOptions) -> Result<()>;

    /// List volumes, optionally scoped by storage parameters.
    async fn list(&self, opts: &ListOptions) -> Result<Vec<Volume>>;

    /// Whether the volume exists on the backend.
    async fn exists(&self, opts: &DriverOptions) -> Result<bool>;
}

/// Snapshot capability.
#[async_trait]
pub trait SnapshotDriver: Send + Sync {
    fn name(&self) -> &str;

    async fn create_snapshot(&self, snapshot: &str, opts: &DriverOptions) -> Result<()>;

    async fn remove_snapshot(&self, snapshot: &str, opts: &DriverOptions) -> Result<()>;

    async fn list_snapshots(&self, opts: &DriverOptions) -> Result<Vec<String>>;

    /// Copy a snapshot into a new volume.
    async fn copy_snapshot(
        &self,
        opts: &DriverOptions,
        snapshot: &str,
        new_volume: &str,
    ) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type MountDriverRef = Arc<dyn MountDriver>;
pub type CrudDriverRef = Arc<dyn CrudDriver>;
pub type SnapshotDriverRef = Arc<dyn SnapshotDriver>;
