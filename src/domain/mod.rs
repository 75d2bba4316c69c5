//! Core domain types and the storage driver contract

pub mod ports;
pub mod types;

pub use ports::{
    CrudDriver, CrudDriverRef, DriverOptions, FsOptions, ListOptions, MountDriver, MountDriverRef,
    MountRecord, SnapshotDriver, SnapshotDriverRef,
};
pub use types::{
    GlobalConfig, RateLimit, RuntimeOptions, UseLease, Volume, VolumeBackends, VolumeName,
    REASON_MOUNT, UNLOCKED_HOST,
};
