//! Driver registry
//!
//! Maps backend names to constructors for the three capability groups.
//! Backends register during startup, before the plugin socket is bound;
//! afterwards the registry is only read. Mount-driver constructors take the
//! mount root because it comes from the mutable global configuration and a
//! driver instance is built per use.

#[cfg(test)]
pub(crate) mod testing;

use crate::domain::ports::{CrudDriverRef, MountDriverRef, SnapshotDriverRef};
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Constructor for a mount driver, given the current mount root.
pub type MountDriverCtor = Box<dyn Fn(&str) -> MountDriverRef + Send + Sync>;

/// Constructor for a CRUD driver.
pub type CrudDriverCtor = Box<dyn Fn() -> CrudDriverRef + Send + Sync>;

/// Constructor for a snapshot driver.
pub type SnapshotDriverCtor = Box<dyn Fn() -> SnapshotDriverRef + Send + Sync>;

/// Process-wide backend registry.
#[derive(Default)]
pub struct DriverRegistry {
    mount: HashMap<String, MountDriverCtor>,
    crud: HashMap<String, CrudDriverCtor>,
    snapshot: HashMap<String, SnapshotDriverCtor>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_mount(&mut self, backend: impl Into<String>, ctor: MountDriverCtor) {
        self.mount.insert(backend.into(), ctor);
    }

    pub fn register_crud(&mut self, backend: impl Into<String>, ctor: CrudDriverCtor) {
        self.crud.insert(backend.into(), ctor);
    }

    pub fn register_snapshot(&mut self, backend: impl Into<String>, ctor: SnapshotDriverCtor) {
        self.snapshot.insert(backend.into(), ctor);
    }

    /// Construct the named mount driver rooted at `mount_root`.
    pub fn mount_driver(&self, backend: &str, mount_root: &str) -> Result<MountDriverRef> {
        match self.mount.get(backend) {
            Some(ctor) => Ok(ctor(mount_root)),
            None => Err(Error::BackendUnknown {
                backend: backend.to_string(),
            }),
        }
    }

    pub fn crud_driver(&self, backend: &str) -> Result<CrudDriverRef> {
        match self.crud.get(backend) {
            Some(ctor) => Ok(ctor()),
            None => Err(Error::BackendUnknown {
                backend: backend.to_string(),
            }),
        }
    }

    pub fn snapshot_driver(&self, backend: &str) -> Result<SnapshotDriverRef> {
        match self.snapshot.get(backend) {
            Some(ctor) => Ok(ctor()),
            None => Err(Error::BackendUnknown {
                backend: backend.to_string(),
            }),
        }
    }

    /// Names of all registered mount backends, for the reconciler's scan.
    pub fn mount_driver_names(&self) -> Vec<String> {
        self.mount.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.mount.is_empty() && self.crud.is_empty() && self.snapshot.is_empty()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("mount", &self.mount.keys().collect::<Vec<_>>())
            .field("crud", &self.crud.keys().collect::<Vec<_>>())
            .field("snapshot", &self.snapshot.keys().collect::<Vec<_>>())
            .finish()
    }
}
