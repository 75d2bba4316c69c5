//! In-memory storage driver used by the agent's tests.
//!
//! Implements all three capability groups against maps of volumes and
//! mounts. Call counters let tests assert which operations the agent
//! actually reached; `fail_next_mount` exercises the rollback paths.

use crate::domain::ports::{
    CrudDriver, DriverOptions, ListOptions, MountDriver, MountRecord, SnapshotDriver,
};
use crate::domain::types::Volume;
use crate::driver::DriverRegistry;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct MemoryState {
    volumes: Mutex<BTreeMap<String, Volume>>,
    mounts: Mutex<BTreeMap<String, MountRecord>>,
    mount_calls: AtomicUsize,
    unmount_calls: AtomicUsize,
    create_calls: AtomicUsize,
    format_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
    fail_next_mount: AtomicBool,
    snapshots: Mutex<BTreeMap<String, Vec<String>>>,
}

/// Shared-state in-memory driver. Clones observe the same volumes, mounts,
/// and counters, so the instance handed to the registry and the one held by
/// the test see identical state.
#[derive(Clone)]
pub(crate) struct MemoryDriver {
    name: String,
    mount_root: String,
    state: Arc<MemoryState>,
}

impl MemoryDriver {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mount_root: "/mnt/volagent-test".to_string(),
            state: Arc::new(MemoryState::default()),
        }
    }

    fn with_root(mut self, mount_root: &str) -> Self {
        self.mount_root = mount_root.to_string();
        self
    }

    /// Register this driver's three capabilities under its name.
    pub fn register(&self, registry: &mut DriverRegistry) {
        let mount = self.clone();
        registry.register_mount(
            self.name.clone(),
            Box::new(move |root| Arc::new(mount.clone().with_root(root))),
        );
        let crud = self.clone();
        registry.register_crud(self.name.clone(), Box::new(move || Arc::new(crud.clone())));
        let snapshot = self.clone();
        registry.register_snapshot(
            self.name.clone(),
            Box::new(move || Arc::new(snapshot.clone())),
        );
    }

    pub fn insert_volume(&self, volume: Volume) {
        self.state
            .volumes
            .lock()
            .insert(volume.name.to_string(), volume);
    }

    /// Seed a kernel-visible mount, as reconciliation would discover it.
    pub fn insert_mount(&self, volume_name: &str) {
        let record = MountRecord {
            device: format!("/dev/volagent/{}", volume_name.replace('/', ".")),
            path: format!("{}/{}/{}", self.mount_root, self.name, volume_name.replace('/', ".")),
            dev_major: 8,
            dev_minor: 0,
            volume_name: volume_name.to_string(),
        };
        self.state.mounts.lock().insert(record.path.clone(), record);
    }

    pub fn fail_next_mount(&self) {
        self.state.fail_next_mount.store(true, Ordering::SeqCst);
    }

    pub fn mount_calls(&self) -> usize {
        self.state.mount_calls.load(Ordering::SeqCst)
    }

    pub fn unmount_calls(&self) -> usize {
        self.state.unmount_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.state.create_calls.load(Ordering::SeqCst)
    }

    pub fn format_calls(&self) -> usize {
        self.state.format_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.state.destroy_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MountDriver for MemoryDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn mount(&self, opts: &DriverOptions) -> Result<MountRecord> {
        self.state.mount_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_next_mount.swap(false, Ordering::SeqCst) {
            return Err(Error::driver(&self.name, "mount", "injected failure"));
        }

        let path = self.mount_path(opts)?.display().to_string();
        let mut mounts = self.state.mounts.lock();
        if let Some(existing) = mounts.get(&path) {
            return Ok(existing.clone());
        }
        let record = MountRecord {
            device: format!("/dev/volagent/{}", opts.volume.name.to_string().replace('/', ".")),
            path: path.clone(),
            dev_major: 8,
            dev_minor: 0,
            volume_name: opts.volume.name.to_string(),
        };
        mounts.insert(path, record.clone());
        Ok(record)
    }

    async fn unmount(&self, opts: &DriverOptions) -> Result<()> {
        self.state.unmount_calls.fetch_add(1, Ordering::SeqCst);
        let path = self.mount_path(opts)?.display().to_string();
        self.state.mounts.lock().remove(&path);
        Ok(())
    }

    async fn mounted(&self, _timeout: Duration) -> Result<Vec<MountRecord>> {
        Ok(self.state.mounts.lock().values().cloned().collect())
    }

    fn mount_path(&self, opts: &DriverOptions) -> Result<PathBuf> {
        let name = &opts.volume.name;
        Ok(PathBuf::from(&self.mount_root)
            .join(&self.name)
            .join(format!("{}.{}", name.policy, name.name)))
    }
}

#[async_trait]
impl CrudDriver for MemoryDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&self, opts: &DriverOptions) -> Result<()> {
        self.state.create_calls.fetch_add(1, Ordering::SeqCst);
        let key = opts.volume.name.to_string();
        let mut volumes = self.state.volumes.lock();
        if volumes.contains_key(&key) {
            return Err(Error::VolumeExists { volume: key });
        }
        volumes.insert(key, opts.volume.clone());
        Ok(())
    }

    async fn format(&self, _opts: &DriverOptions) -> Result<()> {
        self.state.format_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self, opts: &DriverOptions) -> Result<()> {
        self.state.destroy_calls.fetch_add(1, Ordering::SeqCst);
        let key = opts.volume.name.to_string();
        if self.state.volumes.lock().remove(&key).is_none() {
            return Err(Error::driver(&self.name, "destroy", "no such volume"));
        }
        Ok(())
    }

    async fn list(&self, _opts: &ListOptions) -> Result<Vec<Volume>> {
        Ok(self.state.volumes.lock().values().cloned().collect())
    }

    async fn exists(&self, opts: &DriverOptions) -> Result<bool> {
        Ok(self
            .state
            .volumes
            .lock()
            .contains_key(&opts.volume.name.to_string()))
    }
}

#[async_trait]
impl SnapshotDriver for MemoryDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_snapshot(&self, snapshot: &str, opts: &DriverOptions) -> Result<()> {
        self.state
            .snapshots
            .lock()
            .entry(opts.volume.name.to_string())
            .or_default()
            .push(snapshot.to_string());
        Ok(())
    }

    async fn remove_snapshot(&self, snapshot: &str, opts: &DriverOptions) -> Result<()> {
        let mut snapshots = self.state.snapshots.lock();
        match snapshots.get_mut(&opts.volume.name.to_string()) {
            Some(names) if names.iter().any(|n| n == snapshot) => {
                names.retain(|n| n != snapshot);
                Ok(())
            }
            _ => Err(Error::driver(&self.name, "remove-snapshot", "no such snapshot")),
        }
    }

    async fn list_snapshots(&self, opts: &DriverOptions) -> Result<Vec<String>> {
        Ok(self
            .state
            .snapshots
            .lock()
            .get(&opts.volume.name.to_string())
            .cloned()
            .unwrap_or_default())
    }

    async fn copy_snapshot(
        &self,
        opts: &DriverOptions,
        snapshot: &str,
        new_volume: &str,
    ) -> Result<()> {
        let known = self
            .state
            .snapshots
            .lock()
            .get(&opts.volume.name.to_string())
            .map(|names| names.iter().any(|n| n == snapshot))
            .unwrap_or(false);
        if !known {
            return Err(Error::driver(&self.name, "copy-snapshot", "no such snapshot"));
        }
        let mut copied = opts.volume.clone();
        copied.name = crate::domain::types::VolumeName::parse(new_volume)?;
        self.insert_volume(copied);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Volume, VolumeBackends, VolumeName};
    use std::collections::BTreeMap;

    fn opts_for(driver: &MemoryDriver, name: &str) -> DriverOptions {
        DriverOptions {
            volume: Volume {
                name: VolumeName::parse(name).unwrap(),
                size: 0,
                params: BTreeMap::new(),
                unlocked: false,
                backends: VolumeBackends::uniform(driver.name.as_str()),
            },
            fs: Default::default(),
            timeout: Duration::from_secs(1),
            options: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_mount_is_idempotent() {
        let driver = MemoryDriver::new("memory");
        let opts = opts_for(&driver, "policy1/test");

        let first = driver.mount(&opts).await.unwrap();
        let second = driver.mount(&opts).await.unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(driver.mounted(Duration::from_secs(1)).await.unwrap().len(), 1);
        assert_eq!(driver.mount_calls(), 2);
    }

    #[tokio::test]
    async fn test_create_existing_volume_is_distinguished() {
        let driver = MemoryDriver::new("memory");
        let opts = opts_for(&driver, "policy1/test");

        driver.create(&opts).await.unwrap();
        assert!(matches!(
            driver.create(&opts).await,
            Err(Error::VolumeExists { .. })
        ));
        assert!(driver.exists(&opts).await.unwrap());
    }

    #[tokio::test]
    async fn test_destroy_missing_volume_is_error() {
        let driver = MemoryDriver::new("memory");
        let opts = opts_for(&driver, "policy1/ghost");
        assert!(driver.destroy(&opts).await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_lifecycle() {
        let driver = MemoryDriver::new("memory");
        let opts = opts_for(&driver, "policy1/test");
        driver.create(&opts).await.unwrap();

        driver.create_snapshot("snap1", &opts).await.unwrap();
        assert_eq!(
            driver.list_snapshots(&opts).await.unwrap(),
            vec!["snap1".to_string()]
        );

        driver.copy_snapshot(&opts, "snap1", "policy1/copy").await.unwrap();
        assert!(driver
            .exists(&opts_for(&driver, "policy1/copy"))
            .await
            .unwrap());

        driver.remove_snapshot("snap1", &opts).await.unwrap();
        assert!(driver.list_snapshots(&opts).await.unwrap().is_empty());
        assert!(driver.remove_snapshot("snap1", &opts).await.is_err());
    }

    #[tokio::test]
    async fn test_mount_path_is_stable() {
        let driver = MemoryDriver::new("memory").with_root("/mnt/test");
        let opts = opts_for(&driver, "policy1/test");
        assert_eq!(
            driver.mount_path(&opts).unwrap(),
            PathBuf::from("/mnt/test/memory/policy1.test")
        );
    }
}
