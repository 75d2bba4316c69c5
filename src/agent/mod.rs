//! The host-side volume agent
//!
//! Coordinates the plugin verbs against cluster state: resolves volumes on
//! the volmaster, arbitrates use leases, drives storage backends through
//! the driver registry, and keeps per-volume refcounts with background
//! heartbeats and runtime pollers. The axum handlers in [`plugin`] stay
//! thin; the protocol logic lives here.

pub mod plugin;
pub mod registry;
pub mod server;

mod reconcile;
mod runtime;

use crate::domain::ports::{DriverOptions, FsOptions, MountDriverRef};
use crate::domain::types::{GlobalConfig, UseLease, Volume, VolumeName};
use crate::driver::DriverRegistry;
use crate::error::{Error, Result};
use crate::master::MasterClient;
use parking_lot::RwLock;
use self::registry::{AcquireOutcome, MountBarrier, MountRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often the global-config watcher polls the master.
pub const GLOBAL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One entry of the `List` verb's answer.
#[derive(Debug, Clone)]
pub struct VolumeListing {
    pub name: String,
    pub mountpoint: String,
}

/// The volume agent. Constructed once at startup and shared by the plugin
/// server and all background tasks.
pub struct Agent {
    master: Arc<MasterClient>,
    drivers: DriverRegistry,
    mounts: Arc<MountRegistry>,
    /// Swapped wholesale by the watcher; readers clone the Arc.
    global: RwLock<Arc<GlobalConfig>>,
    host: String,
}

impl Agent {
    pub fn new(
        master: Arc<MasterClient>,
        drivers: DriverRegistry,
        global: GlobalConfig,
        host: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            master,
            drivers,
            mounts: Arc::new(MountRegistry::new()),
            global: RwLock::new(Arc::new(global)),
            host: host.into(),
        })
    }

    pub fn global(&self) -> Arc<GlobalConfig> {
        self.global.read().clone()
    }

    pub fn set_global(&self, global: GlobalConfig) {
        *self.global.write() = Arc::new(global);
    }

    pub fn mounts(&self) -> &MountRegistry {
        &self.mounts
    }

    pub fn master(&self) -> &MasterClient {
        &self.master
    }

    // =========================================================================
    // Resolution Helpers
    // =========================================================================

    async fn resolve(&self, name: &str) -> Result<(VolumeName, Volume)> {
        let volume_name = VolumeName::parse(name)?;
        let volume = self.master.get_volume(&volume_name).await?;
        Ok((volume_name, volume))
    }

    fn driver_options(&self, volume: &Volume, global: &GlobalConfig) -> DriverOptions {
        let fs_type = volume
            .params
            .get("filesystem")
            .cloned()
            .unwrap_or_else(|| "ext4".to_string());
        let create_command = volume
            .params
            .get("create-command")
            .cloned()
            .unwrap_or_else(|| format!("mkfs.{} %", fs_type));
        DriverOptions {
            volume: volume.clone(),
            fs: FsOptions {
                fs_type,
                create_command,
            },
            timeout: global.timeout_duration(),
            options: volume.params.clone(),
        }
    }

    fn mount_driver_for(
        &self,
        volume: &Volume,
        global: &GlobalConfig,
    ) -> Result<MountDriverRef> {
        self.drivers
            .mount_driver(&volume.backends.mount, &global.mount_path)
    }

    // =========================================================================
    // Verbs
    // =========================================================================

    /// The `Create` verb: ensure the volume exists on its backend. An
    /// already-existing volume is success.
    pub async fn create(&self, name: &str) -> Result<()> {
        let (_, volume) = self.resolve(name).await?;
        let global = self.global();
        let opts = self.driver_options(&volume, &global);
        let crud = self.drivers.crud_driver(&volume.backends.crud)?;

        if crud.exists(&opts).await? {
            return Ok(());
        }
        match crud.create(&opts).await {
            Ok(()) => crud.format(&opts).await,
            Err(Error::VolumeExists { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// The `Path`, `Get`, and `Remove` verbs: the mountpoint for a volume
    /// without mounting anything. Removal through the runtime is
    /// deliberately inert; destruction is an operator action.
    pub async fn path(&self, name: &str) -> Result<String> {
        let (_, volume) = self.resolve(name).await?;
        let global = self.global();
        let opts = self.driver_options(&volume, &global);
        let driver = self.mount_driver_for(&volume, &global)?;
        Ok(driver.mount_path(&opts)?.display().to_string())
    }

    /// The `List` verb: every volume the master knows about, with the
    /// mountpoint where the backend is registered locally.
    pub async fn list(&self) -> Result<Vec<VolumeListing>> {
        let global = self.global();
        let mut listings = Vec::new();
        for volume in self.master.list_volumes().await? {
            let opts = self.driver_options(&volume, &global);
            let mountpoint = self
                .mount_driver_for(&volume, &global)
                .ok()
                .and_then(|driver| driver.mount_path(&opts).ok())
                .map(|path| path.display().to_string())
                .unwrap_or_default();
            listings.push(VolumeListing {
                name: volume.name.to_string(),
                mountpoint,
            });
        }
        Ok(listings)
    }

    /// The `Mount` verb. Only the first holder reaches the driver and the
    /// lease machinery; additional holders on this host share the mount via
    /// the refcount, waiting out an in-flight first mount when racing.
    pub async fn mount(&self, name: &str) -> Result<String> {
        let (volume_name, volume) = self.resolve(name).await?;
        let global = self.global();
        let opts = self.driver_options(&volume, &global);
        let driver = self.mount_driver_for(&volume, &global)?;

        match self.mounts.acquire(&volume_name) {
            AcquireOutcome::First => {
                match self.mount_first(&volume_name, &volume, &driver, &opts).await {
                    Ok(mountpoint) => {
                        self.mounts
                            .finish_mount(&volume_name, MountBarrier::Ready(mountpoint.clone()));
                        Ok(mountpoint)
                    }
                    Err(e) => {
                        self.mounts
                            .finish_mount(&volume_name, MountBarrier::Failed(e.to_string()));
                        self.mounts.release(&volume_name);
                        Err(e)
                    }
                }
            }
            AcquireOutcome::Joined {
                barrier: None,
                count,
            } => {
                debug!(volume = %volume_name, count, "sharing established mount");
                match driver.mount_path(&opts) {
                    Ok(path) => Ok(path.display().to_string()),
                    Err(e) => {
                        self.mounts.release(&volume_name);
                        Err(e)
                    }
                }
            }
            AcquireOutcome::Joined {
                barrier: Some(mut rx),
                count,
            } => {
                debug!(volume = %volume_name, count, "waiting for in-flight mount");
                let outcome = match rx
                    .wait_for(|state| !matches!(state, MountBarrier::InFlight))
                    .await
                {
                    Ok(state) => (*state).clone(),
                    Err(_) => MountBarrier::Failed("first mount attempt aborted".to_string()),
                };
                match outcome {
                    MountBarrier::Ready(mountpoint) => Ok(mountpoint),
                    MountBarrier::Failed(reason) => {
                        self.mounts.release(&volume_name);
                        Err(Error::driver(&volume.backends.mount, "mount", reason))
                    }
                    MountBarrier::InFlight => unreachable!("wait_for excludes InFlight"),
                }
            }
        }
    }

    /// First-holder path: claim the lease, drive the backend, and attach
    /// the background tasks. Failures restore the pre-call lease state; the
    /// caller rolls back the refcount.
    async fn mount_first(
        &self,
        volume_name: &VolumeName,
        volume: &Volume,
        driver: &MountDriverRef,
        opts: &DriverOptions,
    ) -> Result<String> {
        let lease = UseLease::mount(volume_name, &self.host, volume.unlocked);

        if let Err(err) = self.master.report_mount(&lease).await {
            if !matches!(err, Error::LeaseConflict { .. }) {
                return Err(err);
            }
            // The exclusive claim may already belong to this host (e.g. a
            // lease surviving a crash); surface the in-progress soft state
            // instead. If the master rejects that too, the volume is truly
            // held elsewhere.
            if self.master.report_mount_status(&lease).await.is_err() {
                return Err(err);
            }
        }

        let record = match driver.mount(opts).await {
            Ok(record) => record,
            Err(e) => {
                if let Err(release_err) = self.master.release_mount(&lease).await {
                    warn!(volume = %volume_name, error = %release_err,
                        "could not release lease after failed mount; it will expire via TTL");
                }
                return Err(e);
            }
        };

        info!(volume = %volume_name, device = %record.device, path = %record.path, "mounted volume");
        self.start_volume_tasks(volume_name, lease);
        Ok(record.path)
    }

    /// The `Unmount` verb. Only the last holder reaches the driver; lease
    /// release failures are logged and left to the TTL.
    pub async fn unmount(&self, name: &str) -> Result<()> {
        let volume_name = VolumeName::parse(name)?;
        let global = self.global();

        // Resolution may fail benignly here; bookkeeping still proceeds so
        // a master outage cannot pin refcounts forever.
        let volume = match self.master.get_volume(&volume_name).await {
            Ok(volume) => Some(volume),
            Err(e) => {
                warn!(volume = %volume_name, error = %e,
                    "could not resolve volume during unmount; proceeding with best-effort cleanup");
                None
            }
        };

        let (count, last) = self.mounts.release(&volume_name);
        if !last {
            debug!(volume = %volume_name, count, "unmount deferred; other holders remain");
            return Ok(());
        }

        if let Some(stop) = self.mounts.claim_stop_chan(&volume_name) {
            let _ = stop.send(());
        }
        self.master.remove_stop_chan(&volume_name);
        self.mounts.clear_runtime(&volume_name);

        let unlocked = volume.as_ref().map(|v| v.unlocked).unwrap_or(false);
        if let Some(volume) = &volume {
            let opts = self.driver_options(volume, &global);
            match self.mount_driver_for(volume, &global) {
                Ok(driver) => {
                    if let Err(e) = driver.unmount(&opts).await {
                        warn!(volume = %volume_name, error = %e,
                            "unmount failed; continuing teardown");
                    }
                }
                Err(e) => warn!(volume = %volume_name, error = %e,
                    "no mount driver for volume; skipping driver unmount"),
            }
        }

        let lease = UseLease::mount(&volume_name, &self.host, unlocked);
        if let Err(e) = self.master.release_mount(&lease).await {
            warn!(volume = %volume_name, error = %e,
                "could not release use lease; it will expire via TTL");
        }
        Ok(())
    }

    // =========================================================================
    // Background Tasks
    // =========================================================================

    /// Wire the shared stop channel into both registries and start the
    /// heartbeat and runtime poller for a freshly established mount.
    fn start_volume_tasks(&self, volume_name: &VolumeName, lease: UseLease) {
        let global = self.global();
        let stop = self.master.add_stop_chan(volume_name);
        self.mounts.register_stop_chan(volume_name, stop.clone());

        let master = self.master.clone();
        let ttl = global.ttl_duration();
        let heartbeat_rx = stop.subscribe();
        tokio::spawn(async move {
            master.heartbeat_mount(ttl, lease, heartbeat_rx).await;
        });

        let poller_master = self.master.clone();
        let poller_mounts = self.mounts.clone();
        let poller_name = volume_name.clone();
        let poller_rx = stop.subscribe();
        tokio::spawn(async move {
            runtime::poll_runtime(poller_master, poller_mounts, poller_name, poller_rx).await;
        });
    }

    /// Poll the master's global configuration at a fixed cadence, swapping
    /// the shared pointer on every successful fetch.
    pub fn spawn_watch_global(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let agent = self;
        tokio::spawn(async move {
            let mut debug_on = agent.global().debug;
            loop {
                tokio::time::sleep(GLOBAL_POLL_INTERVAL).await;
                match agent.master.get_global().await {
                    Ok(global) => {
                        if global.debug != debug_on {
                            info!(debug = global.debug, "global debug flag changed");
                            debug_on = global.debug;
                        }
                        agent.set_global(global);
                    }
                    Err(e) => {
                        warn!(error = %e, "could not refresh global configuration");
                    }
                }
            }
        })
    }
}
