//! Startup reconciliation
//!
//! A previous agent process may have died while volumes were mounted; the
//! kernel mounts survive. Before the plugin socket is bound, the agent
//! rediscovers them through each mount backend, re-publishes their leases,
//! and reattaches heartbeats and runtime pollers. The driver's `mount` is
//! never called here: the mounts already exist.

use crate::agent::Agent;
use crate::domain::types::{UseLease, VolumeName};
use crate::error::{Error, Result};
use tracing::{info, warn};

impl Agent {
    /// Reconcile surviving kernel mounts with cluster state. A master that
    /// cannot be reached is fatal: starting in an ambiguous state risks
    /// double-attachment.
    pub async fn reconcile(&self) -> Result<()> {
        let global = self.global();
        for backend in self.drivers.mount_driver_names() {
            let driver = self.drivers.mount_driver(&backend, &global.mount_path)?;
            let mounts = driver.mounted(global.timeout_duration()).await?;
            for record in mounts {
                let volume_name = match VolumeName::parse(&record.volume_name) {
                    Ok(name) => name,
                    Err(_) => {
                        warn!(name = %record.volume_name,
                            "invalid volume name in mount scan; skipping refresh");
                        continue;
                    }
                };

                info!(volume = %volume_name, "refreshing existing mount");

                let volume = match self.master().get_volume(&volume_name).await {
                    Ok(volume) => volume,
                    Err(Error::VolumeNotFound { .. }) => {
                        warn!(volume = %volume_name,
                            "volume not present on volmaster; skipping refresh");
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                let lease = UseLease::mount(&volume_name, &self.host, volume.unlocked);
                if let Err(err) = self.master().report_mount(&lease).await {
                    if !matches!(err, Error::LeaseConflict { .. }) {
                        return Err(err);
                    }
                    if self.master().report_mount_status(&lease).await.is_err() {
                        return Err(err);
                    }
                }

                self.mounts().seed(&volume_name);
                self.start_volume_tasks(&volume_name, lease);
            }
        }
        Ok(())
    }
}
