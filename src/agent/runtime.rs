//! Per-volume runtime policy poller
//!
//! While a mount is held, this task refreshes the volume's runtime options
//! from the master so the external runtime service sees current I/O policy.
//! It shares its stop channel with the lease heartbeat.

use crate::agent::registry::MountRegistry;
use crate::domain::types::VolumeName;
use crate::master::MasterClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

const RUNTIME_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) async fn poll_runtime(
    master: Arc<MasterClient>,
    mounts: Arc<MountRegistry>,
    volume_name: VolumeName,
    mut stop: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = stop.recv() => {
                debug!(volume = %volume_name, "runtime poller stopping");
                return;
            }
            _ = tokio::time::sleep(RUNTIME_POLL_INTERVAL) => {
                match master.get_runtime(&volume_name).await {
                    Ok(opts) => {
                        let changed = mounts
                            .get_runtime(&volume_name)
                            .map(|current| current != opts)
                            .unwrap_or(true);
                        if changed {
                            info!(volume = %volume_name, "runtime policy updated");
                            mounts.set_runtime(&volume_name, opts);
                        }
                    }
                    Err(e) => {
                        debug!(volume = %volume_name, error = %e, "could not refresh runtime policy");
                    }
                }
            }
        }
    }
}
