//! Volmaster HTTP client
//!
//! Resolves volumes and global configuration, arbitrates use leases, and
//! runs the background heartbeats that keep a lease alive while a mount is
//! held. The per-volume stop channels registered here are the shared leaf
//! between this client and the mount registry: closing one terminates the
//! heartbeat without either registry referencing the other.

use crate::domain::types::{GlobalConfig, RuntimeOptions, UseLease, Volume, VolumeName};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Per-request timeout against the master.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The lease TTL must exceed the heartbeat interval by this factor.
const HEARTBEAT_FACTOR: u32 = 3;

/// HTTP client for the volmaster API.
pub struct MasterClient {
    http: reqwest::Client,
    base: String,
    host: String,
    /// Heartbeat cancellation senders, keyed by canonical volume name.
    stops: Mutex<HashMap<String, broadcast::Sender<()>>>,
}

impl MasterClient {
    /// Create a client for the master at `master` (a `host:port` pair or a
    /// full URL), publishing leases under the `host` label.
    pub fn new(master: &str, host: &str) -> Self {
        let base = if master.contains("://") {
            master.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", master)
        };
        Self {
            http: reqwest::Client::new(),
            base,
            host: host.to_string(),
            stops: Mutex::new(HashMap::new()),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Fetch the cluster-wide configuration.
    pub async fn get_global(&self) -> Result<GlobalConfig> {
        let resp = self
            .http
            .get(self.url("/global"))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::MasterUnreachable {
                reason: format!("global config request returned {}", resp.status()),
            });
        }
        Ok(resp.json().await?)
    }

    /// Look up one volume by policy and name.
    pub async fn get_volume(&self, name: &VolumeName) -> Result<Volume> {
        let resp = self
            .http
            .get(self.url(&format!("/volume/{}/{}", name.policy, name.name)))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(Error::VolumeNotFound {
                volume: name.to_string(),
            });
        }
        if !resp.status().is_success() {
            return Err(Error::MasterUnreachable {
                reason: format!("volume request returned {}", resp.status()),
            });
        }
        Ok(resp.json().await?)
    }

    /// All volumes the master knows about.
    pub async fn list_volumes(&self) -> Result<Vec<Volume>> {
        let resp = self
            .http
            .get(self.url("/list"))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::MasterUnreachable {
                reason: format!("volume list returned {}", resp.status()),
            });
        }
        Ok(resp.json().await?)
    }

    /// Current runtime policy for one volume.
    pub async fn get_runtime(&self, name: &VolumeName) -> Result<RuntimeOptions> {
        let resp = self
            .http
            .get(self.url(&format!("/runtime/{}/{}", name.policy, name.name)))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(Error::VolumeNotFound {
                volume: name.to_string(),
            });
        }
        if !resp.status().is_success() {
            return Err(Error::MasterUnreachable {
                reason: format!("runtime request returned {}", resp.status()),
            });
        }
        Ok(resp.json().await?)
    }

    // =========================================================================
    // Lease Arbitration
    // =========================================================================

    /// Claim the exclusive use lease for a mount. A competing claim is
    /// reported as [`Error::LeaseConflict`] with the master's hint.
    pub async fn report_mount(&self, lease: &UseLease) -> Result<()> {
        self.publish(lease, "/mount").await
    }

    /// Record the "mount in progress" soft state. Fallback for when the
    /// exclusive claim already belongs to this host.
    pub async fn report_mount_status(&self, lease: &UseLease) -> Result<()> {
        self.publish(lease, "/mount-status").await
    }

    async fn publish(&self, lease: &UseLease, path: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url(path))
            .timeout(REQUEST_TIMEOUT)
            .json(lease)
            .send()
            .await?;
        match resp.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => {
                let hint = match resp.text().await {
                    Ok(body) if !body.is_empty() => body,
                    _ => "held by another host".to_string(),
                };
                Err(Error::LeaseConflict {
                    volume: lease.volume.to_string(),
                    hint,
                })
            }
            status => Err(Error::MasterUnreachable {
                reason: format!("lease publish to {} returned {}", path, status),
            }),
        }
    }

    /// Release the use lease after the final unmount.
    pub async fn release_mount(&self, lease: &UseLease) -> Result<()> {
        let resp = self
            .http
            .delete(self.url("/mount"))
            .timeout(REQUEST_TIMEOUT)
            .json(lease)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::MasterUnreachable {
                reason: format!("lease release returned {}", resp.status()),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Heartbeats
    // =========================================================================

    /// Re-publish `lease` at intervals strictly below `ttl` until the stop
    /// channel fires. Transient errors are logged and retried; a persistent
    /// failure lets the lease expire cluster-side, which is the intended
    /// safety property.
    pub async fn heartbeat_mount(
        &self,
        ttl: Duration,
        lease: UseLease,
        mut stop: broadcast::Receiver<()>,
    ) {
        let mut interval = ttl / HEARTBEAT_FACTOR;
        if interval.is_zero() {
            interval = Duration::from_secs(1);
        }
        loop {
            tokio::select! {
                _ = stop.recv() => {
                    debug!(volume = %lease.volume, "heartbeat stopping");
                    return;
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.send_heartbeat(&lease).await {
                        warn!(volume = %lease.volume, error = %e, "use lease heartbeat failed; retrying");
                    }
                }
            }
        }
    }

    async fn send_heartbeat(&self, lease: &UseLease) -> Result<()> {
        let resp = self
            .http
            .post(self.url("/mount/heartbeat"))
            .timeout(REQUEST_TIMEOUT)
            .json(lease)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::MasterUnreachable {
                reason: format!("heartbeat returned {}", resp.status()),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Stop Channels
    // =========================================================================

    /// Allocate and register the heartbeat cancellation channel for a
    /// volume. A stale channel left behind by a lost heartbeat is fired and
    /// replaced.
    pub fn add_stop_chan(&self, name: &VolumeName) -> broadcast::Sender<()> {
        let (tx, _rx) = broadcast::channel(1);
        let mut stops = self.stops.lock();
        if let Some(old) = stops.insert(name.to_string(), tx.clone()) {
            warn!(volume = %name, "replacing stale heartbeat stop channel");
            let _ = old.send(());
        }
        tx
    }

    /// Remove the registered stop channel without firing it.
    pub fn remove_stop_chan(&self, name: &VolumeName) -> Option<broadcast::Sender<()>> {
        self.stops.lock().remove(&name.to_string())
    }

    #[cfg(test)]
    pub(crate) fn has_stop_chan(&self, name: &VolumeName) -> bool {
        self.stops.lock().contains_key(&name.to_string())
    }
}
