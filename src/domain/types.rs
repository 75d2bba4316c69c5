//! Core data model: volume identity, cluster records, and global configuration
//!
//! These types travel between the agent, the volmaster, and the plugin
//! endpoint, so they all carry serde implementations. [`VolumeName`] is the
//! keystone: every registry map and every lease is keyed by its canonical
//! `policy/name` form.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Lease reason recorded when a volume is mounted.
pub const REASON_MOUNT: &str = "mount";

/// Reserved lease holder for volumes that allow multi-host attachment.
pub const UNLOCKED_HOST: &str = "unlocked";

// =============================================================================
// Volume Identity
// =============================================================================

/// A validated volume identifier: a policy segment and a name segment,
/// canonically rendered as `"policy/name"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeName {
    pub policy: String,
    pub name: String,
}

impl VolumeName {
    /// Parse a `"policy/name"` string. Both segments must be non-empty and
    /// free of further `/` separators; anything else is rejected before it
    /// can reach a driver or the master.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(policy), Some(name), None) if !policy.is_empty() && !name.is_empty() => {
                Ok(Self {
                    policy: policy.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(Error::InvalidName {
                name: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for VolumeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.policy, self.name)
    }
}

impl Serialize for VolumeName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VolumeName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        VolumeName::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Volume Record
// =============================================================================

/// Per-capability backend names carried with each volume record. The policy
/// on the master decides which drivers serve a volume; the agent only looks
/// them up in its registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBackends {
    #[serde(default)]
    pub mount: String,
    #[serde(default)]
    pub crud: String,
    #[serde(default)]
    pub snapshot: String,
}

impl VolumeBackends {
    /// All capability groups served by a single backend.
    pub fn uniform(backend: &str) -> Self {
        Self {
            mount: backend.to_string(),
            crud: backend.to_string(),
            snapshot: backend.to_string(),
        }
    }
}

/// A volume as the master describes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub name: VolumeName,
    /// Size in bytes; may be zero for pre-existing volumes.
    #[serde(default)]
    pub size: u64,
    /// Driver-specific parameters, opaque to the agent.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Unlocked volumes may be attached on more than one host.
    #[serde(default)]
    pub unlocked: bool,
    #[serde(default)]
    pub backends: VolumeBackends,
}

// =============================================================================
// Use Lease
// =============================================================================

/// Cluster-wide record asserting that one hostname holds a volume for a
/// stated reason. For `reason = "mount"` on locked volumes the master grants
/// at most one holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseLease {
    pub volume: VolumeName,
    pub reason: String,
    pub hostname: String,
}

impl UseLease {
    /// Build the mount lease for a volume, substituting the reserved
    /// unlocked placeholder when the volume allows multi-host attachment.
    pub fn mount(volume: &VolumeName, host: &str, unlocked: bool) -> Self {
        Self {
            volume: volume.clone(),
            reason: REASON_MOUNT.to_string(),
            hostname: if unlocked {
                UNLOCKED_HOST.to_string()
            } else {
                host.to_string()
            },
        }
    }
}

// =============================================================================
// Runtime Options
// =============================================================================

/// I/O rate limits applied to a mounted device by the external runtime
/// service. The agent only stores and compares them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    #[serde(default, rename = "write-iops")]
    pub write_iops: u64,
    #[serde(default, rename = "read-iops")]
    pub read_iops: u64,
    #[serde(default, rename = "write-bps")]
    pub write_bps: u64,
    #[serde(default, rename = "read-bps")]
    pub read_bps: u64,
}

/// Per-volume runtime policy, refreshed by the runtime poller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeOptions {
    #[serde(default, rename = "rate-limit")]
    pub rate_limit: RateLimit,
}

// =============================================================================
// Global Configuration
// =============================================================================

/// Cluster-wide configuration polled from the master. Absent fields fall
/// back to the defaults below, so a bare `{}` from the master is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GlobalConfig {
    /// Root under which mount drivers place their mountpoints.
    pub mount_path: String,
    /// Use-lease TTL in seconds. Must exceed the heartbeat interval.
    pub ttl: u64,
    /// Driver operation timeout in minutes.
    pub timeout: u64,
    pub debug: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            mount_path: "/mnt/volagent".to_string(),
            ttl: 60,
            timeout: 5,
            debug: false,
        }
    }
}

impl GlobalConfig {
    pub fn ttl_duration(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout * 60)
    }
}
