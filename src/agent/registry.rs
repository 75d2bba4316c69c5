//! Mount registry: per-host refcounts, stop channels, and runtime options
//!
//! Two independent locks guard this state: a mutex over the mount table
//! (refcounts, stop senders, in-flight barriers) and a read-write lock over
//! runtime options, so policy refreshes never contend with mount traffic.
//! Neither lock is ever held across a driver call.

use crate::domain::types::{RuntimeOptions, VolumeName};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use tokio::sync::{broadcast, watch};
use tracing::{error, warn};

// =============================================================================
// Mount Barrier
// =============================================================================

/// Progress of the first mount of a volume. Racers that increment the
/// refcount while the first mount is still in flight wait on this instead
/// of reading a mountpoint that does not exist yet.
#[derive(Debug, Clone)]
pub enum MountBarrier {
    InFlight,
    Ready(String),
    Failed(String),
}

/// Result of [`MountRegistry::acquire`].
pub enum AcquireOutcome {
    /// The prior count was zero; the caller owns the actual mount and must
    /// publish a terminal barrier state via [`MountRegistry::finish_mount`].
    First,
    /// Another holder exists. When `barrier` is set the first mount is
    /// still in flight and must be awaited.
    Joined {
        count: u64,
        barrier: Option<watch::Receiver<MountBarrier>>,
    },
}

// =============================================================================
// Mount Registry
// =============================================================================

#[derive(Default)]
struct MountTable {
    counts: HashMap<String, u64>,
    stops: HashMap<String, broadcast::Sender<()>>,
    pending: HashMap<String, watch::Sender<MountBarrier>>,
}

/// In-memory per-host mount state.
#[derive(Default)]
pub struct MountRegistry {
    table: Mutex<MountTable>,
    runtime: RwLock<HashMap<String, RuntimeOptions>>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the refcount for a volume. The barrier subscription and
    /// the increment happen under one lock acquisition, so a joiner either
    /// sees a live barrier or a completed mount.
    pub fn acquire(&self, name: &VolumeName) -> AcquireOutcome {
        let key = name.to_string();
        let mut guard = self.table.lock();
        let table = &mut *guard;
        let count = table.counts.entry(key.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            let (tx, _rx) = watch::channel(MountBarrier::InFlight);
            table.pending.insert(key, tx);
            AcquireOutcome::First
        } else {
            let count = *count;
            let barrier = table.pending.get(&key).map(|tx| tx.subscribe());
            AcquireOutcome::Joined { count, barrier }
        }
    }

    /// Publish the terminal state of a first mount and retire its barrier.
    pub fn finish_mount(&self, name: &VolumeName, outcome: MountBarrier) {
        let mut table = self.table.lock();
        if let Some(tx) = table.pending.remove(&name.to_string()) {
            let _ = tx.send(outcome);
        }
    }

    /// Decrement the refcount. Returns the remaining count and whether this
    /// release was the last holder. Underflow is a bug in the caller's
    /// pairing; it is logged and absorbed.
    pub fn release(&self, name: &VolumeName) -> (u64, bool) {
        let key = name.to_string();
        let mut guard = self.table.lock();
        let table = &mut *guard;
        match table.counts.get_mut(&key) {
            Some(count) if *count > 0 => {
                *count -= 1;
                let remaining = *count;
                if remaining == 0 {
                    table.counts.remove(&key);
                    (0, true)
                } else {
                    (remaining, false)
                }
            }
            _ => {
                error!(volume = %name, "mount refcount underflow");
                table.counts.remove(&key);
                (0, false)
            }
        }
    }

    /// Seed a refcount of one for a mount rediscovered at startup.
    pub fn seed(&self, name: &VolumeName) {
        self.table.lock().counts.insert(name.to_string(), 1);
    }

    pub fn count(&self, name: &VolumeName) -> u64 {
        self.table
            .lock()
            .counts
            .get(&name.to_string())
            .copied()
            .unwrap_or(0)
    }

    // =========================================================================
    // Stop Channels
    // =========================================================================

    /// Install the per-volume cancellation sender. At most one may exist; a
    /// stale one is fired and replaced.
    pub fn register_stop_chan(&self, name: &VolumeName, tx: broadcast::Sender<()>) {
        let mut table = self.table.lock();
        if let Some(old) = table.stops.insert(name.to_string(), tx) {
            warn!(volume = %name, "replacing stale stop channel");
            let _ = old.send(());
        }
    }

    /// Remove and return the registered sender, if any.
    pub fn claim_stop_chan(&self, name: &VolumeName) -> Option<broadcast::Sender<()>> {
        self.table.lock().stops.remove(&name.to_string())
    }

    pub fn has_stop_chan(&self, name: &VolumeName) -> bool {
        self.table.lock().stops.contains_key(&name.to_string())
    }

    // =========================================================================
    // Runtime Options
    // =========================================================================

    pub fn set_runtime(&self, name: &VolumeName, opts: RuntimeOptions) {
        self.runtime.write().insert(name.to_string(), opts);
    }

    pub fn get_runtime(&self, name: &VolumeName) -> Option<RuntimeOptions> {
        self.runtime.read().get(&name.to_string()).cloned()
    }

    pub fn clear_runtime(&self, name: &VolumeName) {
        self.runtime.write().remove(&name.to_string());
    }
}
