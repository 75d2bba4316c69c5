//! In-process fake volmaster used across the agent's tests.
//!
//! Serves the consumed subset of the master API on a loopback TCP port and
//! counts lease traffic so tests can assert exactly how many claims,
//! heartbeats, and releases the agent produced.

use crate::domain::types::{GlobalConfig, RuntimeOptions, UseLease, Volume, VolumeBackends, VolumeName};
use crate::master::MasterClient;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct MasterState {
    pub global: Mutex<GlobalConfig>,
    pub volumes: Mutex<BTreeMap<String, Volume>>,
    pub leases: Mutex<BTreeMap<String, UseLease>>,
    pub runtime: Mutex<BTreeMap<String, RuntimeOptions>>,
    pub mount_reports: AtomicUsize,
    pub status_reports: AtomicUsize,
    pub heartbeats: AtomicUsize,
    pub releases: AtomicUsize,
    /// When set, /mount-status answers 409 as well.
    pub fail_status: AtomicBool,
}

pub(crate) struct FakeMaster {
    pub state: Arc<MasterState>,
    pub addr: SocketAddr,
}

impl FakeMaster {
    pub async fn spawn() -> Self {
        let state = Arc::new(MasterState::default());
        let app = Router::new()
            .route("/global", get(get_global))
            .route("/list", get(list_volumes))
            .route("/volume/:policy/:name", get(get_volume))
            .route("/runtime/:policy/:name", get(get_runtime))
            .route("/mount", post(report_mount).delete(release_mount))
            .route("/mount-status", post(report_status))
            .route("/mount/heartbeat", post(heartbeat))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { state, addr }
    }

    pub fn client(&self, host: &str) -> MasterClient {
        MasterClient::new(&self.addr.to_string(), host)
    }

    pub fn add_volume(&self, name: &str, backend: &str, unlocked: bool) -> Volume {
        let volume = Volume {
            name: VolumeName::parse(name).unwrap(),
            size: 10 * 1024 * 1024,
            params: BTreeMap::new(),
            unlocked,
            backends: VolumeBackends::uniform(backend),
        };
        self.state
            .volumes
            .lock()
            .insert(name.to_string(), volume.clone());
        volume
    }

    /// Pre-install a lease, as if another host already claimed the volume.
    pub fn hold_lease(&self, name: &VolumeName, holder: &str) {
        let lease = UseLease::mount(name, holder, false);
        self.state.leases.lock().insert(name.to_string(), lease);
    }

    pub fn lease_holder(&self, name: &VolumeName) -> Option<String> {
        self.state
            .leases
            .lock()
            .get(&name.to_string())
            .map(|l| l.hostname.clone())
    }
}

async fn get_global(State(state): State<Arc<MasterState>>) -> Json<GlobalConfig> {
    Json(state.global.lock().clone())
}

async fn list_volumes(State(state): State<Arc<MasterState>>) -> Json<Vec<Volume>> {
    Json(state.volumes.lock().values().cloned().collect())
}

async fn get_volume(
    State(state): State<Arc<MasterState>>,
    Path((policy, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.volumes.lock().get(&format!("{}/{}", policy, name)) {
        Some(volume) => (StatusCode::OK, Json(volume.clone())).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_runtime(
    State(state): State<Arc<MasterState>>,
    Path((policy, name)): Path<(String, String)>,
) -> Json<RuntimeOptions> {
    Json(
        state
            .runtime
            .lock()
            .get(&format!("{}/{}", policy, name))
            .cloned()
            .unwrap_or_default(),
    )
}

async fn report_mount(
    State(state): State<Arc<MasterState>>,
    Json(lease): Json<UseLease>,
) -> impl IntoResponse {
    state.mount_reports.fetch_add(1, Ordering::SeqCst);
    let mut leases = state.leases.lock();
    let key = lease.volume.to_string();
    if let Some(existing) = leases.get(&key) {
        if existing.hostname != lease.hostname {
            return (
                StatusCode::CONFLICT,
                format!("held by {}", existing.hostname),
            )
                .into_response();
        }
    }
    leases.insert(key, lease);
    StatusCode::OK.into_response()
}

async fn report_status(
    State(state): State<Arc<MasterState>>,
    Json(lease): Json<UseLease>,
) -> impl IntoResponse {
    state.status_reports.fetch_add(1, Ordering::SeqCst);
    if state.fail_status.load(Ordering::SeqCst) {
        return (
            StatusCode::CONFLICT,
            format!("mount of {} contested", lease.volume),
        )
            .into_response();
    }
    StatusCode::OK.into_response()
}

async fn heartbeat(
    State(state): State<Arc<MasterState>>,
    Json(_lease): Json<UseLease>,
) -> StatusCode {
    state.heartbeats.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn release_mount(
    State(state): State<Arc<MasterState>>,
    Json(lease): Json<UseLease>,
) -> StatusCode {
    state.releases.fetch_add(1, Ordering::SeqCst);
    state.leases.lock().remove(&lease.volume.to_string());
    StatusCode::OK
}
