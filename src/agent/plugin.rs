//! Docker volume-plugin RPC surface
//!
//! Wire types follow the runtime's plugin protocol: every request is a
//! JSON POST, every response carries an `Err` field that is empty on
//! success. Field names are the runtime's, hence the capitalized renames.
//! Handlers stay thin and delegate to [`Agent`](crate::agent::Agent).

use crate::agent::Agent;
use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeRequest {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Opts", default)]
    pub opts: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeResponse {
    #[serde(rename = "Mountpoint")]
    pub mountpoint: String,
    #[serde(rename = "Err")]
    pub err: String,
}

impl VolumeResponse {
    fn ok(mountpoint: String) -> Self {
        Self {
            mountpoint,
            err: String::new(),
        }
    }

    fn error(err: impl std::fmt::Display) -> Self {
        Self {
            mountpoint: String::new(),
            err: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateResponse {
    #[serde(rename = "Implements")]
    pub implements: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginVolume {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Mountpoint")]
    pub mountpoint: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetResponse {
    #[serde(rename = "Volume")]
    pub volume: PluginVolume,
    #[serde(rename = "Err")]
    pub err: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListResponse {
    #[serde(rename = "Volumes")]
    pub volumes: Vec<PluginVolume>,
    #[serde(rename = "Err")]
    pub err: String,
}

// =============================================================================
// Router
// =============================================================================

/// Build the plugin router. `Remove` is wired to the path handler: the
/// runtime never destroys volumes, deletion is an operator action.
pub(crate) fn router(agent: Arc<Agent>) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/Plugin.Deactivate", post(deactivate))
        .route("/VolumeDriver.Create", post(create))
        .route("/VolumeDriver.Remove", post(path))
        .route("/VolumeDriver.List", post(list))
        .route("/VolumeDriver.Get", post(get))
        .route("/VolumeDriver.Path", post(path))
        .route("/VolumeDriver.Mount", post(mount))
        .route("/VolumeDriver.Unmount", post(unmount))
        .fallback(debug_echo)
        .with_state(agent)
}

fn parse_request(verb: &str, body: &str) -> Result<VolumeRequest, String> {
    debug!(verb, body = body.trim(), "dispatching plugin request");
    serde_json::from_str(body).map_err(|e| format!("could not unmarshal request: {}", e))
}

// =============================================================================
// Handlers
// =============================================================================

async fn activate() -> Json<ActivateResponse> {
    Json(ActivateResponse {
        implements: vec!["VolumeDriver".to_string()],
    })
}

async fn deactivate() -> StatusCode {
    StatusCode::OK
}

async fn create(State(agent): State<Arc<Agent>>, body: String) -> Json<VolumeResponse> {
    let request = match parse_request("Create", &body) {
        Ok(request) => request,
        Err(e) => return Json(VolumeResponse::error(e)),
    };
    match agent.create(&request.name).await {
        Ok(()) => Json(VolumeResponse::ok(String::new())),
        Err(e) => {
            error!(name = %request.name, error = %e, "create failed");
            Json(VolumeResponse::error(e))
        }
    }
}

async fn path(State(agent): State<Arc<Agent>>, body: String) -> Json<VolumeResponse> {
    let request = match parse_request("Path", &body) {
        Ok(request) => request,
        Err(e) => return Json(VolumeResponse::error(e)),
    };
    match agent.path(&request.name).await {
        Ok(mountpoint) => Json(VolumeResponse::ok(mountpoint)),
        Err(e) => Json(VolumeResponse::error(e)),
    }
}

async fn get(State(agent): State<Arc<Agent>>, body: String) -> Json<GetResponse> {
    let request = match parse_request("Get", &body) {
        Ok(request) => request,
        Err(e) => {
            return Json(GetResponse {
                err: e,
                ..Default::default()
            })
        }
    };
    match agent.path(&request.name).await {
        Ok(mountpoint) => Json(GetResponse {
            volume: PluginVolume {
                name: request.name,
                mountpoint,
            },
            err: String::new(),
        }),
        Err(e) => Json(GetResponse {
            err: e.to_string(),
            ..Default::default()
        }),
    }
}

async fn list(State(agent): State<Arc<Agent>>) -> Json<ListResponse> {
    match agent.list().await {
        Ok(listings) => Json(ListResponse {
            volumes: listings
                .into_iter()
                .map(|listing| PluginVolume {
                    name: listing.name,
                    mountpoint: listing.mountpoint,
                })
                .collect(),
            err: String::new(),
        }),
        Err(e) => Json(ListResponse {
            err: e.to_string(),
            ..Default::default()
        }),
    }
}

async fn mount(State(agent): State<Arc<Agent>>, body: String) -> Json<VolumeResponse> {
    let request = match parse_request("Mount", &body) {
        Ok(request) => request,
        Err(e) => return Json(VolumeResponse::error(e)),
    };
    info!(name = %request.name, "mount requested");
    match agent.mount(&request.name).await {
        Ok(mountpoint) => Json(VolumeResponse::ok(mountpoint)),
        Err(e) => {
            error!(name = %request.name, error = %e, "mount failed");
            Json(VolumeResponse::error(e))
        }
    }
}

async fn unmount(State(agent): State<Arc<Agent>>, body: String) -> Json<VolumeResponse> {
    let request = match parse_request("Unmount", &body) {
        Ok(request) => request,
        Err(e) => return Json(VolumeResponse::error(e)),
    };
    info!(name = %request.name, "unmount requested");
    match agent.unmount(&request.name).await {
        Ok(()) => Json(VolumeResponse::ok(String::new())),
        Err(e) => {
            error!(name = %request.name, error = %e, "unmount failed");
            Json(VolumeResponse::error(e))
        }
    }
}

/// Diagnostic passthrough for unknown verbs. Only reachable while global
/// debug is on; otherwise unknown verbs are a plain 404.
async fn debug_echo(State(agent): State<Arc<Agent>>, request: Request) -> Response {
    if !agent.global().debug {
        return StatusCode::NOT_FOUND.into_response();
    }
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, usize::MAX).await.unwrap_or_default();
    info!(uri = %parts.uri, "debug passthrough");
    (StatusCode::OK, bytes).into_response()
}
