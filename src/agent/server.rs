//! Plugin socket server
//!
//! Serves the plugin router over a Unix-domain socket in the runtime's
//! plugin directory. Each connection carries exactly one request:
//! keep-alive is disabled because the runtime opens a fresh connection per
//! call and pooled connections stall across plugin restarts. The socket
//! file exists only while the server runs.

use crate::agent::plugin::router;
use crate::agent::Agent;
use crate::error::Result;
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Socket filename under the runtime's plugin directory.
pub const SOCKET_NAME: &str = "volplugin.sock";

pub struct PluginServer {
    socket_path: PathBuf,
    router: Router,
    shutdown_tx: broadcast::Sender<()>,
}

impl PluginServer {
    pub fn new(agent: Arc<Agent>, plugins_dir: impl AsRef<Path>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            socket_path: plugins_dir.as_ref().join(SOCKET_NAME),
            router: router(agent),
            shutdown_tx,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Sending on the returned channel drains the accept loop and removes
    /// the socket file.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind the socket and serve until shutdown. A stale socket left by a
    /// dead process is removed first; the plugin directory is created with
    /// permissions restricted to root.
    pub async fn run(&self) -> Result<()> {
        if let Some(dir) = self.socket_path.parent() {
            std::fs::create_dir_all(dir)?;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
        }
        remove_if_exists(&self.socket_path)?;

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "plugin socket bound");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                accepted = listener.accept() => {
                    let (stream, _addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "plugin socket accept failed");
                            continue;
                        }
                    };
                    let service = TowerToHyperService::new(self.router.clone());
                    tokio::spawn(async move {
                        if let Err(e) = http1::Builder::new()
                            .keep_alive(false)
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!(error = %e, "plugin connection closed with error");
                        }
                    });
                }
            }
        }

        info!("plugin server shutting down");
        remove_if_exists(&self.socket_path)?;
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
