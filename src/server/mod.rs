// Herald - Update Server Module
// HTTP API plus UDP discovery responder over one MessageStore

mod handlers;
mod middleware;

pub use handlers::{
    create_router, handle_announcement, handle_download, handle_latest_version,
    handle_messages, handle_version_info, handle_versions, health_check, AppState,
};
pub use middleware::{allow_any_origin, cors_layer};

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::constants::SHUTDOWN_TIMEOUT_SECS;
use crate::config::ServerConfig;
use crate::errors::{ServerError, StoreError};
use crate::messages::Message;
use crate::service::DiscoveryResponder;
use crate::store::{MessageStore, VersionInfo};

/// The full HTTP application: routes plus CORS and request tracing.
pub fn app(store: Arc<MessageStore>) -> axum::Router {
    create_router(store)
        .layer(axum::middleware::map_response(allow_any_origin))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

/// Addresses actually bound by a running server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerAddrs {
    pub http: SocketAddr,
    /// `None` when discovery is disabled
    pub udp: Option<SocketAddr>,
}

struct Running {
    cancel: CancellationToken,
    addrs: ServerAddrs,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

pub struct UpdateServer {
    config: ServerConfig,
    store: Arc<MessageStore>,
    running: Mutex<Option<Running>>,
}

impl UpdateServer {
    /// Open the store under `config.storage_dir`.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let store = Arc::new(MessageStore::open(&config.storage_dir)?);
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: ServerConfig, store: Arc<MessageStore>) -> Self {
        Self {
            config,
            store,
            running: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind both listeners and serve in the background. Idempotent: a second
    /// call returns the addresses already bound.
    ///
    /// Both sockets are bound before anything is spawned, so a bind failure
    /// leaves nothing running.
    pub async fn start(&self) -> Result<ServerAddrs, ServerError> {
        let mut running = self.running.lock().await;
        if let Some(existing) = running.as_ref() {
            return Ok(existing.addrs);
        }

        let http_addr = self
            .config
            .http_addr()
            .map_err(|e| ServerError::InvalidAddress(e.to_string()))?;
        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|source| ServerError::BindFailure {
                kind: "HTTP",
                addr: http_addr,
                source,
            })?;
        let http_local = listener
            .local_addr()
            .map_err(|source| ServerError::BindFailure {
                kind: "HTTP",
                addr: http_addr,
                source,
            })?;

        let responder = if self.config.discovery_enabled {
            let udp_addr = self
                .config
                .udp_addr()
                .map_err(|e| ServerError::InvalidAddress(e.to_string()))?;
            Some(DiscoveryResponder::bind(udp_addr, Arc::clone(&self.store)).await?)
        } else {
            None
        };
        let udp_local = responder.as_ref().and_then(|r| r.local_addr().ok());

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let app = app(Arc::clone(&self.store));
        let shutdown = cancel.clone();
        tasks.push((
            "http",
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
                {
                    tracing::error!("HTTP server error: {e}");
                }
            }),
        ));

        if let Some(responder) = responder {
            tasks.push(("udp", tokio::spawn(responder.run(cancel.clone()))));
        }

        let addrs = ServerAddrs {
            http: http_local,
            udp: udp_local,
        };
        tracing::info!(http = %addrs.http, udp = ?addrs.udp, storage = %self.store.root().display(), "Update server started");

        *running = Some(Running {
            cancel,
            addrs,
            tasks,
        });
        Ok(addrs)
    }

    /// Stop serving. Idempotent. Tasks that do not finish within the
    /// shutdown timeout are aborted.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        running.cancel.cancel();

        let limit = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
        for (name, mut handle) in running.tasks {
            match tokio::time::timeout(limit, &mut handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "Server task finished"),
                Ok(Err(e)) => tracing::warn!(task = name, "Server task failed: {e}"),
                Err(_) => {
                    tracing::warn!(task = name, timeout_secs = SHUTDOWN_TIMEOUT_SECS, "Server task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
        tracing::info!("Update server stopped");
    }

    pub async fn addrs(&self) -> Option<ServerAddrs> {
        self.running.lock().await.as_ref().map(|r| r.addrs)
    }

    pub fn publish_announcement(
        &self,
        title: &str,
        content: &str,
        version: &str,
    ) -> Result<Message, StoreError> {
        self.store.append_announcement(title, content, version)
    }

    pub fn retract_announcement(&self, id: Uuid) -> Result<Message, StoreError> {
        self.store.append_delete(id)
    }

    pub fn publish_version(
        &self,
        version: &str,
        file_path: &Path,
        description: &str,
    ) -> Result<VersionInfo, StoreError> {
        self.store.publish_version(version, file_path, description)
    }
}
