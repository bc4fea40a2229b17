//! Server Lifecycle Manager
//!
//! Registry of named diagnostic servers and their live connections.
//! Starting a server performs the initialize handshake; a server only
//! becomes `Running` once that handshake succeeds. Failures mark the
//! server `Crashed` and are reported without affecting other servers.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use cascade_resolver_core::{ServerConfig, ServerInfo, ServerStatus};

use super::backend::LspBackend;
use super::client::{ClientOptions, LspClient};
use super::discovery::ServerDiscovery;
use crate::services::diagnostics::backend::DiagnosticBackend;
use crate::services::diagnostics::stream::{ConnectionEvent, DiagnosticStream};
use crate::utils::error::{AppError, AppResult};

struct ManagedServer {
    info: ServerInfo,
    client: Option<Arc<LspClient>>,
    /// Bumped by every start and stop; a handshake only lands if it still matches
    generation: u64,
}

pub struct ServerManager {
    root: PathBuf,
    options: ClientOptions,
    /// Registered servers, keyed by name
    servers: RwLock<HashMap<String, ManagedServer>>,
    stream: Option<Arc<DiagnosticStream>>,
    discovery: ServerDiscovery,
}

impl ServerManager {
    pub fn new(root: impl Into<PathBuf>, options: ClientOptions) -> Self {
        Self {
            root: root.into(),
            options,
            servers: RwLock::new(HashMap::new()),
            stream: None,
            discovery: ServerDiscovery::new(),
        }
    }

    /// Forward status changes and pushed diagnostics into `stream`.
    pub fn with_stream(mut self, stream: Arc<DiagnosticStream>) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_discovery(mut self, discovery: ServerDiscovery) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Registry ────────────────────────────────────────────────────────

    /// Register a server. Returns `false` if the name is already taken.
    pub async fn register_server(&self, config: ServerConfig) -> AppResult<bool> {
        config.validate()?;
        let mut servers = self.servers.write().await;
        if servers.contains_key(&config.name) {
            warn!(server = %config.name, "Server already registered");
            return Ok(false);
        }
        info!(server = %config.name, connection = ?config.connection_type, "Registered server");
        servers.insert(
            config.name.clone(),
            ManagedServer {
                info: ServerInfo::new(config),
                client: None,
                generation: 0,
            },
        );
        Ok(true)
    }

    /// Stop (if needed) and remove a server. Returns `false` for unknown names.
    pub async fn unregister_server(&self, name: &str) -> bool {
        if !self.stop_server(name).await {
            return false;
        }
        self.servers.write().await.remove(name).is_some()
    }

    /// Current status of a server, or `None` for unknown names.
    pub async fn get_server_info(&self, name: &str) -> Option<ServerInfo> {
        let servers = self.servers.read().await;
        servers.get(name).map(snapshot)
    }

    pub async fn list_servers(&self) -> Vec<ServerInfo> {
        let servers = self.servers.read().await;
        let mut infos: Vec<ServerInfo> = servers.values().map(snapshot).collect();
        infos.sort_by(|a, b| a.config.name.cmp(&b.config.name));
        infos
    }

    /// Register every detected backend not already registered. Returns the
    /// names that were added.
    pub async fn discover_servers(&self) -> Vec<String> {
        let mut added = Vec::new();
        for config in self.discovery.discover() {
            let name = config.name.clone();
            match self.register_server(config).await {
                Ok(true) => added.push(name),
                Ok(false) => {}
                Err(e) => warn!(server = %name, error = %e, "Discovered server has invalid config"),
            }
        }
        added
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Start a server and complete its handshake. Already running or
    /// starting servers are left alone. A stop issued during the handshake
    /// wins: the new connection is shut down and the server stays `Stopped`.
    pub async fn start_server(&self, name: &str) -> AppResult<()> {
        let (config, generation) = {
            let mut servers = self.servers.write().await;
            let server = servers
                .get_mut(name)
                .ok_or_else(|| AppError::not_found(format!("Server '{}' is not registered", name)))?;
            if matches!(server.info.status, ServerStatus::Running | ServerStatus::Starting) {
                return Ok(());
            }
            server.generation += 1;
            server.info.status = ServerStatus::Starting;
            server.info.last_error = None;
            (server.info.config.clone(), server.generation)
        };
        self.publish(name, ServerStatus::Starting, None);

        match LspClient::start(&config, &self.root, self.options).await {
            Ok(client) => {
                let client = Arc::new(client);
                let outcome = {
                    let mut servers = self.servers.write().await;
                    match servers.get_mut(name) {
                        Some(server)
                            if server.generation == generation
                                && server.info.status == ServerStatus::Starting =>
                        {
                            server.info.status = ServerStatus::Running;
                            server.info.started_at = Some(chrono::Utc::now().timestamp_millis());
                            server.info.subscription.active = self.stream.is_some();
                            server.client = Some(Arc::clone(&client));
                            Ok(())
                        }
                        Some(_) => Err(AppError::cancelled(format!(
                            "Server '{}' was stopped while starting",
                            name
                        ))),
                        None => Err(AppError::not_found(format!(
                            "Server '{}' was removed while starting",
                            name
                        ))),
                    }
                };
                if let Err(e) = outcome {
                    info!(server = %name, error = %e, "Discarding connection from superseded start");
                    if let Err(shutdown) = client.shutdown().await {
                        warn!(server = %name, error = %shutdown, "Error during server shutdown");
                    }
                    return Err(e);
                }
                if let Some(stream) = &self.stream {
                    stream.attach_server(name, self.root.clone(), client.subscribe());
                }
                info!(server = %name, "Server running");
                self.publish(name, ServerStatus::Running, None);
                Ok(())
            }
            Err(e) => {
                warn!(server = %name, error = %e, "Server failed to start");
                if !self.is_current_start(name, generation).await {
                    return Err(AppError::cancelled(format!(
                        "Server '{}' was stopped while starting",
                        name
                    )));
                }
                self.mark_crashed(name, e.to_string()).await;
                Err(AppError::backend_unavailable(format!(
                    "Server '{}' failed to start: {}",
                    name, e
                )))
            }
        }
    }

    /// Start every server marked `auto_start`. Returns the names that
    /// reached `Running`.
    pub async fn start_auto_servers(&self) -> Vec<String> {
        let names: Vec<String> = {
            let servers = self.servers.read().await;
            let mut names: Vec<String> = servers
                .values()
                .filter(|s| s.info.config.auto_start)
                .map(|s| s.info.config.name.clone())
                .collect();
            names.sort();
            names
        };
        self.start_many(names).await
    }

    /// Start every registered server. Returns the names that reached
    /// `Running`.
    pub async fn start_all(&self) -> Vec<String> {
        let names = self.server_names().await;
        self.start_many(names).await
    }

    async fn start_many(&self, names: Vec<String>) -> Vec<String> {
        let results =
            futures_util::future::join_all(names.iter().map(|name| self.start_server(name))).await;
        names
            .into_iter()
            .zip(results)
            .filter_map(|(name, result)| result.ok().map(|_| name))
            .collect()
    }

    /// Stop a server and release its process or socket. Returns `false`
    /// for unknown names; stopping a stopped server is a no-op.
    pub async fn stop_server(&self, name: &str) -> bool {
        let client = {
            let mut servers = self.servers.write().await;
            let Some(server) = servers.get_mut(name) else {
                return false;
            };
            let was_stopped = server.info.status == ServerStatus::Stopped;
            server.generation += 1;
            server.info.status = ServerStatus::Stopped;
            server.info.subscription.active = false;
            let client = server.client.take();
            if was_stopped && client.is_none() {
                return true;
            }
            client
        };

        if let Some(stream) = &self.stream {
            stream.detach_server(name);
        }
        if let Some(client) = client {
            if let Err(e) = client.shutdown().await {
                warn!(server = %name, error = %e, "Error during server shutdown");
            }
        }
        info!(server = %name, "Server stopped");
        self.publish(name, ServerStatus::Stopped, None);
        true
    }

    /// Stop every server. Safe to call repeatedly.
    pub async fn shutdown_all(&self) {
        let names = self.server_names().await;
        futures_util::future::join_all(names.iter().map(|name| self.stop_server(name))).await;
    }

    /// Poll a running server's liveness; dead servers become `Crashed`.
    /// Returns the resulting status, or `None` for unknown names.
    pub async fn health_check(&self, name: &str) -> Option<ServerStatus> {
        let (status, client) = {
            let servers = self.servers.read().await;
            let server = servers.get(name)?;
            (server.info.status, server.client.clone())
        };
        if status != ServerStatus::Running {
            return Some(status);
        }
        let alive = match &client {
            Some(client) => client.is_alive().await,
            None => false,
        };
        if alive {
            return Some(ServerStatus::Running);
        }

        warn!(server = %name, "Server is no longer responding");
        self.mark_crashed(name, "connection lost".to_string()).await;
        if let Some(client) = client {
            let _ = client.shutdown().await;
        }
        Some(ServerStatus::Crashed)
    }

    pub async fn health_check_all(&self) -> BTreeMap<String, ServerStatus> {
        let mut statuses = BTreeMap::new();
        for name in self.server_names().await {
            if let Some(status) = self.health_check(&name).await {
                statuses.insert(name, status);
            }
        }
        statuses
    }

    /// Diagnostic backends for every running server, ordered by name.
    pub async fn running_backends(&self) -> Vec<Arc<dyn DiagnosticBackend>> {
        let servers = self.servers.read().await;
        let mut running: Vec<(&String, &ManagedServer)> = servers
            .iter()
            .filter(|(_, s)| s.info.status == ServerStatus::Running)
            .collect();
        running.sort_by(|a, b| a.0.cmp(b.0));
        running
            .into_iter()
            .filter_map(|(_, s)| {
                s.client.as_ref().map(|client| {
                    Arc::new(LspBackend::new(s.info.config.clone(), Arc::clone(client)))
                        as Arc<dyn DiagnosticBackend>
                })
            })
            .collect()
    }

    async fn server_names(&self) -> Vec<String> {
        let servers = self.servers.read().await;
        let mut names: Vec<String> = servers.keys().cloned().collect();
        names.sort();
        names
    }

    async fn is_current_start(&self, name: &str, generation: u64) -> bool {
        let servers = self.servers.read().await;
        servers.get(name).is_some_and(|s| {
            s.generation == generation && s.info.status == ServerStatus::Starting
        })
    }

    async fn mark_crashed(&self, name: &str, reason: String) {
        {
            let mut servers = self.servers.write().await;
            if let Some(server) = servers.get_mut(name) {
                server.info.status = ServerStatus::Crashed;
                server.info.subscription.active = false;
                server.info.last_error = Some(reason.clone());
                server.client = None;
            }
        }
        if let Some(stream) = &self.stream {
            stream.detach_server(name);
        }
        self.publish(name, ServerStatus::Crashed, Some(reason));
    }

    fn publish(&self, name: &str, status: ServerStatus, message: Option<String>) {
        if let Some(stream) = &self.stream {
            stream.publish_connection(ConnectionEvent {
                server: name.to_string(),
                status,
                message,
            });
        }
    }
}

fn snapshot(server: &ManagedServer) -> ServerInfo {
    let mut info = server.info.clone();
    if let Some(client) = &server.client {
        info.subscription.notifications_received = client.notifications_received();
    }
    info
}
