//! Server Configuration Model
//!
//! Configuration and live status of analysis backends.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// How the client talks to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Spawned child process, JSON-RPC over stdin/stdout
    Stdio,
    /// Already-running server reachable at `host:port`
    Socket,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    /// Executable for `stdio` servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// `host:port` for `socket` servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub connection_type: ConnectionType,
    #[serde(default)]
    pub auto_start: bool,
    /// Languages this backend can analyze (e.g. "python", "rust")
    #[serde(default)]
    pub languages: Vec<String>,
}

impl ServerConfig {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: Some(command.into()),
            args,
            address: None,
            connection_type: ConnectionType::Stdio,
            auto_start: false,
            languages: Vec::new(),
        }
    }

    pub fn socket(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: None,
            args: Vec::new(),
            address: Some(address.into()),
            connection_type: ConnectionType::Socket,
            auto_start: false,
            languages: Vec::new(),
        }
    }

    pub fn with_languages(mut self, languages: &[&str]) -> Self {
        self.languages = languages.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// An empty language list means "any language".
    pub fn supports_language(&self, language: &str) -> bool {
        self.languages.is_empty() || self.languages.iter().any(|l| l == language)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::config("server name must not be empty"));
        }
        match self.connection_type {
            ConnectionType::Stdio => {
                if self.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
                    return Err(CoreError::config(format!(
                        "stdio server '{}' requires a command",
                        self.name
                    )));
                }
            }
            ConnectionType::Socket => {
                let address = self.address.as_deref().unwrap_or("");
                let valid = address
                    .rsplit_once(':')
                    .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
                    .unwrap_or(false);
                if !valid {
                    return Err(CoreError::config(format!(
                        "socket server '{}' requires a host:port address, got '{}'",
                        self.name, address
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Crashed,
}

impl ServerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ServerStatus::Running)
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStatus::Stopped => write!(f, "stopped"),
            ServerStatus::Starting => write!(f, "starting"),
            ServerStatus::Running => write!(f, "running"),
            ServerStatus::Crashed => write!(f, "crashed"),
        }
    }
}

/// Push-diagnostics subscription state of a running server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticSubscription {
    pub active: bool,
    pub notifications_received: u64,
}

/// Snapshot of a registered server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub config: ServerConfig,
    pub status: ServerStatus,
    #[serde(default)]
    pub subscription: DiagnosticSubscription,
    /// Unix millis of the last successful start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ServerInfo {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            status: ServerStatus::Stopped,
            subscription: DiagnosticSubscription::default(),
            started_at: None,
            last_error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}
