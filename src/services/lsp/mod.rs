//! Language Server Integration
//!
//! JSON-RPC transport to language servers, the server lifecycle manager,
//! and detection of installed servers.

pub mod backend;
pub mod client;
pub mod discovery;
pub mod manager;

pub use backend::{published_to_raw, LspBackend};
pub use client::{ClientOptions, LspClient};
pub use discovery::{KnownServer, ServerDiscovery, KNOWN_SERVERS};
pub use manager::ServerManager;
