//! Integration Tests Module
//!
//! End-to-end tests over temporary projects: scanning and deduplication,
//! fix resolution, the socket LSP transport and the real-time stream.

// Shared backends and project helpers
mod support;

// Scanning, deduplication and the unused-import scenario
mod scan_test;

// Fix selection, rollback and bulk resolution
mod resolution_test;

// Fake language server over a loopback TCP socket
mod lsp_socket_test;

// Real-time stream listener decoupling
mod stream_test;
