//! Cascade Resolver Core
//!
//! Foundational data model, error types, and collaborator traits for the
//! Cascade Resolver workspace. This crate has no dependency on transports,
//! the async runtime, or the file system.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `diagnostic` - Unified error model (`UnifiedError`, `ComprehensiveErrorList`, ...)
//! - `fix` - Fix proposals and tagged `Change` variants
//! - `context` - Per-error enriched context (`ErrorContext`)
//! - `server` - Backend server configuration and live status
//! - `resolution` - Resolution attempt outcome (`ResolutionResult`)
//! - `codebase` - Symbol-graph / file-access collaborator trait

pub mod codebase;
pub mod context;
pub mod diagnostic;
pub mod error;
pub mod fix;
pub mod resolution;
pub mod server;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Error Model ────────────────────────────────────────────────────────
pub use diagnostic::{ComprehensiveErrorList, ErrorCategory, ErrorLocation, Severity, UnifiedError};
pub use fix::{Change, ErrorFix, EstimatedImpact, FixConfidence};

// ── Context ────────────────────────────────────────────────────────────
pub use context::{ContextStep, ErrorContext};

// ── Servers ────────────────────────────────────────────────────────────
pub use server::{ConnectionType, DiagnosticSubscription, ServerConfig, ServerInfo, ServerStatus};

// ── Resolution ─────────────────────────────────────────────────────────
pub use resolution::ResolutionResult;

// ── Collaborators ──────────────────────────────────────────────────────
pub use codebase::{Codebase, SymbolContext};
