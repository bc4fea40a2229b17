//! Cascade Resolver
//!
//! Collects diagnostics from language servers and other backends, merges
//! them into one deduplicated error list, enriches errors with code context
//! and applies fixes atomically.
//!
//! - `services` - LSP transport and lifecycle, diagnostics, context,
//!   resolution and the `ResolutionEngine` facade
//! - `models` - Engine configuration
//! - `storage` - Configuration persistence
//! - `utils` - Error type, path and hashing helpers

pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use cascade_resolver_core::{
    Change, ComprehensiveErrorList, ErrorCategory, ErrorContext, ErrorFix, ErrorLocation,
    FixConfidence, ResolutionResult, Severity, UnifiedError,
};
pub use models::settings::{EngineConfig, EngineConfigUpdate};
pub use services::engine::ResolutionEngine;
pub use services::resolution::{BulkResolution, ResolutionPreview, ResolutionStats};
pub use storage::config::ConfigService;
pub use utils::error::{AppError, AppResult};
