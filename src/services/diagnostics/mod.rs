//! Diagnostics
//!
//! Everything between backend-native diagnostics and `UnifiedError`s:
//! normalization tables, quick-fix synthesis, the scan aggregator and the
//! real-time stream.

pub mod aggregator;
pub mod backend;
pub mod normalize;
pub mod quick_fixes;
pub mod stream;

pub use aggregator::{DiagnosticAggregator, FileScan, ScanReport};
pub use backend::DiagnosticBackend;
pub use normalize::{classify, map_severity, unify, PositionBase, RawDiagnostic, RawSeverity};
pub use stream::{
    ConnectionEvent, DiagnosticFilter, DiagnosticStats, DiagnosticStream, ErrorBatch, ListenerId,
};
