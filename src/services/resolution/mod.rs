//! Fix application and error resolution.

mod applicator;
mod resolver;

pub use applicator::{apply_change, normalize_spacing, FixApplicator};
pub use resolver::{
    can_resolve_error, select_fix, BulkResolution, ErrorResolver, ResolutionPreview,
    ResolutionRecord, ResolutionStats, ResolutionTarget,
};
