//! Data Models
//!
//! Engine configuration models. The error model itself lives in
//! `cascade-resolver-core`.

pub mod settings;

pub use settings::*;
