//! Utilities
//!
//! Common utilities used throughout the engine.

pub mod error;
pub mod hashing;
pub mod paths;

pub use error::*;
pub use hashing::*;
pub use paths::*;
