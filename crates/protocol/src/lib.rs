//! Cascade Resolver Protocol
//!
//! Pure JSON-RPC 2.0 message handling for talking to analysis backends:
//!
//! - `message` - Request / Response / Notification types and `parse_message`
//! - `tracker` - Correlation ids and pending-request tables (`RequestTracker`)
//! - `framing` - Content-Length framing (`encode_message`, `FrameDecoder`)
//! - `error` - `ProtocolError`
//!
//! Nothing in this crate performs I/O; transports live in the main crate.

pub mod error;
pub mod framing;
pub mod message;
pub mod tracker;

pub use error::ProtocolError;
pub use framing::{decode_message, encode_message, parse_content_length, FrameDecoder};
pub use message::{
    parse_message, parse_value, Message, Notification, Request, RequestId, Response,
    ResponseError, ResponseOutcome, JSONRPC_VERSION,
};
pub use tracker::{PendingRequest, RequestTracker};
