//! JSON-RPC 2.0 Messages
//!
//! Request, response, and notification types plus `parse_message`, which
//! classifies an inbound payload. Pure data: nothing here performs I/O.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// The only protocol version tag accepted on the wire.
pub const JSONRPC_VERSION: &str = "2.0";

/// Correlation id. Outbound ids are always numeric; peers may use strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

// ============================================================================
// Message types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    jsonrpc: &'static str,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// LSP: request cancelled by the client
    pub const REQUEST_CANCELLED: i64 = -32800;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Result(Value),
    Error(ResponseError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// `None` only for errors about messages whose id could not be read
    pub id: Option<RequestId>,
    pub outcome: ResponseOutcome,
}

impl Response {
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ResponseOutcome::Error(_))
    }

    pub fn into_result(self) -> Result<Value, ResponseError> {
        match self.outcome {
            ResponseOutcome::Result(value) => Ok(value),
            ResponseOutcome::Error(error) => Err(error),
        }
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("jsonrpc", JSONRPC_VERSION)?;
        map.serialize_entry("id", &self.id)?;
        match &self.outcome {
            ResponseOutcome::Result(value) => map.serialize_entry("result", value)?,
            ResponseOutcome::Error(error) => map.serialize_entry("error", error)?,
        }
        map.end()
    }
}

/// Any inbound or outbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Message {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            Message::Response(_) => None,
        }
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}

impl From<Notification> for Message {
    fn from(n: Notification) -> Self {
        Message::Notification(n)
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse and classify one wire message.
///
/// Fails when the text is not JSON, the version tag is missing or not
/// `"2.0"`, or the object is neither a request, response, nor notification.
pub fn parse_message(text: &str) -> Result<Message, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    parse_value(value)
}

/// Same as [`parse_message`] for an already-decoded JSON value.
pub fn parse_value(value: Value) -> Result<Message, ProtocolError> {
    let mut object = match value {
        Value::Object(map) => map,
        other => {
            return Err(ProtocolError::invalid_shape(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            )))
        }
    };

    check_version(&object)?;

    let id = match object.remove("id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            serde_json::from_value::<RequestId>(raw)
                .map_err(|_| ProtocolError::invalid_shape("id must be a number or string"))?,
        ),
    };

    if let Some(method) = object.remove("method") {
        let method = match method {
            Value::String(m) => m,
            _ => return Err(ProtocolError::invalid_shape("method must be a string")),
        };
        let params = object.remove("params");
        return Ok(match id {
            Some(id) => Message::Request(Request::new(id, method, params)),
            None => Message::Notification(Notification::new(method, params)),
        });
    }

    parse_response(id, object)
}

fn parse_response(id: Option<RequestId>, mut object: Map<String, Value>) -> Result<Message, ProtocolError> {
    let result = object.remove("result");
    let error = object.remove("error");

    let outcome = match (result, error) {
        (Some(result), None) => ResponseOutcome::Result(result),
        (None, Some(error)) | (Some(Value::Null), Some(error)) => {
            let error: ResponseError = serde_json::from_value(error)
                .map_err(|e| ProtocolError::invalid_shape(format!("malformed error object: {}", e)))?;
            ResponseOutcome::Error(error)
        }
        (Some(_), Some(_)) => {
            return Err(ProtocolError::invalid_shape(
                "response carries both result and error",
            ))
        }
        (None, None) => {
            return Err(ProtocolError::invalid_shape(
                "message has neither method nor result/error",
            ))
        }
    };

    if id.is_none() && matches!(outcome, ResponseOutcome::Result(_)) {
        return Err(ProtocolError::invalid_shape("successful response without id"));
    }

    Ok(Message::Response(Response { id, outcome }))
}

fn check_version(object: &Map<String, Value>) -> Result<(), ProtocolError> {
    match object.get("jsonrpc") {
        None => Err(ProtocolError::MissingVersion),
        Some(Value::String(v)) if v == JSONRPC_VERSION => Ok(()),
        Some(Value::String(v)) => Err(ProtocolError::UnsupportedVersion(v.clone())),
        Some(other) => Err(ProtocolError::UnsupportedVersion(other.to_string())),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
