//! Content-Length Framing
//!
//! LSP-style `Content-Length: N\r\n\r\n<body>` framing for byte streams.

use crate::error::ProtocolError;

const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// Encode a JSON-RPC message body with a Content-Length header.
pub fn encode_message(body: &str) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut output = Vec::with_capacity(header.len() + body.len());
    output.extend_from_slice(header.as_bytes());
    output.extend_from_slice(body.as_bytes());
    output
}

/// Extract the length from a single header line, if it is a
/// Content-Length header. Header names are case-insensitive.
pub fn parse_content_length(line: &str) -> Option<usize> {
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    value.trim().parse::<usize>().ok()
}

/// Parse one framed message from the front of `input`.
///
/// Returns `Ok(None)` while the frame is incomplete, and
/// `Ok(Some((body, consumed)))` once a whole frame is available.
pub fn decode_message(input: &[u8]) -> Result<Option<(String, usize)>, ProtocolError> {
    let header_end = match find(input, HEADER_SEPARATOR) {
        Some(pos) => pos,
        None => return Ok(None),
    };
    let header = std::str::from_utf8(&input[..header_end])
        .map_err(|_| ProtocolError::Framing("header is not valid UTF-8".to_string()))?;

    let content_length = header
        .split("\r\n")
        .find_map(parse_content_length)
        .ok_or_else(|| ProtocolError::Framing("missing Content-Length header".to_string()))?;

    let body_start = header_end + HEADER_SEPARATOR.len();
    let body_end = body_start + content_length;
    if input.len() < body_end {
        return Ok(None);
    }

    let body = std::str::from_utf8(&input[body_start..body_end])
        .map_err(|_| ProtocolError::Framing("body is not valid UTF-8".to_string()))?
        .to_string();
    Ok(Some((body, body_end)))
}

/// Incremental decoder for a byte stream carrying framed messages.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete body, if any. A malformed frame is discarded up to the
    /// end of its header so the stream can resynchronize.
    pub fn next_frame(&mut self) -> Option<Result<String, ProtocolError>> {
        match decode_message(&self.buffer) {
            Ok(Some((body, consumed))) => {
                self.buffer.drain(..consumed);
                Some(Ok(body))
            }
            Ok(None) => None,
            Err(e) => {
                if let Some(pos) = find(&self.buffer, HEADER_SEPARATOR) {
                    self.buffer.drain(..pos + HEADER_SEPARATOR.len());
                } else {
                    self.buffer.clear();
                }
                Some(Err(e))
            }
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
