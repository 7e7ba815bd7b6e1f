//! HTTP/1.1 Message Codec
//!
//! Hand-written framing for the subset of HTTP/1.1 snapd speaks on its
//! socket. Requests are serialized in one pass; responses are carved off the
//! front of the read buffer once complete.
//!
//! # Body Length Rules
//!
//! | Headers                      | Body ends                                 |
//! |------------------------------|-------------------------------------------|
//! | `Transfer-Encoding: chunked` | after the zero-length chunk and trailers  |
//! | `Content-Length: n`          | `n` bytes after the header divider        |
//! | status 1xx / 204 / 304       | immediately                               |
//! | neither                      | when the server closes the connection     |
//!
//! Any other transfer encoding is malformed.

use crate::config::RequestSettings;
use crate::error::ClientError;
use crate::request::RequestDescriptor;
use crate::response::{Response, ResponseHead};

use super::chunked;

/// Header/body divider
const DIVIDER: &[u8] = b"\r\n\r\n";

/// Largest header block accepted before giving up on the connection
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Largest response body accepted before giving up on the connection
pub const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// How the end of a response body is found
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyEncoding {
    /// Exactly this many bytes follow the headers
    ContentLength(usize),
    /// Chunked transfer encoding
    Chunked,
    /// Everything until the connection closes
    UntilClose,
}

/// A response carved off the front of the buffer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedResponse {
    /// The response with its body de-chunked
    pub response: Response,
    /// Bytes of header and body framing to drop from the buffer
    pub consumed: usize,
}

/// Result of trying to parse the front of the buffer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    /// More bytes are needed
    Incomplete,
    /// One full response is available
    Parsed(ParsedResponse),
    /// The framing cannot be understood; the connection is unusable
    Malformed(String),
}

/// Serialize a request to wire bytes
///
/// Header order: descriptor headers, body `Content-Type`/`Content-Length`,
/// then `Host`, `Connection`, `User-Agent`, `X-Allow-Interaction`,
/// `Accept-Language` and `Authorization`.
///
/// # Errors
///
/// Returns `ClientError::ProtocolError` if the body cannot be rendered, or if
/// the target or a header would break the request framing (whitespace or
/// control characters in the target, CR or LF in a header).
pub fn serialize_request(
    request: &RequestDescriptor,
    settings: &RequestSettings,
    host: &str,
) -> Result<Vec<u8>, ClientError> {
    let target = request.target();
    if target.is_empty() || target.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(ClientError::ProtocolError(format!(
            "invalid request target {target:?}"
        )));
    }
    let body = request.body.to_bytes()?;

    let mut out = Vec::with_capacity(256 + body.len());
    out.extend_from_slice(request.method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(target.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    for (name, value) in &request.headers {
        push_header(&mut out, name, value)?;
    }

    if let Some(content_type) = request.body.content_type() {
        push_header(&mut out, "Content-Type", &content_type)?;
        push_header(&mut out, "Content-Length", &body.len().to_string())?;
    }

    push_header(&mut out, "Host", host)?;
    push_header(&mut out, "Connection", "keep-alive")?;
    if let Some(ref user_agent) = settings.user_agent {
        push_header(&mut out, "User-Agent", user_agent)?;
    }
    if settings.allow_interaction {
        push_header(&mut out, "X-Allow-Interaction", "true")?;
    }
    push_header(&mut out, "Accept-Language", &settings.accept_language())?;
    if let Some(ref auth) = settings.auth {
        push_header(&mut out, "Authorization", &auth.authorization_header())?;
    }

    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&body);
    Ok(out)
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str) -> Result<(), ClientError> {
    let bad_name = name.is_empty()
        || name
            .bytes()
            .any(|b| b == b':' || b.is_ascii_whitespace() || b.is_ascii_control());
    if bad_name {
        return Err(ClientError::ProtocolError(format!(
            "invalid header name {name:?}"
        )));
    }
    if value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
        return Err(ClientError::ProtocolError(format!(
            "invalid value for header {name}"
        )));
    }

    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
    Ok(())
}

/// Try to parse one response from the front of `buffer`
///
/// `closed` says whether the connection has been observed closed, which is
/// the only way a read-until-close body can be complete. Chunked bodies are
/// flattened in place, so `buffer` is modified once a chunked response is
/// complete.
pub fn try_parse_response(buffer: &mut [u8], closed: bool) -> ParseOutcome {
    let Some(divider) = find_divider(buffer) else {
        if buffer.len() > MAX_HEADER_SIZE {
            return ParseOutcome::Malformed(format!(
                "no header divider in first {MAX_HEADER_SIZE} bytes"
            ));
        }
        return ParseOutcome::Incomplete;
    };
    let header_len = divider + DIVIDER.len();

    let head = match parse_head(&buffer[..divider]) {
        Ok(head) => head,
        Err(reason) => return ParseOutcome::Malformed(reason),
    };
    let encoding = match body_encoding(&head) {
        Ok(encoding) => encoding,
        Err(reason) => return ParseOutcome::Malformed(reason),
    };

    let (body, body_len) = match encoding {
        BodyEncoding::ContentLength(length) => {
            if length > MAX_BODY_SIZE {
                return ParseOutcome::Malformed(format!(
                    "content length {length} exceeds {MAX_BODY_SIZE} bytes"
                ));
            }
            let end = header_len + length;
            if buffer.len() < end {
                return ParseOutcome::Incomplete;
            }
            (buffer[header_len..end].to_vec(), length)
        }
        BodyEncoding::Chunked => {
            let rest = &mut buffer[header_len..];
            match chunked::have_complete_chunked_body(rest) {
                Ok(false) => return ParseOutcome::Incomplete,
                Ok(true) => {}
                Err(e) => return ParseOutcome::Malformed(e.to_string()),
            }
            match chunked::compact(rest) {
                Ok(compacted) => (rest[compacted.payload()].to_vec(), compacted.total_len),
                Err(e) => return ParseOutcome::Malformed(e.to_string()),
            }
        }
        BodyEncoding::UntilClose => {
            let length = buffer.len() - header_len;
            if length > MAX_BODY_SIZE {
                return ParseOutcome::Malformed(format!(
                    "response body exceeds {MAX_BODY_SIZE} bytes"
                ));
            }
            if !closed {
                return ParseOutcome::Incomplete;
            }
            (buffer[header_len..].to_vec(), length)
        }
    };

    ParseOutcome::Parsed(ParsedResponse {
        response: Response { head, body },
        consumed: header_len + body_len,
    })
}

/// Offset of the `\r\n\r\n` divider
#[must_use]
pub fn find_divider(data: &[u8]) -> Option<usize> {
    data.windows(DIVIDER.len()).position(|w| w == DIVIDER)
}

/// Parse the status line and headers (everything before the divider)
///
/// # Errors
///
/// Returns a description of the first framing problem found.
pub fn parse_head(data: &[u8]) -> Result<ResponseHead, String> {
    let text = std::str::from_utf8(data).map_err(|_| "response headers are not UTF-8".to_string())?;
    let mut lines = text.split("\r\n");

    // Status line: HTTP/1.1 200 OK
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(format!("invalid status line '{status_line}'"));
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .filter(|s| (100..1000).contains(s))
        .ok_or_else(|| format!("invalid status line '{status_line}'"))?;
    let reason = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("invalid header line '{line}'"))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(ResponseHead {
        status,
        reason,
        headers,
    })
}

/// Decide how the body of a response is delimited
///
/// # Errors
///
/// Returns a description for unsupported transfer encodings and invalid
/// content lengths.
pub fn body_encoding(head: &ResponseHead) -> Result<BodyEncoding, String> {
    if let Some(encoding) = head.header("Transfer-Encoding") {
        return if encoding.eq_ignore_ascii_case("chunked") {
            Ok(BodyEncoding::Chunked)
        } else {
            Err(format!("unsupported transfer encoding '{encoding}'"))
        };
    }

    if let Some(length) = head.header("Content-Length") {
        return length
            .parse::<usize>()
            .map(BodyEncoding::ContentLength)
            .map_err(|_| format!("invalid content length '{length}'"));
    }

    if (100..200).contains(&head.status) || head.status == 204 || head.status == 304 {
        return Ok(BodyEncoding::ContentLength(0));
    }

    Ok(BodyEncoding::UntilClose)
}
