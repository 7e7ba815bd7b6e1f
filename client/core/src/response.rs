//! Parsed Responses
//!
//! A `Response` is one fully framed HTTP response: status line, headers and
//! the (de-chunked) body. Interpreting the body is left to the caller, with
//! helpers for snapd's JSON envelope:
//!
//! ```text
//! {"type": "sync",  "status-code": 200, "result": {...}}
//! {"type": "async", "status-code": 202, "change": "42"}
//! {"type": "error", "status-code": 404, "result": {"message": "...", "kind": "..."}}
//! ```

use serde_json::Value;

use crate::error::ClientError;

/// Status line and headers of a response
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseHead {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase, possibly empty
    pub reason: String,
    /// Headers in wire order
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// First value of a header, matched case-insensitively
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A complete response
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// Status line and headers
    pub head: ResponseHead,
    /// Body with any transfer encoding removed
    pub body: Vec<u8>,
}

impl Response {
    /// HTTP status code
    #[must_use]
    pub fn status(&self) -> u16 {
        self.head.status
    }

    /// First value of a header, matched case-insensitively
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.header(name)
    }

    /// Media type of the body without parameters
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
            .map(|v| v.split(';').next().unwrap_or(v).trim())
    }

    /// Parse the body as JSON
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ProtocolError` if the body is not valid JSON.
    pub fn json(&self) -> Result<Value, ClientError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ClientError::ProtocolError(format!("unable to parse JSON response: {e}")))
    }

    /// Interpret the body as a snapd envelope and return its `result`
    ///
    /// Documents without a `result` member are returned whole.
    ///
    /// # Errors
    ///
    /// - `ClientError::ProtocolError` if the body is not JSON
    /// - `ClientError::Api` for error envelopes and non-2xx statuses
    pub fn into_result(self) -> Result<Value, ClientError> {
        let mut document = self.json()?;
        check_envelope(self.head.status, &document)?;
        Ok(match document.get_mut("result") {
            Some(result) => result.take(),
            None => document,
        })
    }
}

/// Reject error envelopes
///
/// # Errors
///
/// Returns `ClientError::Api` when the envelope's `type` is `error` or the
/// HTTP status is not 2xx.
pub fn check_envelope(status: u16, document: &Value) -> Result<(), ClientError> {
    let is_error = document.get("type").and_then(Value::as_str) == Some("error");
    if !is_error && (200..300).contains(&status) {
        return Ok(());
    }

    let result = document.get("result");
    let message = result
        .and_then(|r| r.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown error")
        .to_string();
    let kind = result
        .and_then(|r| r.get("kind"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let status_code = document
        .get("status-code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok())
        .unwrap_or(status);

    Err(ClientError::Api {
        status_code,
        kind,
        message,
    })
}
