//! Request Descriptors
//!
//! A `RequestDescriptor` is everything needed to put one request on the
//! wire: method, path, query, extra headers and body. Per-endpoint wrappers
//! build descriptors and hand them to [`crate::SnapdClient`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::assertions::{self, ASSERTION_CONTENT_TYPE};
use crate::error::ClientError;
use crate::transport::multipart::MultipartForm;

/// Request identifier, unique per client instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Allocator of request IDs, shared between client handles and the driver
#[derive(Clone, Debug, Default)]
pub struct RequestIds(Arc<AtomicU64>);

impl RequestIds {
    /// Allocate the next ID
    #[must_use]
    pub fn allocate(&self) -> RequestId {
        RequestId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// HTTP method
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl Method {
    /// Wire representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Body {
    /// No body
    #[default]
    Empty,
    /// A JSON document (`application/json`)
    Json(Value),
    /// Raw bytes with an explicit content type
    Raw {
        /// Value of the `Content-Type` header
        content_type: String,
        /// Body bytes
        bytes: Vec<u8>,
    },
    /// A multipart/form-data form
    Multipart(MultipartForm),
    /// Assertions joined into an `application/x.ubuntu.assertion` stream
    Assertions(Vec<String>),
}

impl Body {
    /// Content type to advertise, if the body has one
    #[must_use]
    pub fn content_type(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Json(_) => Some("application/json".to_string()),
            Self::Raw { content_type, .. } => Some(content_type.clone()),
            Self::Multipart(form) => Some(form.content_type()),
            Self::Assertions(_) => Some(ASSERTION_CONTENT_TYPE.to_string()),
        }
    }

    /// Render the body to bytes
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ProtocolError` if a JSON body cannot be serialized.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ClientError> {
        match self {
            Self::Empty => Ok(Vec::new()),
            Self::Json(value) => serde_json::to_vec(value)
                .map_err(|e| ClientError::ProtocolError(format!("cannot encode body: {e}"))),
            Self::Raw { bytes, .. } => Ok(bytes.clone()),
            Self::Multipart(form) => Ok(form.encode()),
            Self::Assertions(list) => Ok(assertions::encode(list)),
        }
    }

    /// Whether this is [`Body::Empty`]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Everything needed to serialize one request
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    /// HTTP method
    pub method: Method,
    /// Absolute path, e.g. `/v2/snaps`
    pub path: String,
    /// Already-encoded query string without the leading `?`
    pub query: Option<String>,
    /// Extra headers, written before the transport's own headers
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Body,
}

impl RequestDescriptor {
    /// Create a descriptor with no query, headers or body
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    /// GET `path`
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// POST `path`
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// PUT `path`
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    /// DELETE `path`
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Set the query string
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.query = (!query.is_empty()).then_some(query);
        self
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a JSON body
    #[must_use]
    pub fn with_json(mut self, value: Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    /// Set any body
    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Path plus query, as written on the request line
    #[must_use]
    pub fn target(&self) -> String {
        match self.query {
            Some(ref query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}
