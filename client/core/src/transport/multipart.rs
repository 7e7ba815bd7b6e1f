//! multipart/form-data Encoder
//!
//! Used by upload-shaped operations (sideloading a snap, trying a snap from a
//! directory). The whole form is rendered up front so the request can carry
//! an explicit `Content-Length`.
//!
//! # Layout
//!
//! ```text
//! --<boundary>\r\n
//! Content-Disposition: form-data; name="snap"; filename="x"\r\n
//! Content-Type: application/vnd.snap\r\n
//! \r\n
//! <bytes>\r\n
//! --<boundary>--\r\n
//! ```

use rand::Rng;

/// One field of a form
#[derive(Clone, Debug, PartialEq, Eq)]
struct Part {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    data: Vec<u8>,
}

/// A multipart/form-data body
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultipartForm {
    boundary: String,
    parts: Vec<Part>,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    /// Create an empty form with a random 128-bit boundary
    #[must_use]
    pub fn new() -> Self {
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self::with_boundary(format!("snapd-client-{}", hex::encode(bytes)))
    }

    /// Create an empty form with a fixed boundary
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    /// Add a plain text field
    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part {
            name: name.into(),
            filename: None,
            content_type: None,
            data: value.into().into_bytes(),
        });
        self
    }

    /// Add a file field
    #[must_use]
    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        self.parts.push(Part {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: Some(content_type.into()),
            data,
        });
        self
    }

    /// The boundary separating parts
    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Number of fields in the form
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether the form has no fields
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Value for the request's `Content-Type` header
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Render the form to bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let payload: usize = self.parts.iter().map(|p| p.data.len() + 128).sum();
        let mut out = Vec::with_capacity(payload + self.boundary.len() + 8);

        for part in &self.parts {
            out.extend_from_slice(b"--");
            out.extend_from_slice(self.boundary.as_bytes());
            out.extend_from_slice(b"\r\n");

            out.extend_from_slice(b"Content-Disposition: form-data; name=\"");
            out.extend_from_slice(part.name.as_bytes());
            out.push(b'"');
            if let Some(ref filename) = part.filename {
                out.extend_from_slice(b"; filename=\"");
                out.extend_from_slice(filename.as_bytes());
                out.push(b'"');
            }
            out.extend_from_slice(b"\r\n");

            if let Some(ref content_type) = part.content_type {
                out.extend_from_slice(b"Content-Type: ");
                out.extend_from_slice(content_type.as_bytes());
                out.extend_from_slice(b"\r\n");
            }

            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(&part.data);
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(b"--");
        out.extend_from_slice(self.boundary.as_bytes());
        out.extend_from_slice(b"--\r\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_text_and_file() {
        let form = MultipartForm::with_boundary("XYZ")
            .text("dangerous", "true")
            .file("snap", "x", "application/vnd.snap", b"SNAP".to_vec());

        let encoded = String::from_utf8(form.encode()).unwrap();
        let expected = "--XYZ\r\n\
            Content-Disposition: form-data; name=\"dangerous\"\r\n\
            \r\n\
            true\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"snap\"; filename=\"x\"\r\n\
            Content-Type: application/vnd.snap\r\n\
            \r\n\
            SNAP\r\n\
            --XYZ--\r\n";
        assert_eq!(encoded, expected);
        assert_eq!(form.content_type(), "multipart/form-data; boundary=XYZ");
        assert_eq!(form.len(), 2);
    }

    #[test]
    fn test_random_boundaries_differ() {
        let a = MultipartForm::new();
        let b = MultipartForm::new();
        assert_ne!(a.boundary(), b.boundary());
        assert!(a.is_empty());
        assert_eq!(a.encode(), format!("--{}--\r\n", a.boundary()).into_bytes());
    }
}
