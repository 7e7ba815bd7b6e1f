//! Assertion Stream Format
//!
//! snapd exchanges signed assertions as `application/x.ubuntu.assertion`
//! documents: a header block, an optional body whose size is given by the
//! `body-length` header, and a signature. Records are separated by a blank
//! line. Because bodies may themselves contain blank lines, a stream can only
//! be split by honouring `body-length`.

use crate::error::ClientError;

/// Content type of an assertion stream
pub const ASSERTION_CONTENT_TYPE: &str = "application/x.ubuntu.assertion";

/// Join assertions into a request body
#[must_use]
pub fn encode(assertions: &[String]) -> Vec<u8> {
    assertions.join("\n\n").into_bytes()
}

/// Split an assertion stream into its records
///
/// # Errors
///
/// Returns `ClientError::ProtocolError` if the stream is not valid UTF-8 or a
/// `body-length` header is not a number.
pub fn split(stream: &[u8]) -> Result<Vec<String>, ClientError> {
    let text = std::str::from_utf8(stream)
        .map_err(|e| ClientError::ProtocolError(format!("assertion stream is not UTF-8: {e}")))?;

    let mut assertions = Vec::new();
    let mut offset = 0;

    while offset < text.len() {
        let start = offset;

        // Header block ends at the first blank line
        let headers_end = find_separator(text, offset).unwrap_or(text.len());
        offset = (headers_end + 2).min(text.len());

        let body_length = header_value(&text[start..headers_end], "body-length")
            .map(|v| {
                v.parse::<usize>().map_err(|_| {
                    ClientError::ProtocolError(format!("invalid assertion body-length '{v}'"))
                })
            })
            .transpose()?
            .unwrap_or(0);
        if body_length > 0 {
            offset = offset
                .saturating_add(body_length)
                .saturating_add(2)
                .min(text.len());
        }

        // Signature runs to the next blank line
        let end = find_separator(text, offset).unwrap_or(text.len());
        assertions.push(text[start..end].to_string());
        offset = end + 2;
    }

    Ok(assertions)
}

fn find_separator(text: &str, from: usize) -> Option<usize> {
    text.get(from..)?.find("\n\n").map(|pos| from + pos)
}

/// Look up a header in an assertion header block
#[must_use]
pub fn header_value<'a>(headers: &'a str, name: &str) -> Option<&'a str> {
    headers.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == name).then(|| value.trim())
    })
}
