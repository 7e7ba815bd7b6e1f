//! Chunked Transfer Reassembly
//!
//! snapd streams large responses with `Transfer-Encoding: chunked`. A chunked
//! body is only handed on once every chunk, the terminating zero-length chunk
//! and the trailer section are buffered; it is then flattened in place.
//!
//! # Chunk Format
//!
//! ```text
//! <hex-size>[;ext]\r\n
//! <payload>\r\n
//! ...
//! 0\r\n
//! [trailer: value\r\n]*
//! \r\n
//! ```

use thiserror::Error;

use super::codec::MAX_BODY_SIZE;

/// Longest chunk header or trailer line accepted
const MAX_LINE_LEN: usize = 4096;

/// The body violates chunked framing
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("malformed chunked body: {0}")]
pub struct MalformedChunk(pub String);

/// Location of a flattened chunked payload inside its buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Compacted {
    /// Offset of the first payload byte
    pub payload_start: usize,
    /// Number of payload bytes
    pub payload_len: usize,
    /// Bytes of chunk framing and payload to drop from the buffer
    pub total_len: usize,
}

impl Compacted {
    /// Range of the payload inside the buffer
    #[must_use]
    pub fn payload(&self) -> std::ops::Range<usize> {
        self.payload_start..self.payload_start + self.payload_len
    }
}

/// Check whether `body` holds a complete chunked body
///
/// Returns `Ok(false)` while any chunk header, payload, trailing CRLF or the
/// final empty line is still missing.
///
/// # Errors
///
/// Returns `MalformedChunk` for a non-hex chunk size, a payload that is not
/// followed by CRLF, an overlong header line, or a payload larger than
/// [`MAX_BODY_SIZE`].
pub fn have_complete_chunked_body(body: &[u8]) -> Result<bool, MalformedChunk> {
    Ok(scan(body)?.is_some())
}

/// Rewrite a complete chunked body into one contiguous payload
///
/// The first chunk's payload region becomes the landing zone: every later
/// chunk is moved down to follow the previous one. Bytes after
/// `payload_start + payload_len` are left as garbage up to `total_len`.
///
/// # Errors
///
/// Returns `MalformedChunk` if the body is not a complete, well-formed
/// chunked body.
pub fn compact(body: &mut [u8]) -> Result<Compacted, MalformedChunk> {
    let total_len =
        scan(body)?.ok_or_else(|| MalformedChunk("incomplete chunked body".to_string()))?;

    let mut pos = 0;
    let mut payload_start = None;
    let mut payload_len = 0;

    loop {
        let line_end = find_crlf(&body[pos..])
            .ok_or_else(|| MalformedChunk("missing chunk header".to_string()))?;
        let size = parse_size(&body[pos..pos + line_end])?;
        pos += line_end + 2;

        let start = *payload_start.get_or_insert(pos);
        if size == 0 {
            break;
        }

        body.copy_within(pos..pos + size, start + payload_len);
        payload_len += size;
        pos += size + 2;
    }

    Ok(Compacted {
        payload_start: payload_start.unwrap_or(0),
        payload_len,
        total_len,
    })
}

/// Walk the chunks; `Some(total)` once complete
fn scan(body: &[u8]) -> Result<Option<usize>, MalformedChunk> {
    let mut pos = 0;
    let mut payload_total = 0usize;

    loop {
        let Some(line_end) = find_line(&body[pos..])? else {
            return Ok(None);
        };
        let size = parse_size(&body[pos..pos + line_end])?;
        pos += line_end + 2;

        if size == 0 {
            // Trailer section runs up to an empty line
            loop {
                let Some(end) = find_line(&body[pos..])? else {
                    return Ok(None);
                };
                pos += end + 2;
                if end == 0 {
                    return Ok(Some(pos));
                }
            }
        }

        payload_total = payload_total.saturating_add(size);
        if payload_total > MAX_BODY_SIZE {
            return Err(MalformedChunk(format!(
                "chunked body exceeds {MAX_BODY_SIZE} bytes"
            )));
        }

        let payload_end = pos.saturating_add(size);
        if body.len() < payload_end.saturating_add(2) {
            return Ok(None);
        }
        if &body[payload_end..payload_end + 2] != b"\r\n" {
            return Err(MalformedChunk(format!(
                "chunk of {size} bytes not terminated by CRLF"
            )));
        }
        pos = payload_end + 2;
    }
}

/// Length of the line at the front of `data`, if its CRLF has arrived
fn find_line(data: &[u8]) -> Result<Option<usize>, MalformedChunk> {
    match find_crlf(data) {
        Some(end) if end > MAX_LINE_LEN => Err(MalformedChunk("chunk line too long".to_string())),
        Some(end) => Ok(Some(end)),
        None if data.len() > MAX_LINE_LEN => {
            Err(MalformedChunk("chunk line too long".to_string()))
        }
        None => Ok(None),
    }
}

fn parse_size(line: &[u8]) -> Result<usize, MalformedChunk> {
    let text = std::str::from_utf8(line)
        .map_err(|_| MalformedChunk("chunk size is not ASCII".to_string()))?;
    // Chunk extensions are ignored
    let hex = text.split(';').next().unwrap_or_default().trim();
    usize::from_str_radix(hex, 16)
        .map_err(|_| MalformedChunk(format!("invalid chunk size '{hex}'")))
}

pub(crate) fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Encode `payload` as chunks of at most `size` bytes
    fn chunk(payload: &[u8], size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for piece in payload.chunks(size) {
            out.extend_from_slice(format!("{:x}\r\n", piece.len()).as_bytes());
            out.extend_from_slice(piece);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"0\r\n\r\n");
        out
    }

    fn flatten(mut body: Vec<u8>) -> Vec<u8> {
        let compacted = compact(&mut body).unwrap();
        assert_eq!(compacted.total_len, body.len());
        body[compacted.payload()].to_vec()
    }

    #[test]
    fn test_single_chunk() {
        let body = b"5\r\nhello\r\n0\r\n\r\n".to_vec();
        assert!(have_complete_chunked_body(&body).unwrap());
        assert_eq!(flatten(body), b"hello");
    }

    #[test]
    fn test_multiple_chunks_flattened() {
        let body = b"3\r\nabc\r\n4\r\ndefg\r\n1\r\nh\r\n0\r\n\r\n".to_vec();
        assert_eq!(flatten(body), b"abcdefgh");
    }

    #[test]
    fn test_empty_body() {
        let mut body = b"0\r\n\r\n".to_vec();
        let compacted = compact(&mut body).unwrap();
        assert_eq!(compacted.payload_len, 0);
        assert_eq!(compacted.total_len, 5);
    }

    #[test]
    fn test_reassembly_for_every_chunk_size() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(700).collect();
        for size in 1..=payload.len() {
            assert_eq!(flatten(chunk(&payload, size)), payload, "chunk size {size}");
        }
    }

    #[test]
    fn test_incomplete_until_terminator() {
        let full = chunk(b"hello world", 4);
        for cut in 0..full.len() {
            assert!(
                !have_complete_chunked_body(&full[..cut]).unwrap(),
                "complete at {cut}"
            );
        }
        assert!(have_complete_chunked_body(&full).unwrap());
    }

    #[test]
    fn test_trailers_skipped() {
        let mut body = b"2\r\nhi\r\n0\r\nX-Trailer: yes\r\n\r\nNEXT".to_vec();
        let compacted = compact(&mut body).unwrap();
        assert_eq!(&body[compacted.payload()], b"hi");
        assert_eq!(&body[compacted.total_len..], b"NEXT");
    }

    #[test]
    fn test_extensions_ignored() {
        let body = b"2;name=value\r\nhi\r\n0\r\n\r\n".to_vec();
        assert_eq!(flatten(body), b"hi");
    }

    #[test]
    fn test_invalid_size() {
        let result = have_complete_chunked_body(b"zz\r\nhi\r\n0\r\n\r\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_oversized_chunk_rejected_before_it_arrives() {
        let header = format!("{:x}\r\n", MAX_BODY_SIZE + 1);
        assert!(have_complete_chunked_body(header.as_bytes()).is_err());

        // Many small chunks adding up past the cap are rejected too
        let half = format!("{:x}\r\n", MAX_BODY_SIZE / 2 + 1);
        let mut body = half.clone().into_bytes();
        body.resize(body.len() + MAX_BODY_SIZE / 2 + 1, b'a');
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(half.as_bytes());
        assert!(have_complete_chunked_body(&body).is_err());
    }

    #[test]
    fn test_endless_chunk_line_rejected() {
        let line = vec![b'1'; MAX_LINE_LEN + 1];
        assert!(have_complete_chunked_body(&line).is_err());
        assert_eq!(have_complete_chunked_body(b"1;ext=12345"), Ok(false));
    }

    #[test]
    fn test_missing_crlf_after_payload() {
        let result = have_complete_chunked_body(b"2\r\nhiXX0\r\n\r\n");
        assert!(result.is_err());
    }
}
