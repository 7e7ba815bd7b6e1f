//! Transport Layer
//!
//! HTTP/1.1 over the snapd Unix socket. Everything below the request
//! ledger lives here:
//!
//! - `config`: socket path, chunk size and polling knobs
//! - `codec`: request serialization and incremental response parsing
//! - `chunked`: in-place reassembly of chunked bodies
//! - `buffer`: the connection's read buffer
//! - `session`: the socket itself
//! - `multipart`: multipart/form-data request bodies

pub mod buffer;
pub mod chunked;
pub mod codec;
pub mod config;
pub mod multipart;
pub mod session;

// Re-exports for convenience
pub use buffer::ReadBuffer;
pub use codec::{serialize_request, try_parse_response, ParseOutcome, ParsedResponse};
pub use config::TransportConfig;
pub use multipart::MultipartForm;
pub use session::{ReadOutcome, SessionEvent, SocketSession};
