//! snapd Client Core
//!
//! Client transport for the snapd REST API. Requests are pipelined over a
//! single HTTP/1.1 connection on snapd's Unix socket and matched to
//! responses in send order. Requests that start a long-running server
//! operation ("change") are tracked: the client polls the operation until it
//! is ready, reports progress along the way, and aborts it on cancel.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  submit / cancel   ┌──────────────────────────────┐
//! │ SnapdClient  │ ─────────────────► │ Driver task                  │
//! │ (cloneable)  │ ◄───────────────── │  ┌────────┐   ┌───────────┐  │
//! └──────────────┘ completion/progress│  │ Engine │──►│ Session   │──┼──► /run/snapd.socket
//!                                     │  │ Ledger │   │ (tokio)   │  │
//!                                     │  │ Poller │◄──│           │◄─┼───
//!                                     │  └────────┘   └───────────┘  │
//!                                     └──────────────────────────────┘
//! ```
//!
//! The [`Engine`] is synchronous and does no I/O: every input returns a list
//! of [`Action`]s that the driver carries out. That keeps the pipelining,
//! reassembly and polling rules testable without a socket.
//!
//! # Key Types
//!
//! - [`SnapdClient`]: handle used to submit and cancel requests
//! - [`RequestDescriptor`]: method, path, query, headers and body
//! - [`Response`]: a parsed HTTP response
//! - [`OperationSnapshot`]: the state of a tracked operation
//! - [`ClientError`]: how a request can fail
//!
//! # Quick Start
//!
//! ```ignore
//! use snapd_client_core::{load_config, RequestDescriptor, SnapdClient};
//!
//! let client = SnapdClient::new(&load_config()?);
//!
//! // Simple request
//! let snaps = client.send(RequestDescriptor::get("/v2/snaps")).await?;
//!
//! // Tracked request
//! let mut install = client
//!     .submit_tracked(RequestDescriptor::post("/v2/snaps/hello")
//!         .with_json(serde_json::json!({"action": "install"})))
//!     .await?;
//! while let Some(progress) = install.next_progress().await {
//!     println!("{:?}", progress.status);
//! }
//! let result = install.wait().await?;
//! ```
//!
//! # Module Overview
//!
//! - `client`: public handle and the driver task
//! - `engine`: sans-I/O protocol core
//! - `ledger`: inflight requests in send order
//! - `poller`: tracked request state machine
//! - `operation`: operation snapshots and status/abort requests
//! - `transport`: codec, chunked bodies, read buffer, socket session
//! - `config`: configuration loading
//! - `request`, `response`, `error`: request/response types and errors
//! - `auth`, `locale`, `assertions`: header and body helpers

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod assertions;
pub mod auth;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod locale;
pub mod operation;
pub mod poller;
pub mod request;
pub mod response;
pub mod transport;

// Re-export commonly used types at crate root

// Client
pub use client::{PendingRequest, RequestHandle, SnapdClient, TrackedRequest};

// Engine
pub use engine::{Action, Completion, Engine, EngineConfig};

// Requests and responses
pub use auth::AuthData;
pub use error::ClientError;
pub use request::{Body, Method, RequestDescriptor, RequestId, RequestIds};
pub use response::{Response, ResponseHead};

// Operations
pub use operation::{OperationId, OperationResult, OperationSnapshot, TaskProgress};
pub use poller::TrackedPhase;

// Configuration
pub use config::{
    load_config, load_config_from_path, ClientConfig, ConfigError, ConfigOverrides,
    RequestSettings,
};
pub use transport::TransportConfig;
