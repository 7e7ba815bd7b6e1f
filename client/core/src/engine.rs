//! Protocol Engine
//!
//! Sans-IO state machine for one snapd connection. The engine owns the read
//! buffer and the inflight ledger; it never touches a socket or a clock.
//! Every input returns the [`Action`]s the driver must perform, in order.
//!
//! # Inputs
//!
//! | Input                | Source                                    |
//! |----------------------|-------------------------------------------|
//! | `submit*`, `cancel`  | caller commands                           |
//! | `receive`            | bytes read from the socket                |
//! | `connection_closed`  | zero-byte read                            |
//! | `read_failed` etc.   | socket errors                             |
//! | `poll_due`           | a timer armed by `SchedulePoll` fired     |
//!
//! # Transport Failures
//!
//! Any failure tears the connection down. Simple requests queued on it fail
//! with the error; tracked requests that already know their operation ID
//! survive and poll again over a fresh connection, which is opened lazily by
//! the next write.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::config::RequestSettings;
use crate::error::ClientError;
use crate::ledger::{Entry, Ledger, Origin, RequestKind};
use crate::operation::{
    abort_request, accepted_operation_id, parse_snapshot, status_request, OperationResult,
    OperationSnapshot,
};
use crate::poller::{CancelStep, SnapshotStep, SubRequest, TrackedPhase, TrackedState};
use crate::request::{RequestDescriptor, RequestId, RequestIds};
use crate::response::Response;
use crate::transport::buffer::ReadBuffer;
use crate::transport::codec::{self, ParseOutcome};
use crate::transport::config::TransportConfig;

/// Final outcome of a caller's request
#[derive(Clone, Debug, PartialEq)]
pub enum Completion {
    /// Outcome of a simple request
    Response(Result<Response, ClientError>),
    /// Outcome of a tracked request
    Operation(Result<OperationResult, ClientError>),
}

/// Work the driver performs for the engine
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Open the socket before the following writes
    Connect,
    /// Write a serialized request
    Write {
        /// Request (or sub-request) being written
        id: RequestId,
        /// Wire bytes
        bytes: Vec<u8>,
    },
    /// Arm (or re-arm) the poll timer of a tracked request
    SchedulePoll {
        /// Tracked request
        id: RequestId,
        /// Delay before calling [`Engine::poll_due`]
        after: Duration,
    },
    /// Disarm the poll timer of a tracked request
    CancelPoll {
        /// Tracked request
        id: RequestId,
    },
    /// Close the socket
    Disconnect,
    /// Report a changed snapshot of a tracked request
    Progress {
        /// Tracked request
        id: RequestId,
        /// New snapshot
        snapshot: OperationSnapshot,
    },
    /// Deliver the single completion of a caller's request
    Complete {
        /// Request being completed
        id: RequestId,
        /// Its outcome
        outcome: Completion,
    },
}

/// Engine settings taken from [`TransportConfig`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// `Host` header value
    pub host: String,
    /// Delay between status polls
    pub poll_interval: Duration,
    /// Consecutive transport failures tolerated while polling
    pub max_poll_failures: u32,
}

impl From<&TransportConfig> for EngineConfig {
    fn from(config: &TransportConfig) -> Self {
        Self {
            host: config.host.clone(),
            poll_interval: config.poll_interval(),
            max_poll_failures: config.max_poll_failures,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

/// Protocol state of one connection
pub struct Engine {
    config: EngineConfig,
    settings: Arc<RwLock<RequestSettings>>,
    ids: RequestIds,
    ledger: Ledger,
    buffer: ReadBuffer,
    connected: bool,
    actions: Vec<Action>,
}

impl Engine {
    /// Create an engine
    ///
    /// `ids` must be shared with whoever allocates caller request IDs so
    /// internal sub-requests never collide with them.
    pub fn new(
        config: EngineConfig,
        settings: Arc<RwLock<RequestSettings>>,
        ids: RequestIds,
    ) -> Self {
        Self {
            config,
            settings,
            ids,
            ledger: Ledger::new(),
            buffer: ReadBuffer::new(),
            connected: false,
            actions: Vec::new(),
        }
    }

    /// Whether the engine considers the connection open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Treat the connection as open without asking for a connect
    ///
    /// Used when the session starts from an already connected stream.
    pub fn adopt_connection(&mut self) {
        self.connected = true;
    }

    /// Requests sent and not yet complete, including internal sub-requests
    #[must_use]
    pub fn inflight(&self) -> usize {
        self.ledger.len()
    }

    /// Whether a caller's request is still inflight
    #[must_use]
    pub fn contains(&self, id: RequestId) -> bool {
        self.ledger.get(id).is_some()
    }

    /// Phase of a tracked request still inflight
    #[must_use]
    pub fn tracked_phase(&self, id: RequestId) -> Option<TrackedPhase> {
        match self.ledger.get(id)?.kind {
            RequestKind::Tracked(ref state) => Some(state.phase()),
            RequestKind::Simple(_) => None,
        }
    }

    // =========================================================================
    // Caller Inputs
    // =========================================================================

    /// Send a simple request
    pub fn submit(&mut self, id: RequestId, request: &RequestDescriptor) -> Vec<Action> {
        self.send(Entry::simple(id), request);
        self.take_actions()
    }

    /// Send a request whose response carries an operation ID to track
    pub fn submit_tracked(&mut self, id: RequestId, request: &RequestDescriptor) -> Vec<Action> {
        self.send(Entry::tracked(id), request);
        self.take_actions()
    }

    /// Cancel a caller's request
    ///
    /// Simple requests complete immediately with `Cancelled`. Tracked
    /// requests ask the server to abort and complete when it reports ready.
    pub fn cancel(&mut self, id: RequestId) -> Vec<Action> {
        let Some(entry) = self.ledger.get_mut(id) else {
            tracing::debug!(request = %id, "Cancel for request no longer inflight");
            return self.take_actions();
        };

        let send_abort = match entry.kind {
            RequestKind::Simple(Origin::Caller) => {
                if !entry.cancelled {
                    entry.cancelled = true;
                    tracing::debug!(request = %id, "Request cancelled");
                    self.actions.push(Action::Complete {
                        id,
                        outcome: Completion::Response(Err(ClientError::Cancelled)),
                    });
                }
                false
            }
            RequestKind::Simple(_) => false,
            RequestKind::Tracked(ref mut state) => match state.request_cancel() {
                CancelStep::SendAbort => true,
                CancelStep::Deferred => {
                    tracing::debug!(request = %id, "Abort deferred until operation ID is known");
                    false
                }
                CancelStep::Nothing => false,
            },
        };

        if send_abort {
            self.actions.push(Action::CancelPoll { id });
            self.send_sub_request(id);
        }
        self.take_actions()
    }

    /// Complete everything with `Shutdown` and close the connection
    pub fn shutdown(&mut self) -> Vec<Action> {
        for entry in self.ledger.drain_all() {
            match entry.kind {
                RequestKind::Simple(Origin::Caller) if !entry.cancelled => {
                    self.complete(entry.id, Completion::Response(Err(ClientError::Shutdown)));
                }
                RequestKind::Simple(_) => {}
                RequestKind::Tracked(_) => {
                    self.actions.push(Action::CancelPoll { id: entry.id });
                    self.complete(entry.id, Completion::Operation(Err(ClientError::Shutdown)));
                }
            }
        }
        if self.connected {
            self.connected = false;
            self.actions.push(Action::Disconnect);
        }
        self.buffer.clear();
        self.take_actions()
    }

    // =========================================================================
    // Socket and Timer Inputs
    // =========================================================================

    /// Bytes arrived on the socket
    pub fn receive(&mut self, data: &[u8]) -> Vec<Action> {
        self.buffer.extend(data);
        self.process_buffer(false);
        self.take_actions()
    }

    /// The server closed the connection
    ///
    /// Completes a response delimited by the close, then tears down.
    pub fn connection_closed(&mut self) -> Vec<Action> {
        self.process_buffer(true);
        if self.connected {
            tracing::info!("snapd closed the connection");
            self.teardown(&ClientError::connection_closed());
        }
        self.take_actions()
    }

    /// Reading from the socket failed
    pub fn read_failed(&mut self, error: ClientError) -> Vec<Action> {
        self.teardown(&error);
        self.take_actions()
    }

    /// Connecting the socket failed
    pub fn connect_failed(&mut self, error: ClientError) -> Vec<Action> {
        self.teardown(&error);
        self.take_actions()
    }

    /// Writing to the socket failed
    pub fn write_failed(&mut self, error: ClientError) -> Vec<Action> {
        self.teardown(&error);
        self.take_actions()
    }

    /// The poll timer of a tracked request fired
    pub fn poll_due(&mut self, id: RequestId) -> Vec<Action> {
        let due = matches!(
            self.ledger.get(id),
            Some(Entry { kind: RequestKind::Tracked(state), .. }) if state.needs_poll()
        );
        if due {
            self.send_sub_request(id);
        }
        self.take_actions()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }

    fn complete(&mut self, id: RequestId, outcome: Completion) {
        self.actions.push(Action::Complete { id, outcome });
    }

    fn serialize(&self, request: &RequestDescriptor) -> Result<Vec<u8>, ClientError> {
        let settings = self.settings.read();
        codec::serialize_request(request, &settings, &self.config.host)
    }

    fn write(&mut self, id: RequestId, bytes: Vec<u8>) {
        if !self.connected {
            self.connected = true;
            self.actions.push(Action::Connect);
        }
        self.actions.push(Action::Write { id, bytes });
    }

    fn send(&mut self, entry: Entry, request: &RequestDescriptor) {
        let id = entry.id;
        match self.serialize(request) {
            Ok(bytes) => {
                tracing::debug!(
                    request = %id,
                    method = %request.method,
                    path = %request.path,
                    "Sending request"
                );
                self.ledger.push(entry);
                self.write(id, bytes);
            }
            Err(e) => {
                let outcome = match entry.kind {
                    RequestKind::Tracked(_) => Completion::Operation(Err(e)),
                    RequestKind::Simple(_) => Completion::Response(Err(e)),
                };
                self.complete(id, outcome);
            }
        }
    }

    /// Send the next status poll or abort for a tracked request
    fn send_sub_request(&mut self, parent: RequestId) {
        let Some(Entry {
            kind: RequestKind::Tracked(state),
            ..
        }) = self.ledger.get_mut(parent)
        else {
            return;
        };
        let Some(operation) = state.operation_id().cloned() else {
            return;
        };

        let (origin, request) = match state.next_sub_request() {
            SubRequest::Status => (Origin::StatusPoll { parent }, status_request(&operation)),
            SubRequest::Abort => {
                tracing::info!(request = %parent, %operation, "Aborting operation");
                (Origin::Abort { parent }, abort_request(&operation))
            }
        };

        match self.serialize(&request) {
            Ok(bytes) => {
                let id = self.ids.allocate();
                self.ledger.push(Entry::with_origin(id, origin));
                self.write(id, bytes);
            }
            Err(e) => self.finish_tracked(parent, Err(e)),
        }
    }

    fn schedule_if_idle(&mut self, id: RequestId) {
        if let Some(Entry {
            kind: RequestKind::Tracked(state),
            ..
        }) = self.ledger.get(id)
        {
            if state.needs_poll() {
                self.actions.push(Action::SchedulePoll {
                    id,
                    after: self.config.poll_interval,
                });
            }
        }
    }

    fn finish_tracked(&mut self, id: RequestId, result: Result<OperationResult, ClientError>) {
        if let Some(mut entry) = self.ledger.remove(id) {
            if let RequestKind::Tracked(ref mut state) = entry.kind {
                state.finish();
            }
        }
        self.actions.push(Action::CancelPoll { id });
        self.complete(id, Completion::Operation(result));
    }

    /// Carve complete responses off the front of the buffer
    fn process_buffer(&mut self, closed: bool) {
        while !self.buffer.is_empty() {
            match codec::try_parse_response(self.buffer.as_mut_slice(), closed) {
                ParseOutcome::Incomplete => break,
                ParseOutcome::Malformed(reason) => {
                    tracing::warn!(%reason, "Malformed response from snapd");
                    self.teardown(&ClientError::ReadFailed(reason));
                    break;
                }
                ParseOutcome::Parsed(parsed) => {
                    self.buffer.consume(parsed.consumed);
                    if (100..200).contains(&parsed.response.status()) {
                        tracing::debug!(
                            status = parsed.response.status(),
                            "Skipping interim response"
                        );
                        continue;
                    }
                    self.dispatch(parsed.response);
                }
            }
        }
    }

    fn dispatch(&mut self, response: Response) {
        let Some(entry) = self.ledger.pop_matching_response() else {
            tracing::warn!(
                status = response.status(),
                "Discarding response with no matching request"
            );
            return;
        };

        tracing::debug!(request = %entry.id, status = response.status(), "Received response");

        match entry.kind {
            RequestKind::Simple(Origin::Caller) => {
                if entry.cancelled {
                    tracing::debug!(request = %entry.id, "Discarding response to cancelled request");
                } else {
                    self.complete(entry.id, Completion::Response(Ok(response)));
                }
            }
            RequestKind::Simple(Origin::StatusPoll { parent }) => {
                self.operation_response(parent, &response, false);
            }
            RequestKind::Simple(Origin::Abort { parent }) => {
                self.operation_response(parent, &response, true);
            }
            RequestKind::Tracked(state) => self.acceptance(entry.id, state, &response),
        }
    }

    /// First response of a tracked request
    fn acceptance(&mut self, id: RequestId, mut state: TrackedState, response: &Response) {
        state.begin_acceptance();
        match accepted_operation_id(response) {
            Ok(operation) => {
                tracing::debug!(request = %id, %operation, "Operation accepted");
                let abort_now = state.accept(operation);
                self.ledger.push(Entry {
                    id,
                    kind: RequestKind::Tracked(state),
                    cancelled: false,
                });
                if abort_now {
                    self.send_sub_request(id);
                } else {
                    self.schedule_if_idle(id);
                }
            }
            Err(e) => {
                state.finish();
                self.complete(id, Completion::Operation(Err(e)));
            }
        }
    }

    /// Response to a status poll or abort
    fn operation_response(&mut self, parent: RequestId, response: &Response, is_abort: bool) {
        let Some(Entry {
            kind: RequestKind::Tracked(state),
            ..
        }) = self.ledger.get_mut(parent)
        else {
            tracing::debug!(request = %parent, "Discarding poll response for finished operation");
            return;
        };
        let Some(operation) = state.operation_id().cloned() else {
            return;
        };
        state.sub_request_answered();

        let step = match parse_snapshot(response, &operation) {
            Ok(snapshot) => state.observe(snapshot),
            Err(e) if is_abort => {
                tracing::warn!(request = %parent, %operation, error = %e, "Abort rejected");
                SnapshotStep::Unchanged
            }
            Err(e) => SnapshotStep::Finished(Err(e)),
        };

        match step {
            SnapshotStep::Finished(result) => self.finish_tracked(parent, result),
            SnapshotStep::Progress(snapshot) => {
                self.actions.push(Action::Progress {
                    id: parent,
                    snapshot,
                });
                self.schedule_if_idle(parent);
            }
            SnapshotStep::Unchanged => self.schedule_if_idle(parent),
        }
    }

    /// Drop the connection and settle every request that depended on it
    fn teardown(&mut self, error: &ClientError) {
        if !self.connected {
            return;
        }
        tracing::warn!(%error, inflight = self.ledger.len(), "Tearing down snapd connection");
        self.connected = false;
        self.buffer.clear();
        self.actions.push(Action::Disconnect);

        let mut lost = Vec::new();
        for entry in self.ledger.drain_for_teardown() {
            match entry.kind {
                RequestKind::Simple(Origin::Caller) => {
                    if !entry.cancelled {
                        self.complete(entry.id, Completion::Response(Err(error.clone())));
                    }
                }
                RequestKind::Simple(Origin::StatusPoll { parent }) => lost.push((parent, false)),
                RequestKind::Simple(Origin::Abort { parent }) => lost.push((parent, true)),
                RequestKind::Tracked(_) => {
                    self.complete(entry.id, Completion::Operation(Err(error.clone())));
                }
            }
        }

        let max_failures = self.config.max_poll_failures;
        for parent in self.ledger.tracked_ids() {
            let losses: Vec<bool> = lost
                .iter()
                .filter(|(p, _)| *p == parent)
                .map(|(_, abort)| *abort)
                .collect();
            if losses.is_empty() {
                continue;
            }

            let give_up = match self.ledger.get_mut(parent) {
                Some(Entry {
                    kind: RequestKind::Tracked(state),
                    ..
                }) => state.sub_requests_lost(losses.contains(&true), max_failures),
                _ => continue,
            };

            if give_up {
                tracing::warn!(request = %parent, "Giving up polling operation");
                self.finish_tracked(parent, Err(error.clone()));
            } else {
                self.schedule_if_idle(parent);
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("connected", &self.connected)
            .field("inflight", &self.ledger.len())
            .field("buffered", &self.buffer.len())
            .finish()
    }
}
