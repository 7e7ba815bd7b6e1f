//! Tracked Request State
//!
//! Per-request state machine for requests answered with an operation ID.
//!
//! ```text
//! Sent ──► WaitingOperationId ──► Polling ──► Ready
//!                                   │  ▲
//!                           cancel  ▼  │ (not ready)
//!                                Cancelling ──► Ready
//! ```
//!
//! The state only records decisions; the [`crate::engine::Engine`] turns
//! them into writes and timers. Exactly one of these holds for a tracked
//! request that has its operation ID and is not ready:
//! - a poll timer is scheduled
//! - one or more status/abort sub-requests are outstanding

use crate::error::ClientError;
use crate::operation::{OperationId, OperationResult, OperationSnapshot};

/// Where a tracked request is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackedPhase {
    /// Written; the acceptance response has not arrived
    Sent,
    /// The acceptance response is being examined for an operation ID
    WaitingOperationId,
    /// Polling the operation's status
    Polling,
    /// An abort was requested; still polling until the server reports ready
    Cancelling,
    /// Terminal snapshot seen; the request is complete
    Ready,
}

/// What cancelling a tracked request requires
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelStep {
    /// No operation ID yet; the abort goes out once it arrives
    Deferred,
    /// Send the abort now
    SendAbort,
    /// Already cancelling or finished
    Nothing,
}

/// Which sub-request the next poll tick sends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubRequest {
    /// `GET /v2/changes/{id}`
    Status,
    /// `POST /v2/changes/{id}` with `{"action":"abort"}`
    Abort,
}

/// Result of observing a snapshot
#[derive(Clone, Debug, PartialEq)]
pub enum SnapshotStep {
    /// The operation finished
    Finished(Result<OperationResult, ClientError>),
    /// Not ready and different from the last reported snapshot
    Progress(OperationSnapshot),
    /// Not ready and nothing observable changed
    Unchanged,
}

/// State of one tracked request
#[derive(Clone, Debug)]
pub struct TrackedState {
    phase: TrackedPhase,
    operation_id: Option<OperationId>,
    cancel_requested: bool,
    abort_pending: bool,
    outstanding: u32,
    transport_failures: u32,
    last_reported: Option<OperationSnapshot>,
}

impl Default for TrackedState {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackedState {
    /// State of a freshly submitted tracked request
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: TrackedPhase::Sent,
            operation_id: None,
            cancel_requested: false,
            abort_pending: false,
            outstanding: 0,
            transport_failures: 0,
            last_reported: None,
        }
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> TrackedPhase {
        self.phase
    }

    /// Operation ID, once the server accepted the request
    #[must_use]
    pub fn operation_id(&self) -> Option<&OperationId> {
        self.operation_id.as_ref()
    }

    /// Whether the caller asked to cancel
    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// Status/abort sub-requests currently on the wire
    #[must_use]
    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    /// Whether the acceptance response is still awaited on the main channel
    #[must_use]
    pub fn awaiting_acceptance(&self) -> bool {
        self.operation_id.is_none()
    }

    /// The acceptance response has been matched to this request
    pub fn begin_acceptance(&mut self) {
        self.phase = TrackedPhase::WaitingOperationId;
    }

    /// Record the operation ID
    ///
    /// Returns `true` when a deferred cancel means an abort must go out now
    /// instead of scheduling the first poll.
    pub fn accept(&mut self, id: OperationId) -> bool {
        self.operation_id = Some(id);
        if self.cancel_requested {
            self.phase = TrackedPhase::Cancelling;
            self.abort_pending = true;
            true
        } else {
            self.phase = TrackedPhase::Polling;
            false
        }
    }

    /// Handle a cancel from the caller
    pub fn request_cancel(&mut self) -> CancelStep {
        if self.cancel_requested || self.phase == TrackedPhase::Ready {
            return CancelStep::Nothing;
        }
        self.cancel_requested = true;
        if self.operation_id.is_none() {
            return CancelStep::Deferred;
        }
        self.phase = TrackedPhase::Cancelling;
        self.abort_pending = true;
        CancelStep::SendAbort
    }

    /// Pick and account for the next sub-request
    pub fn next_sub_request(&mut self) -> SubRequest {
        self.outstanding += 1;
        if self.abort_pending {
            self.abort_pending = false;
            SubRequest::Abort
        } else {
            SubRequest::Status
        }
    }

    /// A sub-request's response arrived
    pub fn sub_request_answered(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.transport_failures = 0;
    }

    /// Sub-requests were lost to a transport failure
    ///
    /// Returns `true` once more than `max_failures` consecutive failures have
    /// been seen and the request should give up.
    pub fn sub_requests_lost(&mut self, lost_abort: bool, max_failures: u32) -> bool {
        self.outstanding = 0;
        if lost_abort {
            self.abort_pending = true;
        }
        self.transport_failures += 1;
        self.transport_failures > max_failures
    }

    /// Whether a poll timer should be armed now
    #[must_use]
    pub fn needs_poll(&self) -> bool {
        self.operation_id.is_some() && self.outstanding == 0 && self.phase != TrackedPhase::Ready
    }

    /// Compare a snapshot against the last one reported
    pub fn observe(&mut self, snapshot: OperationSnapshot) -> SnapshotStep {
        if snapshot.ready {
            self.phase = TrackedPhase::Ready;
            let id = self
                .operation_id
                .clone()
                .unwrap_or_else(|| OperationId(snapshot.id.clone()));
            return SnapshotStep::Finished(match snapshot.error {
                Some(ref message) => Err(ClientError::OperationFailed {
                    message: message.clone(),
                }),
                None => Ok(OperationResult {
                    id,
                    data: snapshot.data.clone(),
                    snapshot,
                }),
            });
        }

        if self.last_reported.as_ref() == Some(&snapshot) {
            return SnapshotStep::Unchanged;
        }
        self.last_reported = Some(snapshot.clone());
        SnapshotStep::Progress(snapshot)
    }

    /// Mark the request complete
    pub fn finish(&mut self) {
        self.phase = TrackedPhase::Ready;
    }
}
