//! Inflight Request Ledger
//!
//! Ordered record of every request sent on the connection and not yet
//! complete. snapd responses carry no request ID, so a response always
//! belongs to the oldest entry still waiting for one:
//!
//! - simple requests (including cancelled ones, which stay as tombstones
//!   until their response is absorbed)
//! - tracked requests whose operation ID is not known yet
//!
//! Tracked requests with an operation ID stay in the ledger until they are
//! ready but never match a response; their status and abort sub-requests are
//! ordinary simple entries.

use std::collections::VecDeque;

use crate::poller::TrackedState;
use crate::request::RequestId;

/// Who submitted a simple request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// A caller of [`crate::SnapdClient::submit`]
    Caller,
    /// A status poll for a tracked request
    StatusPoll {
        /// The tracked request being polled
        parent: RequestId,
    },
    /// An abort for a tracked request
    Abort {
        /// The tracked request being aborted
        parent: RequestId,
    },
}

/// Kind of a ledger entry
#[derive(Clone, Debug)]
pub enum RequestKind {
    /// One request, one response
    Simple(Origin),
    /// Response carries an operation ID to poll
    Tracked(TrackedState),
}

/// One request in the ledger
#[derive(Clone, Debug)]
pub struct Entry {
    /// Request ID
    pub id: RequestId,
    /// Simple or tracked
    pub kind: RequestKind,
    /// Completed as cancelled; the entry only absorbs its response
    pub cancelled: bool,
}

impl Entry {
    /// A caller's simple request
    #[must_use]
    pub fn simple(id: RequestId) -> Self {
        Self::with_origin(id, Origin::Caller)
    }

    /// A simple request with an explicit origin
    #[must_use]
    pub fn with_origin(id: RequestId, origin: Origin) -> Self {
        Self {
            id,
            kind: RequestKind::Simple(origin),
            cancelled: false,
        }
    }

    /// A caller's tracked request
    #[must_use]
    pub fn tracked(id: RequestId) -> Self {
        Self {
            id,
            kind: RequestKind::Tracked(TrackedState::new()),
            cancelled: false,
        }
    }

    /// Whether the next response on the connection may belong to this entry
    #[must_use]
    pub fn awaits_response(&self) -> bool {
        match self.kind {
            RequestKind::Simple(_) => true,
            RequestKind::Tracked(ref state) => state.awaiting_acceptance(),
        }
    }
}

/// Requests in send order
#[derive(Debug, Default)]
pub struct Ledger {
    entries: VecDeque<Entry>,
}

impl Ledger {
    /// Create an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request that has just been written
    pub fn push(&mut self, entry: Entry) {
        self.entries.push_back(entry);
    }

    /// Remove and return the entry the next response belongs to
    pub fn pop_matching_response(&mut self) -> Option<Entry> {
        let index = self.entries.iter().position(Entry::awaits_response)?;
        self.entries.remove(index)
    }

    /// Look up an entry
    #[must_use]
    pub fn get(&self, id: RequestId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Look up an entry mutably
    pub fn get_mut(&mut self, id: RequestId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Remove an entry
    pub fn remove(&mut self, id: RequestId) -> Option<Entry> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        self.entries.remove(index)
    }

    /// Remove every entry that depended on the connection
    ///
    /// Tracked requests that know their operation ID are kept: the operation
    /// continues on the server and is polled again over a new connection.
    pub fn drain_for_teardown(&mut self) -> Vec<Entry> {
        let (kept, drained): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| {
                matches!(e.kind, RequestKind::Tracked(ref s) if !s.awaiting_acceptance())
            });
        self.entries = kept.into();
        drained
    }

    /// IDs of tracked requests in the ledger
    #[must_use]
    pub fn tracked_ids(&self) -> Vec<RequestId> {
        self.entries
            .iter()
            .filter(|e| matches!(e.kind, RequestKind::Tracked(_)))
            .map(|e| e.id)
            .collect()
    }

    /// Remove everything
    pub fn drain_all(&mut self) -> Vec<Entry> {
        self.entries.drain(..).collect()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationId;

    fn accepted(id: u64) -> Entry {
        let mut entry = Entry::tracked(RequestId(id));
        if let RequestKind::Tracked(ref mut state) = entry.kind {
            state.accept(OperationId(format!("op-{id}")));
        }
        entry
    }

    #[test]
    fn test_fifo_order() {
        let mut ledger = Ledger::new();
        for i in 1..=3 {
            ledger.push(Entry::simple(RequestId(i)));
        }
        for i in 1..=3 {
            assert_eq!(ledger.pop_matching_response().unwrap().id, RequestId(i));
        }
        assert!(ledger.pop_matching_response().is_none());
    }

    #[test]
    fn test_tracked_with_operation_id_skipped() {
        let mut ledger = Ledger::new();
        ledger.push(accepted(1));
        ledger.push(Entry::tracked(RequestId(2)));
        ledger.push(Entry::simple(RequestId(3)));

        assert_eq!(ledger.pop_matching_response().unwrap().id, RequestId(2));
        assert_eq!(ledger.pop_matching_response().unwrap().id, RequestId(3));
        assert!(ledger.pop_matching_response().is_none());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_tombstone_still_matches() {
        let mut ledger = Ledger::new();
        ledger.push(Entry::simple(RequestId(1)));
        ledger.push(Entry::simple(RequestId(2)));
        ledger.get_mut(RequestId(1)).unwrap().cancelled = true;

        let first = ledger.pop_matching_response().unwrap();
        assert_eq!(first.id, RequestId(1));
        assert!(first.cancelled);
        assert_eq!(ledger.pop_matching_response().unwrap().id, RequestId(2));
    }

    #[test]
    fn test_drain_for_teardown_keeps_polled_operations() {
        let mut ledger = Ledger::new();
        ledger.push(Entry::simple(RequestId(1)));
        ledger.push(accepted(2));
        ledger.push(Entry::tracked(RequestId(3)));
        ledger.push(Entry::with_origin(
            RequestId(4),
            Origin::StatusPoll { parent: RequestId(2) },
        ));

        let drained: Vec<_> = ledger.drain_for_teardown().iter().map(|e| e.id).collect();
        assert_eq!(drained, vec![RequestId(1), RequestId(3), RequestId(4)]);
        assert_eq!(ledger.tracked_ids(), vec![RequestId(2)]);
        assert!(ledger.get(RequestId(2)).is_some());
    }

    #[test]
    fn test_remove() {
        let mut ledger = Ledger::new();
        ledger.push(Entry::simple(RequestId(1)));
        ledger.push(Entry::simple(RequestId(2)));
        assert!(ledger.remove(RequestId(1)).is_some());
        assert!(ledger.remove(RequestId(1)).is_none());
        assert_eq!(ledger.pop_matching_response().unwrap().id, RequestId(2));
        assert!(ledger.is_empty());
    }
}
