//! Request Correlation
//!
//! `RequestTracker` hands out correlation ids for outbound requests and keeps
//! the pending tables in both directions: requests we sent and are waiting
//! on, and requests the peer sent that we still owe a response to. Both
//! tables are `DashMap`s so concurrent tasks can share one tracker.

use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::error::ProtocolError;
use crate::message::{Notification, Request, RequestId, Response, ResponseOutcome};

/// An outbound request awaiting its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: i64,
    pub method: String,
}

#[derive(Debug)]
pub struct RequestTracker {
    next_id: AtomicI64,
    outbound: DashMap<i64, PendingRequest>,
    inbound: DashMap<RequestId, String>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            outbound: DashMap::new(),
            inbound: DashMap::new(),
        }
    }

    /// Build a request with a fresh id and register it as pending.
    ///
    /// The id is never one that is currently pending, even after the counter
    /// wraps.
    pub fn create_request(&self, method: impl Into<String>, params: Option<Value>) -> Request {
        let method = method.into();
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id <= 0 {
                // Wrapped around; restart the sequence.
                let _ = self
                    .next_id
                    .compare_exchange(id + 1, 1, Ordering::Relaxed, Ordering::Relaxed);
                continue;
            }
            let vacant = match self.outbound.entry(id) {
                dashmap::mapref::entry::Entry::Occupied(_) => false,
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(PendingRequest {
                        id,
                        method: method.clone(),
                    });
                    true
                }
            };
            if vacant {
                return Request::new(id, method, params);
            }
        }
    }

    /// Notifications never carry an id and are never tracked.
    pub fn create_notification(&self, method: impl Into<String>, params: Option<Value>) -> Notification {
        Notification::new(method, params)
    }

    /// Record a request received from the peer so it can be answered.
    pub fn track_inbound(&self, request: &Request) {
        self.inbound.insert(request.id.clone(), request.method.clone());
    }

    /// Build a response to a peer request.
    ///
    /// `id` must belong to a tracked inbound request unless
    /// `allow_unsolicited` is set. The inbound entry is consumed.
    pub fn create_response(
        &self,
        id: RequestId,
        outcome: ResponseOutcome,
        allow_unsolicited: bool,
    ) -> Result<Response, ProtocolError> {
        if self.inbound.remove(&id).is_none() && !allow_unsolicited {
            return Err(ProtocolError::UnknownRequestId(id.to_string()));
        }
        Ok(Response {
            id: Some(id),
            outcome,
        })
    }

    /// Match an inbound response against the outbound table, removing the
    /// pending entry.
    pub fn complete(&self, response: &Response) -> Result<PendingRequest, ProtocolError> {
        let id = match &response.id {
            Some(RequestId::Number(n)) => *n,
            Some(other) => return Err(ProtocolError::UnknownRequestId(other.to_string())),
            None => return Err(ProtocolError::UnknownRequestId("null".to_string())),
        };
        match self.outbound.remove(&id) {
            Some((_, pending)) => Ok(pending),
            None => {
                debug!(id, "response for request that is no longer pending");
                Err(ProtocolError::UnknownRequestId(id.to_string()))
            }
        }
    }

    /// Stop waiting on an outbound request (timeout, cancellation).
    pub fn cancel(&self, id: i64) -> Option<PendingRequest> {
        self.outbound.remove(&id).map(|(_, pending)| pending)
    }

    pub fn is_pending(&self, id: i64) -> bool {
        self.outbound.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.outbound.len()
    }

    /// Drop every outbound entry, returning what was pending.
    pub fn drain_pending(&self) -> Vec<PendingRequest> {
        let ids: Vec<i64> = self.outbound.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter_map(|id| self.cancel(id)).collect()
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}
