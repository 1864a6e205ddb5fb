//! Correlation of outgoing requests with their responses

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::protocol::RequestId;
use crate::transport::error::RequestError;

pub(crate) type Outcome = Result<Value, RequestError>;
pub(crate) type Responder = oneshot::Sender<Outcome>;

/// Continuations of requests awaiting a response.
///
/// Each continuation is resolved at most once: resolving, removing and failing
/// all take it out of the table. Once closed, no new entry is accepted.
#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: HashMap<RequestId, Responder>,
    closed: bool,
}

impl PendingRequests {
    /// Registers a continuation, handing it back if the table is closed or the
    /// id is still outstanding
    pub fn insert(&mut self, id: RequestId, responder: Responder) -> Result<(), Responder> {
        if self.closed || self.entries.contains_key(&id) {
            return Err(responder);
        }
        self.entries.insert(id, responder);
        Ok(())
    }

    /// Resolves the continuation for `id`; returns false if there was none
    pub fn resolve(&mut self, id: &RequestId, outcome: Outcome) -> bool {
        match self.entries.remove(id) {
            Some(responder) => {
                // The receiver may have been dropped by a caller that lost interest
                let _ = responder.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drops the continuation for `id` without resolving it
    pub fn remove(&mut self, id: &RequestId) -> Option<Responder> {
        self.entries.remove(id)
    }

    /// Fails every outstanding continuation and refuses further inserts
    pub fn close(&mut self) -> usize {
        self.closed = true;
        let count = self.entries.len();
        for (_, responder) in self.entries.drain() {
            let _ = responder.send(Err(RequestError::ConnectionClosed));
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
