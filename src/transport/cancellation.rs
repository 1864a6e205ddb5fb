//! Tracking of in-flight inbound requests for `$/cancelRequest`

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::protocol::RequestId;

/// Inbound requests whose handlers have not completed yet.
///
/// Cancelling only flips the request's token; handlers observe it cooperatively.
#[derive(Default)]
pub(crate) struct InFlightRequests {
    entries: HashMap<RequestId, CancellationToken>,
    closed: bool,
}

impl InFlightRequests {
    /// Starts tracking `id`. Returns `None` if the id is already in flight or the
    /// connection is closing.
    pub fn begin(&mut self, id: RequestId) -> Option<CancellationToken> {
        if self.closed || self.entries.contains_key(&id) {
            return None;
        }
        let token = CancellationToken::new();
        self.entries.insert(id, token.clone());
        Some(token)
    }

    /// Marks `id` cancelled; returns false for unknown or completed ids
    pub fn cancel(&mut self, id: &RequestId) -> bool {
        match self.entries.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stops tracking `id`; returns false if it was no longer tracked
    pub fn finish(&mut self, id: &RequestId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Cancels every in-flight request and stops tracking them
    pub fn close(&mut self) -> usize {
        self.closed = true;
        let count = self.entries.len();
        for (_, token) in self.entries.drain() {
            token.cancel();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flips_token_of_tracked_request() {
        let mut in_flight = InFlightRequests::default();
        let token = in_flight.begin(RequestId::Number(1)).unwrap();

        assert!(in_flight.cancel(&RequestId::Number(1)));
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_unknown_or_finished_request_is_noop() {
        let mut in_flight = InFlightRequests::default();
        let token = in_flight.begin(RequestId::Number(1)).unwrap();
        assert!(in_flight.finish(&RequestId::Number(1)));

        assert!(!in_flight.cancel(&RequestId::Number(1)));
        assert!(!in_flight.cancel(&RequestId::from("never-sent")));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn begin_rejects_duplicate_id() {
        let mut in_flight = InFlightRequests::default();
        in_flight.begin(RequestId::Number(9)).unwrap();

        assert!(in_flight.begin(RequestId::Number(9)).is_none());
        assert_eq!(in_flight.len(), 1);
    }

    #[test]
    fn close_cancels_everything() {
        let mut in_flight = InFlightRequests::default();
        let a = in_flight.begin(RequestId::Number(1)).unwrap();
        let b = in_flight.begin(RequestId::Number(2)).unwrap();

        assert_eq!(in_flight.close(), 2);

        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(in_flight.begin(RequestId::Number(3)).is_none());
        assert!(!in_flight.finish(&RequestId::Number(1)));
    }
}
