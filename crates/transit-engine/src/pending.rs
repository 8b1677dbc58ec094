//! Outbound calls awaiting a response.
//!
//! Every completion path (matching RES, target disconnect, timeout, local
//! shutdown) goes through a removal from this table. Removal is the only
//! arbiter: whichever path removes the entry delivers the single result,
//! and every other path finds it gone and does nothing.

use crate::error::TransitError;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;
use transit_core::Payload;

/// What a caller eventually receives for one call.
pub type CallResult = Result<Payload, TransitError>;

/// Receiving half handed back by [`Transit::request`](crate::Transit::request).
/// Consume it at most once.
pub type ResultReceiver = oneshot::Receiver<CallResult>;

/// One registered, unresolved call.
#[derive(Debug)]
pub struct PendingRequest {
    pub target_node_id: String,
    pub action: String,
    sender: oneshot::Sender<CallResult>,
}

impl PendingRequest {
    pub fn new(
        target_node_id: impl Into<String>,
        action: impl Into<String>,
    ) -> (Self, ResultReceiver) {
        let (sender, receiver) = oneshot::channel();
        let request = Self {
            target_node_id: target_node_id.into(),
            action: action.into(),
            sender,
        };
        (request, receiver)
    }

    /// Hand the result to the caller. Never blocks; returns false when the
    /// caller has already dropped its receiver.
    pub fn deliver(self, result: CallResult) -> bool {
        self.sender.send(result).is_ok()
    }
}

#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<String, PendingRequest>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a call under its correlation ID, refusing duplicates and
    /// enforcing the optional admission limit.
    pub fn register(
        &self,
        id: String,
        request: PendingRequest,
        limit: Option<usize>,
    ) -> Result<(), TransitError> {
        let mut entries = self.entries.lock();
        if let Some(limit) = limit {
            if entries.len() >= limit {
                return Err(TransitError::QueueFull { limit });
            }
        }
        if entries.contains_key(&id) {
            return Err(TransitError::DuplicateRequest(id));
        }
        entries.insert(id, request);
        Ok(())
    }

    /// Remove the entry for `id`. Only the caller that gets `Some` may deliver.
    pub fn resolve(&self, id: &str) -> Option<PendingRequest> {
        self.entries.lock().remove(id)
    }

    /// Remove every call routed to `node_id`.
    pub fn cancel_node(&self, node_id: &str) -> Vec<(String, PendingRequest)> {
        let mut entries = self.entries.lock();
        let ids: Vec<String> = entries
            .iter()
            .filter(|(_, request)| request.target_node_id == node_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| entries.remove(&id).map(|request| (id, request)))
            .collect()
    }

    /// Remove every entry, for local shutdown.
    pub fn drain(&self) -> Vec<(String, PendingRequest)> {
        self.entries.lock().drain().collect()
    }

    /// Whether `id` is still awaiting its result.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Number of unresolved calls.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn register_and_resolve_once() {
        let table = PendingTable::new();
        let (request, mut rx) = PendingRequest::new("node-b", "math.add");
        table.register("c1".into(), request, None).unwrap();
        assert!(table.contains("c1"));

        let entry = table.resolve("c1").unwrap();
        assert!(entry.deliver(Ok(Payload::new(json!(3)))));
        assert!(table.resolve("c1").is_none());
        assert_eq!(rx.try_recv().unwrap().unwrap().int(), 3);
    }

    #[test]
    fn duplicate_ids_are_refused() {
        let table = PendingTable::new();
        let (first, _rx1) = PendingRequest::new("n", "a");
        let (second, _rx2) = PendingRequest::new("n", "a");
        table.register("c1".into(), first, None).unwrap();
        assert!(matches!(
            table.register("c1".into(), second, None),
            Err(TransitError::DuplicateRequest(id)) if id == "c1"
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn admission_limit() {
        let table = PendingTable::new();
        let mut receivers = Vec::new();
        for i in 0..2 {
            let (request, rx) = PendingRequest::new("n", "a");
            receivers.push(rx);
            table.register(format!("c{i}"), request, Some(2)).unwrap();
        }
        let (request, _rx) = PendingRequest::new("n", "a");
        assert!(matches!(
            table.register("c9".into(), request, Some(2)),
            Err(TransitError::QueueFull { limit: 2 })
        ));
        table.resolve("c0");
        let (request, _rx) = PendingRequest::new("n", "a");
        assert!(table.register("c9".into(), request, Some(2)).is_ok());
    }

    #[test]
    fn cancel_only_the_disconnected_node() {
        let table = PendingTable::new();
        let mut receivers = Vec::new();
        for (id, node) in [("c1", "node-b"), ("c2", "node-c"), ("c3", "node-b")] {
            let (request, rx) = PendingRequest::new(node, "a");
            receivers.push(rx);
            table.register(id.into(), request, None).unwrap();
        }
        let mut canceled: Vec<String> = table
            .cancel_node("node-b")
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        canceled.sort();
        assert_eq!(canceled, vec!["c1", "c3"]);
        assert!(table.contains("c2"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn delivery_to_a_dropped_receiver_is_harmless() {
        let (request, rx) = PendingRequest::new("n", "a");
        drop(rx);
        assert!(!request.deliver(Ok(Payload::missing())));
    }

    #[test]
    fn response_and_disconnect_race_has_one_winner() {
        for round in 0..200 {
            let table = Arc::new(PendingTable::new());
            let (request, mut rx) = PendingRequest::new("node-b", "a");
            let id = format!("c{round}");
            table.register(id.clone(), request, None).unwrap();
            let wins = Arc::new(AtomicUsize::new(0));

            let response = {
                let (table, wins, id) = (table.clone(), wins.clone(), id.clone());
                std::thread::spawn(move || {
                    if let Some(entry) = table.resolve(&id) {
                        wins.fetch_add(1, Ordering::SeqCst);
                        entry.deliver(Ok(Payload::new(json!("data"))));
                    }
                })
            };
            let disconnect = {
                let (table, wins) = (table.clone(), wins.clone());
                std::thread::spawn(move || {
                    for (_, entry) in table.cancel_node("node-b") {
                        wins.fetch_add(1, Ordering::SeqCst);
                        entry.deliver(Err(TransitError::NodeDisconnected {
                            node_id: "node-b".into(),
                        }));
                    }
                })
            };
            response.join().unwrap();
            disconnect.join().unwrap();

            assert_eq!(wins.load(Ordering::SeqCst), 1);
            assert!(table.is_empty());
            assert!(rx.try_recv().is_ok());
            assert!(rx.try_recv().is_err());
        }
    }
}
