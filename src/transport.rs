//! Bus and queue transport seams
//!
//! The relay and gateway talk to the outside world through these two traits.
//! Production deployments back them with real bus/queue clients; the
//! in-memory implementations here serve the embedded mode and tests, with
//! failure injection for exercising the partial-batch paths.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};

/// One entry of a put-events batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEventEntry {
    pub source: String,
    pub detail_type: String,
    /// JSON-encoded detail payload.
    pub detail: String,
    pub event_bus: String,
    pub time: chrono::DateTime<chrono::Utc>,
    /// Provenance references stamped on the event (relay and source queue).
    pub resources: Vec<String>,
}

/// Per-entry failure from a put-events batch, index-aligned with the input.
#[derive(Debug, Clone)]
pub struct BusSendFailure {
    pub index: usize,
    pub code: String,
    pub message: String,
}

/// Event bus producer seam. A batch put reports per-entry failures rather
/// than failing wholesale, mirroring FailedEntryCount semantics.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn put_events(&self, entries: Vec<BusEventEntry>) -> Result<Vec<BusSendFailure>>;
}

/// Queue transport seam: send, batch-delete, and name-to-url resolution.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn send_message(&self, queue_url: &str, body: &str) -> Result<()>;

    /// Delete a batch of received messages by receipt handle. Unknown
    /// receipts are ignored.
    async fn delete_message_batch(&self, queue_url: &str, receipt_handles: &[String])
        -> Result<()>;

    async fn queue_url(&self, queue_name: &str) -> Result<String>;
}

/// A message sitting in an in-memory queue.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub receipt_handle: String,
    pub body: String,
}

/// In-memory event bus recording every accepted entry, with injectable
/// per-detail-type failures.
#[derive(Default)]
pub struct InMemoryEventBus {
    accepted: Mutex<Vec<BusEventEntry>>,
    failing_detail_types: Mutex<HashSet<String>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries of subsequent batches with this detail-type are reported as
    /// failed instead of accepted.
    pub fn fail_detail_type(&self, detail_type: &str) {
        self.failing_detail_types
            .lock()
            .insert(detail_type.to_string());
    }

    pub fn accepted(&self) -> Vec<BusEventEntry> {
        self.accepted.lock().clone()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn put_events(&self, entries: Vec<BusEventEntry>) -> Result<Vec<BusSendFailure>> {
        let failing = self.failing_detail_types.lock().clone();
        let mut failures = Vec::new();
        let mut accepted = self.accepted.lock();
        for (index, entry) in entries.into_iter().enumerate() {
            if failing.contains(&entry.detail_type) {
                warn!(detail_type = %entry.detail_type, index = index, "Injected bus entry failure");
                failures.push(BusSendFailure {
                    index,
                    code: "InternalException".to_string(),
                    message: "injected failure".to_string(),
                });
            } else {
                accepted.push(entry);
            }
        }
        Ok(failures)
    }
}

/// In-memory queue transport keyed by queue url.
#[derive(Default)]
pub struct InMemoryQueueTransport {
    queues: DashMap<String, Vec<StoredMessage>>,
    failing_urls: DashMap<String, ()>,
    counter: Mutex<u64>,
}

impl InMemoryQueueTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends to this url fail until the injection is cleared.
    pub fn fail_sends_to(&self, queue_url: &str) {
        self.failing_urls.insert(queue_url.to_string(), ());
    }

    pub fn clear_send_failure(&self, queue_url: &str) {
        self.failing_urls.remove(queue_url);
    }

    pub fn messages(&self, queue_url: &str) -> Vec<StoredMessage> {
        self.queues
            .get(queue_url)
            .map(|q| q.clone())
            .unwrap_or_default()
    }

    /// Seed a message directly into a queue, returning its receipt handle.
    pub fn push_raw(&self, queue_url: &str, body: &str) -> String {
        let receipt = self.next_receipt();
        self.queues
            .entry(queue_url.to_string())
            .or_default()
            .push(StoredMessage {
                receipt_handle: receipt.clone(),
                body: body.to_string(),
            });
        receipt
    }

    fn next_receipt(&self) -> String {
        let mut counter = self.counter.lock();
        *counter += 1;
        format!("receipt-{}", *counter)
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueueTransport {
    async fn send_message(&self, queue_url: &str, body: &str) -> Result<()> {
        if self.failing_urls.contains_key(queue_url) {
            return Err(BridgeError::Transport(format!(
                "send to {queue_url} failed"
            )));
        }
        let receipt = self.next_receipt();
        self.queues
            .entry(queue_url.to_string())
            .or_default()
            .push(StoredMessage {
                receipt_handle: receipt,
                body: body.to_string(),
            });
        debug!(queue_url = %queue_url, "Message sent");
        Ok(())
    }

    async fn delete_message_batch(
        &self,
        queue_url: &str,
        receipt_handles: &[String],
    ) -> Result<()> {
        if let Some(mut queue) = self.queues.get_mut(queue_url) {
            queue.retain(|m| !receipt_handles.contains(&m.receipt_handle));
        }
        Ok(())
    }

    async fn queue_url(&self, queue_name: &str) -> Result<String> {
        Ok(format!("queue://{queue_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(detail_type: &str) -> BusEventEntry {
        BusEventEntry {
            source: "tenant.app".to_string(),
            detail_type: detail_type.to_string(),
            detail: "{}".to_string(),
            event_bus: "bridge-bus".to_string(),
            time: chrono::Utc::now(),
            resources: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_bus_accepts_and_fails_per_entry() {
        let bus = InMemoryEventBus::new();
        bus.fail_detail_type("Bad Type");

        let failures = bus
            .put_events(vec![entry("Good Type"), entry("Bad Type"), entry("Good Type")])
            .await
            .unwrap();

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 1);
        assert_eq!(bus.accepted().len(), 2);
    }

    #[tokio::test]
    async fn test_send_and_delete_batch() {
        let transport = InMemoryQueueTransport::new();
        transport.send_message("queue://q1", "a").await.unwrap();
        transport.send_message("queue://q1", "b").await.unwrap();

        let receipts: Vec<String> = transport
            .messages("queue://q1")
            .into_iter()
            .map(|m| m.receipt_handle)
            .collect();
        transport
            .delete_message_batch("queue://q1", &receipts[..1])
            .await
            .unwrap();

        let remaining = transport.messages("queue://q1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].body, "b");
    }

    #[tokio::test]
    async fn test_send_failure_injection() {
        let transport = InMemoryQueueTransport::new();
        transport.fail_sends_to("queue://q1");

        let err = transport.send_message("queue://q1", "a").await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));

        transport.clear_send_failure("queue://q1");
        transport.send_message("queue://q1", "a").await.unwrap();
        assert_eq!(transport.messages("queue://q1").len(), 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_receipts_is_noop() {
        let transport = InMemoryQueueTransport::new();
        transport.send_message("queue://q1", "a").await.unwrap();
        transport
            .delete_message_batch("queue://q1", &["no-such-receipt".to_string()])
            .await
            .unwrap();
        assert_eq!(transport.messages("queue://q1").len(), 1);
    }
}
