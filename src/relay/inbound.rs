//! Inbound relay: central bus events into tenant queues.
//!
//! Each event is resolved to its tenant's inbound queue through the cache,
//! then the directory. A tenant without a queue is not automatically an
//! error: tenants mid-deletion drop their traffic, and some event types are
//! configured as droppable when the target queue is missing. Everything else
//! unresolvable is raised so the trigger redelivers.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::directory::{QueueDescriptor, QueueDirection, QueueDirectory};
use crate::error::{BridgeError, Result};
use crate::ledger::{AuditKey, AuditLedger};
use crate::transport::QueueTransport;

use super::cache::QueueCache;
use super::event::{BusEvent, QueueRecord};

/// What happened to one relayed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundDisposition {
    Delivered,
    /// Tenant has a DELETE audit row; its traffic is dropped.
    DroppedDeleting,
    /// (source, detail-type) is configured as droppable when the queue is
    /// missing.
    DroppedIgnored,
}

pub struct InboundRelay {
    cache: QueueCache,
    directory: Arc<QueueDirectory>,
    ledger: Arc<AuditLedger>,
    transport: Arc<dyn QueueTransport>,
    config: Arc<BridgeConfig>,
}

impl InboundRelay {
    pub fn new(
        directory: Arc<QueueDirectory>,
        ledger: Arc<AuditLedger>,
        transport: Arc<dyn QueueTransport>,
        config: Arc<BridgeConfig>,
    ) -> Self {
        let cache = QueueCache::new(config.cache_ttl_secs, config.cache_capacity);
        Self {
            cache,
            directory,
            ledger,
            transport,
            config,
        }
    }

    /// Relay one bus event to its tenant's inbound queue.
    pub async fn relay_event(&self, event: &BusEvent) -> Result<InboundDisposition> {
        let tenant_id = event.tenant_id()?;

        let queue = match self.resolve_queue(&tenant_id) {
            Some(queue) => queue,
            None => return self.handle_missing_queue(&tenant_id, event),
        };

        let body = serde_json::to_string(event)?;
        match self.transport.send_message(&queue.url, &body).await {
            Ok(()) => {
                debug!(tenant_id = %tenant_id, queue_url = %queue.url, "Event delivered");
                Ok(InboundDisposition::Delivered)
            }
            Err(e) => {
                // The cached queue may be stale (deleted underneath us).
                // Evict and re-check before giving up.
                self.cache.evict(&tenant_id);
                if self.tenant_is_deleting(&tenant_id) {
                    info!(tenant_id = %tenant_id, "Send failed for deleting tenant, dropping event");
                    return Ok(InboundDisposition::DroppedDeleting);
                }
                warn!(tenant_id = %tenant_id, error = %e, "Send to tenant queue failed");
                Err(e)
            }
        }
    }

    /// Replay a batch of records whose bodies are bus events (dead-letter
    /// redrive). Items are processed independently; successfully relayed
    /// items are deleted from the source queue, and the remainder is
    /// reported through `BatchFailed` so the source redelivers only those.
    pub async fn relay_batch(&self, records: &[QueueRecord]) -> Result<()> {
        let mut delivered: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();

        for record in records {
            let outcome = match serde_json::from_str::<BusEvent>(&record.body) {
                Ok(event) => self.relay_event(&event).await.map(|_| ()),
                Err(e) => Err(BridgeError::Serialization(e)),
            };
            match outcome {
                Ok(()) => delivered.push(record.receipt_handle.clone()),
                Err(e) => {
                    warn!(
                        message_id = %record.message_id,
                        error = %e,
                        "Batch item failed, leaving for redelivery"
                    );
                    failed.push(record.receipt_handle.clone());
                }
            }
        }

        if !delivered.is_empty() {
            if let Some(source_arn) = records.first().map(|r| r.source_arn.as_str()) {
                let queue_url = self.source_queue_url(source_arn).await?;
                self.transport
                    .delete_message_batch(&queue_url, &delivered)
                    .await?;
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::BatchFailed {
                failed_receipts: failed,
            })
        }
    }

    fn resolve_queue(&self, tenant_id: &str) -> Option<QueueDescriptor> {
        if let Some(queue) = self.cache.get(tenant_id) {
            return Some(queue);
        }
        let queue = self.directory.get_queue(tenant_id, QueueDirection::Inbound)?;
        self.cache.insert(tenant_id, queue.clone());
        Some(queue)
    }

    fn handle_missing_queue(
        &self,
        tenant_id: &str,
        event: &BusEvent,
    ) -> Result<InboundDisposition> {
        if self.tenant_is_deleting(tenant_id) {
            info!(tenant_id = %tenant_id, "Tenant is deleting, dropping event");
            return Ok(InboundDisposition::DroppedDeleting);
        }
        if self.config.can_ignore_event(&event.source, &event.detail_type) {
            info!(
                tenant_id = %tenant_id,
                source = %event.source,
                detail_type = %event.detail_type,
                "No queue and event type is droppable, dropping"
            );
            return Ok(InboundDisposition::DroppedIgnored);
        }
        Err(BridgeError::UnresolvedTenant(tenant_id.to_string()))
    }

    /// A DELETE audit row with any status marks the tenant as deleting or
    /// deleted.
    fn tenant_is_deleting(&self, tenant_id: &str) -> bool {
        self.ledger
            .get_status(tenant_id, &AuditKey::delete())
            .is_some()
    }

    async fn source_queue_url(&self, source_arn: &str) -> Result<String> {
        let queue_name = source_arn.rsplit(':').next().ok_or_else(|| {
            BridgeError::BadRequest(format!("malformed source arn: {source_arn}"))
        })?;
        self.transport.queue_url(queue_name).await
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &QueueCache {
        &self.cache
    }
}
