//! Outbound relay: tenant messages from the shared queue onto the bus.
//!
//! All tenants send through one shared queue, so the tenant a message claims
//! to be from cannot be trusted from the body alone. The queue service
//! stamps each message with the sender's session identity, whose session
//! name embeds the tenant the credentials were issued for; the claimed
//! tenant must match it or the item is rejected.
//!
//! Items move through received, parsed, validated, submitted; a failure at
//! any stage fails that item only. Only submitted items are deleted from the
//! queue, the rest stay for redelivery.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::transport::{BusEventEntry, EventBus, QueueTransport};

use super::event::QueueRecord;

const SENDER_PATTERN: &str = r"^[A-Z0-9]+:(.*)-(inbound|outbound)";

/// Body shape tenants put on the shared outbound queue. Every field is
/// required; a body missing any of them fails to parse and the item stays on
/// the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OutboundBody {
    source: String,
    #[serde(rename = "detail-type")]
    detail_type: String,
    detail: Value,
    time: DateTime<Utc>,
}

/// A fully parsed outbound item: the tenant's body plus the envelope fields
/// identifying where it came from and who sent it.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub relay_arn: String,
    pub queue_arn: String,
    pub source: String,
    pub detail_type: String,
    pub detail: Value,
    pub time: DateTime<Utc>,
    pub sender_id: String,
}

impl OutboundMessage {
    fn claimed_tenant(&self) -> Result<&str> {
        self.detail
            .get("tenantId")
            .and_then(|v| v.as_str())
            .ok_or(BridgeError::MissingTenantId)
    }
}

/// Batch summary, mostly for logging and tests.
#[derive(Debug, Default)]
pub struct OutboundReport {
    pub submitted: usize,
    pub failed: usize,
}

pub struct OutboundRelay {
    bus: Arc<dyn EventBus>,
    transport: Arc<dyn QueueTransport>,
    config: Arc<BridgeConfig>,
    sender_re: Regex,
}

impl OutboundRelay {
    pub fn new(
        bus: Arc<dyn EventBus>,
        transport: Arc<dyn QueueTransport>,
        config: Arc<BridgeConfig>,
    ) -> Self {
        let sender_re = Regex::new(SENDER_PATTERN).unwrap_or_else(|_| {
            // Pattern is a literal; this cannot fail.
            unreachable!()
        });
        Self {
            bus,
            transport,
            config,
            sender_re,
        }
    }

    /// Tenant id embedded in a sender identity
    /// (`<principal>:<tenant>-<direction>-<suffix>`).
    fn sender_tenant<'a>(&self, sender_id: &'a str) -> Result<&'a str> {
        self.sender_re
            .captures(sender_id)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| {
                BridgeError::Validation(format!("unparseable sender identity: {sender_id}"))
            })
    }

    fn parse_and_validate(&self, record: &QueueRecord) -> Result<OutboundMessage> {
        let body: OutboundBody = serde_json::from_str(&record.body)?;
        let message = OutboundMessage {
            relay_arn: self.config.relay_arn.clone(),
            queue_arn: record.source_arn.clone(),
            source: body.source,
            detail_type: body.detail_type,
            detail: body.detail,
            time: body.time,
            sender_id: record.sender_id.clone(),
        };
        let claimed = message.claimed_tenant()?;
        let sender = self.sender_tenant(&record.sender_id)?;
        if claimed != sender {
            warn!(
                message_id = %record.message_id,
                claimed_tenant = %claimed,
                sender_tenant = %sender,
                "Tenant mismatch between message and sender identity, rejecting"
            );
            return Err(BridgeError::Validation(format!(
                "message claims tenant {claimed} but was sent by {sender}"
            )));
        }
        Ok(message)
    }

    fn to_bus_entry(&self, message: &OutboundMessage) -> Result<BusEventEntry> {
        Ok(BusEventEntry {
            source: message.source.clone(),
            detail_type: message.detail_type.clone(),
            detail: serde_json::to_string(&message.detail)?,
            event_bus: self.config.event_bus.clone(),
            time: message.time,
            resources: vec![message.relay_arn.clone(), message.queue_arn.clone()],
        })
    }

    /// Relay one receive batch from the shared outbound queue.
    pub async fn process_batch(&self, records: &[QueueRecord]) -> Result<OutboundReport> {
        let mut failed: Vec<String> = Vec::new();
        let mut valid: Vec<(&QueueRecord, BusEventEntry)> = Vec::new();

        for record in records {
            let entry = self
                .parse_and_validate(record)
                .and_then(|m| self.to_bus_entry(&m));
            match entry {
                Ok(entry) => valid.push((record, entry)),
                Err(e) => {
                    warn!(
                        message_id = %record.message_id,
                        error = %e,
                        "Outbound item rejected, leaving for redelivery"
                    );
                    failed.push(record.receipt_handle.clone());
                }
            }
        }

        let mut submitted: Vec<String> = Vec::new();
        if !valid.is_empty() {
            let entries: Vec<BusEventEntry> = valid.iter().map(|(_, e)| e.clone()).collect();
            let bus_failures = self.bus.put_events(entries).await?;
            let failed_indexes: Vec<usize> = bus_failures.iter().map(|f| f.index).collect();
            for (index, (record, _)) in valid.iter().enumerate() {
                if failed_indexes.contains(&index) {
                    warn!(message_id = %record.message_id, "Bus rejected entry, leaving for redelivery");
                    failed.push(record.receipt_handle.clone());
                } else {
                    submitted.push(record.receipt_handle.clone());
                }
            }
        }

        if !submitted.is_empty() {
            self.transport
                .delete_message_batch(&self.config.outbound_queue_url, &submitted)
                .await?;
            debug!(submitted = submitted.len(), "Deleted relayed messages from outbound queue");
        }

        let report = OutboundReport {
            submitted: submitted.len(),
            failed: failed.len(),
        };
        info!(
            submitted = report.submitted,
            failed = report.failed,
            "Outbound batch processed"
        );

        if failed.is_empty() {
            Ok(report)
        } else {
            Err(BridgeError::BatchFailed {
                failed_receipts: failed,
            })
        }
    }
}
