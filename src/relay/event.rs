//! Wire shapes crossing the relay: bus events and queue batch records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, Result};

/// An event as delivered by the central bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    #[serde(default)]
    pub id: String,
    pub source: String,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    pub detail: Value,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resources: Vec<String>,
}

impl BusEvent {
    /// Tenant id carried by the event. Looked up in precedence order:
    /// `detail.tenantId`, then `detail.OldImage.tenantId`, then
    /// `detail.NewImage.tenantId` (change-capture events carry the id inside
    /// their before/after images). First match wins.
    pub fn tenant_id(&self) -> Result<String> {
        let candidates = [
            self.detail.get("tenantId"),
            self.detail.get("OldImage").and_then(|v| v.get("tenantId")),
            self.detail.get("NewImage").and_then(|v| v.get("tenantId")),
        ];
        candidates
            .into_iter()
            .flatten()
            .find_map(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or(BridgeError::MissingTenantId)
    }
}

/// One item of a queue receive batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRecord {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    /// Identity of the principal that sent the message, as stamped by the
    /// queue service: `<principal>:<session-name>`.
    pub sender_id: String,
    /// ARN of the queue this record was received from.
    pub source_arn: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(detail: Value) -> BusEvent {
        BusEvent {
            id: "e1".to_string(),
            source: "lms.course".to_string(),
            detail_type: "Course Created".to_string(),
            detail,
            time: None,
            resources: Vec::new(),
        }
    }

    #[test]
    fn test_tenant_from_detail() {
        let e = event(json!({"tenantId": "t1"}));
        assert_eq!(e.tenant_id().unwrap(), "t1");
    }

    #[test]
    fn test_precedence_detail_over_images() {
        let e = event(json!({
            "tenantId": "top",
            "OldImage": {"tenantId": "old"},
            "NewImage": {"tenantId": "new"}
        }));
        assert_eq!(e.tenant_id().unwrap(), "top");
    }

    #[test]
    fn test_precedence_old_image_over_new() {
        let e = event(json!({
            "OldImage": {"tenantId": "old"},
            "NewImage": {"tenantId": "new"}
        }));
        assert_eq!(e.tenant_id().unwrap(), "old");
    }

    #[test]
    fn test_new_image_as_last_resort() {
        let e = event(json!({"NewImage": {"tenantId": "new"}}));
        assert_eq!(e.tenant_id().unwrap(), "new");
    }

    #[test]
    fn test_missing_tenant_id() {
        let e = event(json!({"other": 1}));
        assert!(matches!(e.tenant_id(), Err(BridgeError::MissingTenantId)));
    }

    #[test]
    fn test_detail_type_field_name() {
        let e: BusEvent = serde_json::from_value(json!({
            "source": "lms.course",
            "detail-type": "Course Created",
            "detail": {"tenantId": "t1"}
        }))
        .unwrap();
        assert_eq!(e.detail_type, "Course Created");
    }
}
