//! Bridge configuration
//!
//! Collects the tunables that were environment variables in earlier
//! deployments: relay cache sizing, workflow retry/poll policy, the shared
//! outbound queue identity, and the ignore-list consulted when an inbound
//! event targets a tenant with no queue.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Retry policy for external calls made by lifecycle workflow tasks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts (including the first).
    pub max_attempts: u32,
    /// Fixed delay between attempts, in milliseconds.
    pub interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Configuration for the whole bridge. Files may specify any subset of
/// fields; the rest take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Logical stack name; prefixes per-tenant resource group names.
    pub stack_name: String,

    /// Schema version provisioned resources are stamped with. UPDATE
    /// workflows short-circuit when a tenant is already at this version.
    pub schema_version: String,

    /// Name of the central event bus outbound events are submitted to.
    pub event_bus: String,

    /// ARN of the shared outbound queue all tenants multiplex onto.
    pub outbound_queue_arn: String,

    /// URL of the shared outbound queue.
    pub outbound_queue_url: String,

    /// ARN identifying this relay; stamped into the resources of every bus
    /// event it forwards, alongside the source queue.
    pub relay_arn: String,

    /// Relay queue cache time-to-live in seconds.
    pub cache_ttl_secs: u64,

    /// Relay queue cache capacity (entries).
    pub cache_capacity: usize,

    /// Retry policy for workflow task steps.
    pub task_retry: RetryPolicy,

    /// Poll interval after triggering create/update provisioning, seconds.
    pub create_poll_interval_secs: u64,

    /// Poll interval after triggering teardown, seconds.
    pub delete_poll_interval_secs: u64,

    /// Upper bound on wait/poll iterations before a workflow gives up and
    /// takes the failure-audit path.
    pub max_poll_attempts: u32,

    /// Maximum number of failed CREATE attempts the gateway will re-trigger
    /// before reporting the tenant as permanently failed.
    pub create_max_retries: u32,

    /// Base of the gateway's exponential retry backoff, in minutes. The
    /// n-th retry becomes eligible `factor * 2^n` minutes after the last
    /// audit update.
    pub create_retry_factor_minutes: i64,

    /// source -> detail-types that may be dropped when the target tenant has
    /// no queue. Configuration data, not logic.
    pub events_ignored_when_queue_missing: HashMap<String, Vec<String>>,

    /// Permit tenants unknown to the tenant catalog to provision queues
    /// under a generic client id (development environments).
    pub allow_unregistered_tenants: bool,

    /// Directory ledger/directory snapshots are persisted to.
    pub data_dir: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            stack_name: "queuebridge".to_string(),
            schema_version: "1".to_string(),
            event_bus: "bridge-bus".to_string(),
            outbound_queue_arn: "arn:queue:shared-outbound".to_string(),
            outbound_queue_url: "queue://shared-outbound".to_string(),
            relay_arn: "arn:relay:queuebridge-outbound".to_string(),
            cache_ttl_secs: 300,
            cache_capacity: 256,
            task_retry: RetryPolicy::default(),
            create_poll_interval_secs: 15,
            delete_poll_interval_secs: 30,
            max_poll_attempts: 120,
            create_max_retries: 3,
            create_retry_factor_minutes: 5,
            events_ignored_when_queue_missing: HashMap::new(),
            allow_unregistered_tenants: false,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl BridgeConfig {
    /// Parse the ignore-list from its JSON string form, the shape the
    /// deployment tooling injects: `{"source": ["Detail Type", ...]}`.
    pub fn parse_ignore_list(json: &str) -> crate::error::Result<HashMap<String, Vec<String>>> {
        Ok(serde_json::from_str(json)?)
    }

    /// True when the (source, detail-type) pair may be dropped for a tenant
    /// whose queue is missing.
    pub fn can_ignore_event(&self, source: &str, detail_type: &str) -> bool {
        self.events_ignored_when_queue_missing
            .get(source)
            .map(|types| types.iter().any(|t| t == detail_type))
            .unwrap_or(false)
    }

    pub fn create_poll_interval(&self) -> Duration {
        Duration::from_secs(self.create_poll_interval_secs)
    }

    pub fn delete_poll_interval(&self) -> Duration {
        Duration::from_secs(self.delete_poll_interval_secs)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.cache_capacity == 0 {
            return Err(crate::error::BridgeError::Config(
                "cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.task_retry.max_attempts == 0 {
            return Err(crate::error::BridgeError::Config(
                "task_retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_poll_attempts == 0 {
            return Err(crate::error::BridgeError::Config(
                "max_poll_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.cache_ttl_secs, 300);
        assert_eq!(config.cache_capacity, 256);
        assert_eq!(config.task_retry.max_attempts, 5);
        assert_eq!(config.task_retry.interval_ms, 5_000);
        assert_eq!(config.create_poll_interval_secs, 15);
        assert_eq!(config.delete_poll_interval_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_ignore_list() {
        let parsed =
            BridgeConfig::parse_ignore_list(r#"{"lms.course": ["Course Copied"]}"#).unwrap();
        let mut config = BridgeConfig::default();
        config.events_ignored_when_queue_missing = parsed;

        assert!(config.can_ignore_event("lms.course", "Course Copied"));
        assert!(!config.can_ignore_event("lms.course", "Course Created"));
        assert!(!config.can_ignore_event("lms.user", "Course Copied"));
    }

    #[test]
    fn test_empty_ignore_list_ignores_nothing() {
        let config = BridgeConfig::default();
        assert!(!config.can_ignore_event("any", "thing"));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = BridgeConfig {
            cache_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
