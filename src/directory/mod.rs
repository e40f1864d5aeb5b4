//! Queue directory
//!
//! Metadata registry mapping tenants to their provisioned queues. Each tenant
//! owns at most one metadata row carrying its dedicated inbound queue; the
//! outbound side is a single shared queue all tenants multiplex onto, so
//! outbound descriptors are synthesized at read time rather than stored.
//! Older tenants provisioned before the shared queue existed may still carry
//! dedicated outbound fields; those are reported separately so credential
//! scoping can include the legacy queue.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

/// Direction of a tenant queue, from the integration layer's point of view:
/// inbound queues deliver bus events to the tenant, outbound queues carry
/// tenant messages back to the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueDirection {
    Inbound,
    Outbound,
}

impl fmt::Display for QueueDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueDirection::Inbound => write!(f, "inbound"),
            QueueDirection::Outbound => write!(f, "outbound"),
        }
    }
}

impl FromStr for QueueDirection {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inbound" => Ok(QueueDirection::Inbound),
            "outbound" => Ok(QueueDirection::Outbound),
            other => Err(BridgeError::BadRequest(format!(
                "unknown queue direction: {other}"
            ))),
        }
    }
}

/// A resolvable queue belonging to (or shared with) a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDescriptor {
    pub tenant_id: String,
    pub direction: QueueDirection,
    pub arn: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Per-tenant metadata row written by provisioning's custom-resource handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantMetadata {
    pub tenant_id: String,
    pub client_id: String,
    pub schema_version: String,
    pub inbound_queue_arn: String,
    pub inbound_queue_url: String,
    /// Legacy per-tenant outbound queue, present only on tenants provisioned
    /// before the shared outbound queue. Cleared on update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound_queue_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound_queue_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields the custom-resource handler writes. Everything else on the row is
/// directory bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataUpsert {
    pub tenant_id: String,
    pub client_id: String,
    pub schema_version: String,
    pub inbound_queue_arn: String,
    pub inbound_queue_url: String,
}

/// Registry of tenant queue metadata.
pub struct QueueDirectory {
    metadata: DashMap<String, TenantMetadata>,
    config: Arc<BridgeConfig>,
}

impl QueueDirectory {
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        Self {
            metadata: DashMap::new(),
            config,
        }
    }

    /// Metadata row for a tenant, if provisioned.
    pub fn get_metadata(&self, tenant_id: &str) -> Option<TenantMetadata> {
        self.metadata.get(tenant_id).map(|m| m.clone())
    }

    /// Resolve one queue for a tenant.
    ///
    /// Inbound comes from the metadata row. Outbound is synthesized to point
    /// at the shared outbound queue, and only when the tenant's metadata row
    /// exists: queue existence is metadata-gated in both directions.
    pub fn get_queue(&self, tenant_id: &str, direction: QueueDirection) -> Option<QueueDescriptor> {
        let meta = self.metadata.get(tenant_id)?;
        match direction {
            QueueDirection::Inbound => Some(QueueDescriptor {
                tenant_id: tenant_id.to_string(),
                direction,
                arn: meta.inbound_queue_arn.clone(),
                url: meta.inbound_queue_url.clone(),
                created_at: Some(meta.created_at),
                updated_at: Some(meta.updated_at),
            }),
            QueueDirection::Outbound => Some(self.shared_outbound_descriptor(tenant_id)),
        }
    }

    /// Legacy dedicated outbound queue, for credential scoping only.
    pub fn get_legacy_outbound(&self, tenant_id: &str) -> Option<QueueDescriptor> {
        let meta = self.metadata.get(tenant_id)?;
        let (arn, url) = match (&meta.outbound_queue_arn, &meta.outbound_queue_url) {
            (Some(arn), Some(url)) => (arn.clone(), url.clone()),
            _ => return None,
        };
        Some(QueueDescriptor {
            tenant_id: tenant_id.to_string(),
            direction: QueueDirection::Outbound,
            arn,
            url,
            created_at: Some(meta.created_at),
            updated_at: Some(meta.updated_at),
        })
    }

    /// All queues for a tenant: the dedicated inbound queue plus the shared
    /// outbound synthesis. Empty when the tenant has no metadata.
    pub fn list_queues(&self, tenant_id: &str) -> Vec<QueueDescriptor> {
        let mut queues = Vec::new();
        if let Some(inbound) = self.get_queue(tenant_id, QueueDirection::Inbound) {
            queues.push(inbound);
        }
        if !queues.is_empty() {
            queues.push(self.shared_outbound_descriptor(tenant_id));
        }
        queues
    }

    fn shared_outbound_descriptor(&self, tenant_id: &str) -> QueueDescriptor {
        QueueDescriptor {
            tenant_id: tenant_id.to_string(),
            direction: QueueDirection::Outbound,
            arn: self.config.outbound_queue_arn.clone(),
            url: self.config.outbound_queue_url.clone(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Custom-resource create. Provisioning replays deliver Create for rows
    /// that already exist; fall back to update so replays converge instead of
    /// failing.
    pub fn handle_create(&self, upsert: MetadataUpsert) -> Result<()> {
        if self.metadata.contains_key(&upsert.tenant_id) {
            warn!(tenant_id = %upsert.tenant_id, "Metadata already exists on create, treating as update");
            return self.handle_update(upsert);
        }
        let now = Utc::now();
        let tenant_id = upsert.tenant_id.clone();
        self.metadata.insert(
            tenant_id.clone(),
            TenantMetadata {
                tenant_id: upsert.tenant_id,
                client_id: upsert.client_id,
                schema_version: upsert.schema_version,
                inbound_queue_arn: upsert.inbound_queue_arn,
                inbound_queue_url: upsert.inbound_queue_url,
                outbound_queue_arn: None,
                outbound_queue_url: None,
                created_at: now,
                updated_at: now,
            },
        );
        info!(tenant_id = %tenant_id, "Tenant metadata created");
        Ok(())
    }

    /// Custom-resource update: rewrite the provisioned fields and clear the
    /// legacy outbound columns, migrating the tenant onto the shared queue.
    pub fn handle_update(&self, upsert: MetadataUpsert) -> Result<()> {
        let mut meta = self
            .metadata
            .get_mut(&upsert.tenant_id)
            .ok_or_else(|| BridgeError::NotFound(format!("tenant {}", upsert.tenant_id)))?;
        meta.client_id = upsert.client_id;
        meta.schema_version = upsert.schema_version;
        meta.inbound_queue_arn = upsert.inbound_queue_arn;
        meta.inbound_queue_url = upsert.inbound_queue_url;
        meta.outbound_queue_arn = None;
        meta.outbound_queue_url = None;
        meta.updated_at = Utc::now();
        info!(tenant_id = %meta.tenant_id, schema_version = %meta.schema_version, "Tenant metadata updated");
        Ok(())
    }

    /// Custom-resource delete. Idempotent: deleting an absent row succeeds.
    pub fn handle_delete(&self, tenant_id: &str) {
        if self.metadata.remove(tenant_id).is_some() {
            info!(tenant_id = %tenant_id, "Tenant metadata deleted");
        } else {
            debug!(tenant_id = %tenant_id, "Delete for absent tenant metadata, nothing to do");
        }
    }

    pub fn save(&self) -> Result<()> {
        let rows: Vec<TenantMetadata> = self.metadata.iter().map(|m| m.clone()).collect();
        let json = serde_json::to_string_pretty(&rows)?;
        std::fs::create_dir_all(&self.config.data_dir)?;
        std::fs::write(self.data_file(), json)?;
        debug!("Saved {} tenant metadata rows to disk", rows.len());
        Ok(())
    }

    pub fn load(&self) -> Result<usize> {
        let path = self.data_file();
        if !path.exists() {
            return Ok(0);
        }
        let json = std::fs::read_to_string(&path)?;
        let rows: Vec<TenantMetadata> = serde_json::from_str(&json)?;
        let count = rows.len();
        for row in rows {
            self.metadata.insert(row.tenant_id.clone(), row);
        }
        info!("Loaded {} tenant metadata rows from disk", count);
        Ok(count)
    }

    fn data_file(&self) -> PathBuf {
        self.config.data_dir.join("directory.json")
    }
}
