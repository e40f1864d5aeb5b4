//! Audit ledger for tenant lifecycle operations
//!
//! A keyed, versioned record store tracking the status of CREATE / UPDATE /
//! DELETE workflows per tenant. The conditional Started insert is the only
//! synchronization primitive between concurrent executions: inserting
//! succeeds iff no record exists for the key or the existing record is no
//! longer Started. Everything else in the lifecycle builds its idempotence
//! and crash recovery on these rows.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{BridgeError, Result};

/// Unique identifier for a tenant
pub type TenantId = String;

/// Lifecycle operation kinds tracked by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "CREATE"),
            OperationKind::Update => write!(f, "UPDATE"),
            OperationKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// Status of an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditStatus {
    Started,
    Success,
    Failure,
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditStatus::Started => write!(f, "Started"),
            AuditStatus::Success => write!(f, "Success"),
            AuditStatus::Failure => write!(f, "Failure"),
        }
    }
}

/// Key of an audit record within a tenant's partition. UPDATE rows are
/// versioned so each schema version gets its own audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditKey {
    pub kind: OperationKind,
    pub version: Option<String>,
}

impl AuditKey {
    /// Build a key, enforcing that UPDATE requires a version and the other
    /// kinds forbid one.
    pub fn new(kind: OperationKind, version: Option<String>) -> Result<Self> {
        match (kind, &version) {
            (OperationKind::Update, None) => Err(BridgeError::Validation(
                "UPDATE audit keys require a version".to_string(),
            )),
            (OperationKind::Create | OperationKind::Delete, Some(_)) => Err(
                BridgeError::Validation(format!("{kind} audit keys do not take a version")),
            ),
            _ => Ok(Self { kind, version }),
        }
    }

    pub fn create() -> Self {
        Self {
            kind: OperationKind::Create,
            version: None,
        }
    }

    pub fn update(version: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Update,
            version: Some(version.into()),
        }
    }

    pub fn delete() -> Self {
        Self {
            kind: OperationKind::Delete,
            version: None,
        }
    }
}

impl fmt::Display for AuditKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "AUDIT#{}#{}", self.kind, v),
            None => write!(f, "AUDIT#{}", self.kind),
        }
    }
}

/// Operation-specific metadata captured when an operation begins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationMetadata {
    /// Client the tenant belongs to (CREATE only).
    pub client_id: Option<String>,
    /// How many failed attempts preceded this one.
    pub retry_count: u32,
}

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub tenant_id: TenantId,
    pub key: AuditKey,
    pub status: AuditStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Identifier of the workflow execution that owns this record.
    pub execution: String,
    /// Schema version the executing software was at.
    pub software_version: String,
    pub retry_count: u32,
    pub client_id: Option<String>,
}

/// Status plus retry bookkeeping, for the gateway's backoff decisions.
#[derive(Debug, Clone)]
pub struct AuditInfo {
    pub status: Option<AuditStatus>,
    pub retry_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl Default for AuditInfo {
    fn default() -> Self {
        Self {
            status: None,
            retry_count: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Durable store of lifecycle audit records.
pub struct AuditLedger {
    records: DashMap<(TenantId, AuditKey), AuditRecord>,
    software_version: String,
    data_dir: PathBuf,
}

impl AuditLedger {
    pub fn new(data_dir: impl Into<PathBuf>, software_version: impl Into<String>) -> Self {
        Self {
            records: DashMap::new(),
            software_version: software_version.into(),
            data_dir: data_dir.into(),
        }
    }

    /// Insert a Started record for (tenant, key), returning the execution id.
    ///
    /// Conditional-write semantics: the insert succeeds iff no record exists
    /// OR the existing record's status is no longer Started. A Conflict
    /// result means another execution owns this operation; callers must
    /// short-circuit to their success path without altering state.
    pub fn begin_operation(
        &self,
        tenant_id: &str,
        key: &AuditKey,
        metadata: OperationMetadata,
    ) -> Result<String> {
        let now = Utc::now();
        let execution = Uuid::new_v4().to_string();
        let record = AuditRecord {
            tenant_id: tenant_id.to_string(),
            key: key.clone(),
            status: AuditStatus::Started,
            created_at: now,
            updated_at: now,
            execution: execution.clone(),
            software_version: self.software_version.clone(),
            retry_count: metadata.retry_count,
            client_id: metadata.client_id,
        };

        // Single-row compare-and-swap through the map entry lock.
        let entry = self
            .records
            .entry((tenant_id.to_string(), key.clone()));
        match entry {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record);
            }
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                if slot.get().status == AuditStatus::Started {
                    return Err(BridgeError::Conflict(format!(
                        "{key} already Started for tenant {tenant_id}"
                    )));
                }
                slot.insert(record);
            }
        }

        info!(tenant_id = %tenant_id, audit_key = %key, execution = %execution, "Audit row Started");
        Ok(execution)
    }

    /// Mark an operation terminal. Unconditional upsert of status and
    /// updated_at; creates the row when absent, mirroring the backing
    /// store's update-item behaviour. This is what allows a short-circuited
    /// UPDATE to record Success without a preceding Started row.
    pub fn complete_operation(&self, tenant_id: &str, key: &AuditKey, status: AuditStatus) {
        let now = Utc::now();
        self.records
            .entry((tenant_id.to_string(), key.clone()))
            .and_modify(|record| {
                record.status = status;
                record.updated_at = now;
            })
            .or_insert_with(|| AuditRecord {
                tenant_id: tenant_id.to_string(),
                key: key.clone(),
                status,
                created_at: now,
                updated_at: now,
                execution: String::new(),
                software_version: self.software_version.clone(),
                retry_count: 0,
                client_id: None,
            });

        info!(tenant_id = %tenant_id, audit_key = %key, status = %status, "Audit row completed");
    }

    /// Current status for (tenant, key), or None when no record exists.
    pub fn get_status(&self, tenant_id: &str, key: &AuditKey) -> Option<AuditStatus> {
        self.records
            .get(&(tenant_id.to_string(), key.clone()))
            .map(|r| r.status)
    }

    /// Status plus retry count and last-update time.
    pub fn get_status_with_retry_info(&self, tenant_id: &str, key: &AuditKey) -> AuditInfo {
        self.records
            .get(&(tenant_id.to_string(), key.clone()))
            .map(|r| AuditInfo {
                status: Some(r.status),
                retry_count: r.retry_count,
                updated_at: r.updated_at,
            })
            .unwrap_or_default()
    }

    pub fn get_record(&self, tenant_id: &str, key: &AuditKey) -> Option<AuditRecord> {
        self.records
            .get(&(tenant_id.to_string(), key.clone()))
            .map(|r| r.clone())
    }

    /// Remove every audit row for a tenant. Used by teardown cleanup and
    /// remediation tooling, never by the hot path.
    pub fn remove_tenant_records(&self, tenant_id: &str) -> usize {
        let keys: Vec<_> = self
            .records
            .iter()
            .filter(|e| e.key().0 == tenant_id)
            .map(|e| e.key().clone())
            .collect();
        let removed = keys.len();
        for key in keys {
            self.records.remove(&key);
        }
        debug!(tenant_id = %tenant_id, removed = removed, "Removed tenant audit rows");
        removed
    }

    /// Save all records to disk as JSON.
    pub fn save(&self) -> Result<()> {
        let records: Vec<AuditRecord> = self.records.iter().map(|r| r.clone()).collect();
        let json = serde_json::to_string_pretty(&records)?;
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::write(self.data_dir.join("audit.json"), json)?;
        debug!("Saved {} audit records to disk", records.len());
        Ok(())
    }

    /// Load records from disk; a missing file is an empty ledger.
    pub fn load(&self) -> Result<usize> {
        let path = self.data_dir.join("audit.json");
        if !path.exists() {
            return Ok(0);
        }
        let json = std::fs::read_to_string(&path)?;
        let records: Vec<AuditRecord> = serde_json::from_str(&json)?;
        let count = records.len();
        for record in records {
            self.records
                .insert((record.tenant_id.clone(), record.key.clone()), record);
        }
        info!("Loaded {} audit records from disk", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ledger() -> (AuditLedger, TempDir) {
        let tmp = TempDir::new().unwrap();
        (AuditLedger::new(tmp.path(), "3"), tmp)
    }

    #[test]
    fn test_audit_key_rendering() {
        assert_eq!(AuditKey::create().to_string(), "AUDIT#CREATE");
        assert_eq!(AuditKey::delete().to_string(), "AUDIT#DELETE");
        assert_eq!(AuditKey::update("3").to_string(), "AUDIT#UPDATE#3");
    }

    #[test]
    fn test_audit_key_version_rules() {
        assert!(AuditKey::new(OperationKind::Update, None).is_err());
        assert!(AuditKey::new(OperationKind::Create, Some("1".to_string())).is_err());
        assert!(AuditKey::new(OperationKind::Delete, Some("1".to_string())).is_err());
        assert!(AuditKey::new(OperationKind::Update, Some("1".to_string())).is_ok());
        assert!(AuditKey::new(OperationKind::Create, None).is_ok());
    }

    #[test]
    fn test_begin_then_conflict() {
        let (ledger, _tmp) = ledger();
        let key = AuditKey::create();

        ledger
            .begin_operation("t1", &key, OperationMetadata::default())
            .unwrap();

        let err = ledger
            .begin_operation("t1", &key, OperationMetadata::default())
            .unwrap_err();
        assert!(matches!(err, BridgeError::Conflict(_)));
    }

    #[test]
    fn test_begin_after_terminal_succeeds() {
        let (ledger, _tmp) = ledger();
        let key = AuditKey::create();

        ledger
            .begin_operation("t1", &key, OperationMetadata::default())
            .unwrap();
        ledger.complete_operation("t1", &key, AuditStatus::Failure);

        // A finished record no longer blocks a new execution.
        ledger
            .begin_operation("t1", &key, OperationMetadata::default())
            .unwrap();
        assert_eq!(ledger.get_status("t1", &key), Some(AuditStatus::Started));
    }

    #[test]
    fn test_concurrent_begin_single_winner() {
        let (ledger, _tmp) = ledger();
        let ledger = Arc::new(ledger);
        let key = AuditKey::delete();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            let key = key.clone();
            handles.push(std::thread::spawn(move || {
                ledger
                    .begin_operation("t1", &key, OperationMetadata::default())
                    .is_ok()
            }));
        }

        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
        assert_eq!(ledger.get_status("t1", &key), Some(AuditStatus::Started));
    }

    #[test]
    fn test_complete_without_begin_upserts() {
        let (ledger, _tmp) = ledger();
        let key = AuditKey::update("3");

        ledger.complete_operation("t1", &key, AuditStatus::Success);
        assert_eq!(ledger.get_status("t1", &key), Some(AuditStatus::Success));
    }

    #[test]
    fn test_status_with_retry_info() {
        let (ledger, _tmp) = ledger();
        let key = AuditKey::create();

        let info = ledger.get_status_with_retry_info("t1", &key);
        assert!(info.status.is_none());
        assert_eq!(info.retry_count, 0);

        ledger
            .begin_operation(
                "t1",
                &key,
                OperationMetadata {
                    client_id: Some("c1".to_string()),
                    retry_count: 2,
                },
            )
            .unwrap();
        ledger.complete_operation("t1", &key, AuditStatus::Failure);

        let info = ledger.get_status_with_retry_info("t1", &key);
        assert_eq!(info.status, Some(AuditStatus::Failure));
        assert_eq!(info.retry_count, 2);
    }

    #[test]
    fn test_update_versions_are_independent() {
        let (ledger, _tmp) = ledger();

        ledger
            .begin_operation("t1", &AuditKey::update("2"), OperationMetadata::default())
            .unwrap();
        // A different schema version is a different audit trail.
        ledger
            .begin_operation("t1", &AuditKey::update("3"), OperationMetadata::default())
            .unwrap();

        assert_eq!(
            ledger.get_status("t1", &AuditKey::update("2")),
            Some(AuditStatus::Started)
        );
        assert_eq!(
            ledger.get_status("t1", &AuditKey::update("3")),
            Some(AuditStatus::Started)
        );
    }

    #[test]
    fn test_remove_tenant_records() {
        let (ledger, _tmp) = ledger();
        ledger
            .begin_operation("t1", &AuditKey::create(), OperationMetadata::default())
            .unwrap();
        ledger
            .begin_operation("t1", &AuditKey::delete(), OperationMetadata::default())
            .unwrap();
        ledger
            .begin_operation("t2", &AuditKey::create(), OperationMetadata::default())
            .unwrap();

        assert_eq!(ledger.remove_tenant_records("t1"), 2);
        assert!(ledger.get_status("t1", &AuditKey::create()).is_none());
        assert_eq!(
            ledger.get_status("t2", &AuditKey::create()),
            Some(AuditStatus::Started)
        );
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();

        {
            let ledger = AuditLedger::new(tmp.path(), "3");
            ledger
                .begin_operation("t1", &AuditKey::create(), OperationMetadata::default())
                .unwrap();
            ledger.complete_operation("t1", &AuditKey::create(), AuditStatus::Success);
            ledger.save().unwrap();
        }

        {
            let ledger = AuditLedger::new(tmp.path(), "3");
            assert_eq!(ledger.load().unwrap(), 1);
            assert_eq!(
                ledger.get_status("t1", &AuditKey::create()),
                Some(AuditStatus::Success)
            );
        }
    }
}
