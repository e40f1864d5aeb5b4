//! Request gateway: the tenant-facing queue service.
//!
//! `QueueService` is the behaviour behind the REST surface in `api` and the
//! bus-event trigger for tenant deletion. Its distinctive part is the
//! self-healing resolve: asking for a queue that does not exist yet starts
//! provisioning instead of failing, and repeated failures are retried on an
//! exponential backoff gate driven by the audit ledger's bookkeeping.

pub mod api;
mod credentials;

pub use credentials::{
    session_name, CredentialScope, CredentialsIssuer, ScopedCredentials, TokenIssuer,
};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::directory::{QueueDescriptor, QueueDirection, QueueDirectory};
use crate::error::{BridgeError, Result};
use crate::ledger::{AuditKey, AuditLedger, AuditStatus};
use crate::lifecycle::{WorkflowInput, WorkflowLauncher};
use crate::relay::{BusEvent, QueueRecord};

/// Client id used when unregistered tenants are allowed to provision.
const DEVELOPER_CLIENT: &str = "Developer";

const TENANT_DELETED_DETAIL_TYPE: &str = "Tenant Deleted";

/// Maps tenants to the client (customer account) they belong to.
#[async_trait]
pub trait TenantCatalog: Send + Sync {
    async fn client_for(&self, tenant_id: &str) -> Result<Option<String>>;
}

#[derive(Default)]
pub struct InMemoryTenantCatalog {
    clients: DashMap<String, String>,
}

impl InMemoryTenantCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tenant_id: &str, client_id: &str) {
        self.clients
            .insert(tenant_id.to_string(), client_id.to_string());
    }
}

#[async_trait]
impl TenantCatalog for InMemoryTenantCatalog {
    async fn client_for(&self, tenant_id: &str) -> Result<Option<String>> {
        Ok(self.clients.get(tenant_id).map(|c| c.clone()))
    }
}

/// A resolved queue with its delegated credentials.
#[derive(Debug, Clone)]
pub struct QueueGrant {
    pub queue: QueueDescriptor,
    /// Legacy dedicated outbound queue, included in the credential scope for
    /// tenants not yet migrated to the shared queue.
    pub legacy_queue: Option<QueueDescriptor>,
    pub credentials: ScopedCredentials,
}

/// Outcome of a queue resolve.
#[derive(Debug, Clone)]
pub enum QueueResolution {
    Ready(QueueGrant),
    /// Provisioning is running (or was just started); ask again later.
    Provisioning,
}

pub struct QueueService {
    directory: Arc<QueueDirectory>,
    ledger: Arc<AuditLedger>,
    launcher: Arc<WorkflowLauncher>,
    catalog: Arc<dyn TenantCatalog>,
    issuer: Arc<dyn CredentialsIssuer>,
    config: Arc<BridgeConfig>,
}

impl QueueService {
    pub fn new(
        directory: Arc<QueueDirectory>,
        ledger: Arc<AuditLedger>,
        launcher: Arc<WorkflowLauncher>,
        catalog: Arc<dyn TenantCatalog>,
        issuer: Arc<dyn CredentialsIssuer>,
        config: Arc<BridgeConfig>,
    ) -> Self {
        Self {
            directory,
            ledger,
            launcher,
            catalog,
            issuer,
            config,
        }
    }

    /// Resolve one queue for a tenant, provisioning on demand.
    pub async fn get_queue(
        &self,
        tenant_id: &str,
        direction: QueueDirection,
    ) -> Result<QueueResolution> {
        if let Some(queue) = self.directory.get_queue(tenant_id, direction) {
            let grant = self.grant(tenant_id, direction, queue).await?;
            return Ok(QueueResolution::Ready(grant));
        }

        let info = self
            .ledger
            .get_status_with_retry_info(tenant_id, &AuditKey::create());
        match info.status {
            None => {
                self.trigger_create(tenant_id, 0).await?;
                Ok(QueueResolution::Provisioning)
            }
            Some(AuditStatus::Started) => Ok(QueueResolution::Provisioning),
            Some(AuditStatus::Failure) => {
                if info.retry_count >= self.config.create_max_retries {
                    return Err(BridgeError::Provision(format!(
                        "provisioning for tenant {tenant_id} failed {} times, giving up",
                        info.retry_count
                    )));
                }
                let backoff = Duration::minutes(
                    self.config.create_retry_factor_minutes << info.retry_count,
                );
                let due_at = info.updated_at + backoff;
                if Utc::now() < due_at {
                    // Failed recently; let the backoff window pass before
                    // another attempt.
                    return Ok(QueueResolution::Provisioning);
                }
                self.trigger_create(tenant_id, info.retry_count + 1).await?;
                Ok(QueueResolution::Provisioning)
            }
            Some(AuditStatus::Success) => {
                // Created once but no queue now: either deleted, or something
                // is genuinely wrong.
                if self
                    .ledger
                    .get_status(tenant_id, &AuditKey::delete())
                    .is_some()
                {
                    Err(BridgeError::NotFound(format!(
                        "queues for tenant {tenant_id} have been deleted"
                    )))
                } else {
                    Err(BridgeError::Internal(format!(
                        "tenant {tenant_id} has a successful create but no queue"
                    )))
                }
            }
        }
    }

    /// All queues for a tenant, without credentials.
    pub fn list_queues(&self, tenant_id: &str) -> Result<Vec<QueueDescriptor>> {
        let queues = self.directory.list_queues(tenant_id);
        if queues.is_empty() {
            return Err(BridgeError::NotFound(format!(
                "no queues for tenant {tenant_id}"
            )));
        }
        if self.ledger.get_status(tenant_id, &AuditKey::delete()) == Some(AuditStatus::Started) {
            return Err(BridgeError::Gone(format!(
                "queues for tenant {tenant_id} are being deleted"
            )));
        }
        Ok(queues)
    }

    /// Start tearing down a tenant's queues.
    pub fn start_delete(&self, tenant_id: &str) -> Result<()> {
        if self.directory.list_queues(tenant_id).is_empty() {
            return Err(BridgeError::NotFound(format!(
                "no queues for tenant {tenant_id}"
            )));
        }
        if self.ledger.get_status(tenant_id, &AuditKey::delete()) == Some(AuditStatus::Started) {
            return Err(BridgeError::Gone(format!(
                "deletion already in progress for tenant {tenant_id}"
            )));
        }
        info!(tenant_id = %tenant_id, "Starting delete workflow");
        let _ = self
            .launcher
            .start_delete(WorkflowInput::for_tenant(tenant_id));
        Ok(())
    }

    /// Bus-event trigger: tear down queues when their tenant is deleted
    /// upstream. Unknown detail types are dropped.
    pub fn handle_bus_event(&self, event: &BusEvent) -> Result<()> {
        if event.detail_type != TENANT_DELETED_DETAIL_TYPE {
            info!(detail_type = %event.detail_type, "Ignoring unhandled event type");
            return Ok(());
        }
        let tenant_id = event
            .detail
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or(BridgeError::MissingTenantId)?;

        match self.start_delete(tenant_id) {
            Ok(()) => Ok(()),
            Err(BridgeError::NotFound(_)) | Err(BridgeError::Gone(_)) => {
                info!(tenant_id = %tenant_id, "Nothing to delete for tenant, dropping event");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Queue-batch form of the tenant-deleted trigger. Returns message ids
    /// of records that failed, for a partial-batch failure report.
    pub fn handle_event_batch(&self, records: &[QueueRecord]) -> Vec<String> {
        let mut failed = Vec::new();
        for record in records {
            let outcome = serde_json::from_str::<BusEvent>(&record.body)
                .map_err(BridgeError::from)
                .and_then(|event| self.handle_bus_event(&event));
            if let Err(e) = outcome {
                warn!(message_id = %record.message_id, error = %e, "Event record failed");
                failed.push(record.message_id.clone());
            }
        }
        failed
    }

    async fn grant(
        &self,
        tenant_id: &str,
        direction: QueueDirection,
        queue: QueueDescriptor,
    ) -> Result<QueueGrant> {
        let legacy_queue = match direction {
            QueueDirection::Outbound => self.directory.get_legacy_outbound(tenant_id),
            QueueDirection::Inbound => None,
        };
        let mut arns = vec![queue.arn.clone()];
        if let Some(legacy) = &legacy_queue {
            arns.push(legacy.arn.clone());
        }
        let credentials = self
            .issuer
            .issue(
                &session_name(tenant_id, direction),
                &arns,
                CredentialScope::for_direction(direction),
            )
            .await?;
        Ok(QueueGrant {
            queue,
            legacy_queue,
            credentials,
        })
    }

    async fn trigger_create(&self, tenant_id: &str, retry_count: u32) -> Result<()> {
        let client_id = match self.catalog.client_for(tenant_id).await? {
            Some(client_id) => client_id,
            None if self.config.allow_unregistered_tenants => DEVELOPER_CLIENT.to_string(),
            None => {
                return Err(BridgeError::NotFound(format!(
                    "tenant {tenant_id} is not registered"
                )))
            }
        };
        info!(tenant_id = %tenant_id, client_id = %client_id, retry_count = retry_count, "Triggering create workflow");
        let _ = self.launcher.start_create(WorkflowInput {
            tenant_id: tenant_id.to_string(),
            client_id: Some(client_id),
            retry_count,
            current_count: 0,
        });
        Ok(())
    }
}
