//! Resource provisioning seam
//!
//! Lifecycle workflows drive tenant resource groups ("stacks") through this
//! trait: trigger a deploy or teardown, then poll the stack status until it
//! settles. The status model follows infrastructure-orchestrator
//! conventions: any status containing `IN_PROGRESS` is still settling, a
//! fixed set of statuses means the operation failed, and asking about a
//! stack that does not exist reads as `DELETE_COMPLETE`.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::directory::{MetadataUpsert, QueueDirectory};
use crate::error::Result;

/// Stack statuses that mean the operation failed and will not recover.
const FAILURE_STATUSES: &[&str] = &[
    "CREATE_FAILED",
    "ROLLBACK_FAILED",
    "ROLLBACK_COMPLETE",
    "DELETE_FAILED",
    "UPDATE_ROLLBACK_FAILED",
    "UPDATE_ROLLBACK_COMPLETE",
    "IMPORT_ROLLBACK_FAILED",
    "IMPORT_ROLLBACK_COMPLETE",
];

/// Reference to a triggered deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployedStack {
    pub stack_id: String,
    pub stack_name: String,
}

/// One status poll result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub status: String,
    pub is_complete: bool,
    pub is_failure: bool,
}

impl ResourceStatus {
    pub fn from_status(status: impl Into<String>) -> Self {
        let status = status.into();
        Self {
            is_complete: !status.contains("IN_PROGRESS"),
            is_failure: FAILURE_STATUSES.contains(&status.as_str()),
            status,
        }
    }
}

/// Provisioning collaborator: deploy, poll, destroy.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Start deploying (or re-deploying, for updates) a tenant's resources.
    /// Returns immediately; progress is observed through `resource_status`.
    async fn deploy_resources(
        &self,
        tenant_id: &str,
        client_id: &str,
        is_update: bool,
    ) -> Result<DeployedStack>;

    async fn resource_status(&self, stack_name: &str) -> Result<ResourceStatus>;

    /// Start tearing down a tenant's resources. Returns the stack name to
    /// poll.
    async fn destroy_resources(&self, tenant_id: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SimulatedPhase {
    Creating,
    Updating,
    Deleting,
}

#[derive(Debug, Clone)]
struct SimulatedStack {
    tenant_id: String,
    client_id: String,
    phase: SimulatedPhase,
    /// Status polls left before the stack settles.
    polls_remaining: u32,
    fail: bool,
}

/// In-process provisioner for embedded mode and tests. Each deploy creates a
/// stack record that stays `*_IN_PROGRESS` for a configurable number of
/// status polls; on settling, a create/update writes the tenant's metadata
/// through the directory's custom-resource handler, and a destroy removes it.
pub struct SimulatedProvisioner {
    directory: Arc<QueueDirectory>,
    stacks: DashMap<String, SimulatedStack>,
    polls_to_complete: u32,
    schema_version: String,
    stack_prefix: String,
    failing_tenants: DashMap<String, ()>,
}

impl SimulatedProvisioner {
    pub fn new(
        directory: Arc<QueueDirectory>,
        stack_prefix: impl Into<String>,
        schema_version: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            stacks: DashMap::new(),
            polls_to_complete: 2,
            schema_version: schema_version.into(),
            stack_prefix: stack_prefix.into(),
            failing_tenants: DashMap::new(),
        }
    }

    /// Number of status polls a stack stays in progress before settling.
    pub fn with_polls_to_complete(mut self, polls: u32) -> Self {
        self.polls_to_complete = polls;
        self
    }

    /// Deploys for this tenant settle into a failure status.
    pub fn fail_tenant(&self, tenant_id: &str) {
        self.failing_tenants.insert(tenant_id.to_string(), ());
    }

    fn stack_name(&self, tenant_id: &str) -> String {
        format!("{}-{}", self.stack_prefix, tenant_id)
    }

    fn settle(&self, stack: &SimulatedStack) -> Result<String> {
        if stack.fail {
            return Ok(match stack.phase {
                SimulatedPhase::Creating => "CREATE_FAILED",
                SimulatedPhase::Updating => "UPDATE_ROLLBACK_COMPLETE",
                SimulatedPhase::Deleting => "DELETE_FAILED",
            }
            .to_string());
        }
        match stack.phase {
            SimulatedPhase::Creating | SimulatedPhase::Updating => {
                let upsert = MetadataUpsert {
                    tenant_id: stack.tenant_id.clone(),
                    client_id: stack.client_id.clone(),
                    schema_version: self.schema_version.clone(),
                    inbound_queue_arn: format!("arn:queue:{}-inbound", stack.tenant_id),
                    inbound_queue_url: format!("queue://{}-inbound", stack.tenant_id),
                };
                // The real stack's custom resource sends Create on both
                // paths; the directory falls back to update when the row
                // already exists.
                self.directory.handle_create(upsert)?;
                Ok(match stack.phase {
                    SimulatedPhase::Creating => "CREATE_COMPLETE",
                    _ => "UPDATE_COMPLETE",
                }
                .to_string())
            }
            SimulatedPhase::Deleting => {
                self.directory.handle_delete(&stack.tenant_id);
                Ok("DELETE_COMPLETE".to_string())
            }
        }
    }
}

#[async_trait]
impl Provisioner for SimulatedProvisioner {
    async fn deploy_resources(
        &self,
        tenant_id: &str,
        client_id: &str,
        is_update: bool,
    ) -> Result<DeployedStack> {
        let stack_name = self.stack_name(tenant_id);
        let phase = if is_update {
            SimulatedPhase::Updating
        } else {
            SimulatedPhase::Creating
        };
        self.stacks.insert(
            stack_name.clone(),
            SimulatedStack {
                tenant_id: tenant_id.to_string(),
                client_id: client_id.to_string(),
                phase,
                polls_remaining: self.polls_to_complete,
                fail: self.failing_tenants.contains_key(tenant_id),
            },
        );
        info!(tenant_id = %tenant_id, stack_name = %stack_name, is_update = is_update, "Deploy triggered");
        Ok(DeployedStack {
            stack_id: format!("stack/{stack_name}"),
            stack_name,
        })
    }

    async fn resource_status(&self, stack_name: &str) -> Result<ResourceStatus> {
        let mut stack = match self.stacks.get_mut(stack_name) {
            Some(stack) => stack,
            // Absent stacks read as already deleted.
            None => return Ok(ResourceStatus::from_status("DELETE_COMPLETE")),
        };

        if stack.polls_remaining > 0 {
            stack.polls_remaining -= 1;
            let status = match stack.phase {
                SimulatedPhase::Creating => "CREATE_IN_PROGRESS",
                SimulatedPhase::Updating => "UPDATE_IN_PROGRESS",
                SimulatedPhase::Deleting => "DELETE_IN_PROGRESS",
            };
            debug!(stack_name = %stack_name, status = status, "Stack still settling");
            return Ok(ResourceStatus::from_status(status));
        }

        let settled = self.settle(&stack)?;
        debug!(stack_name = %stack_name, status = %settled, "Stack settled");
        Ok(ResourceStatus::from_status(settled))
    }

    async fn destroy_resources(&self, tenant_id: &str) -> Result<String> {
        let stack_name = self.stack_name(tenant_id);
        let client_id = self
            .directory
            .get_metadata(tenant_id)
            .map(|m| m.client_id)
            .unwrap_or_default();
        self.stacks.insert(
            stack_name.clone(),
            SimulatedStack {
                tenant_id: tenant_id.to_string(),
                client_id,
                phase: SimulatedPhase::Deleting,
                polls_remaining: self.polls_to_complete,
                fail: self.failing_tenants.contains_key(tenant_id),
            },
        );
        info!(tenant_id = %tenant_id, stack_name = %stack_name, "Teardown triggered");
        Ok(stack_name)
    }
}
