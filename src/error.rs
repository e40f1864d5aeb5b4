//! Error types for the queue bridge
//!
//! One crate-wide error enum covering the REST-facing taxonomy
//! (bad request / not found / gone / conflict), workflow failures, and the
//! relay pipeline's per-item and batch failure modes.

use thiserror::Error;

/// Result type alias for queue bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors produced by the queue bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Another execution already holds the Started audit row for this key.
    /// Callers treat this as "in progress elsewhere", not as a failure.
    #[error("Operation already in progress: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The resource existed but has been (or is being) deleted. Distinct
    /// from NotFound so callers can tell "never existed" from "was removed".
    #[error("Gone: {0}")]
    Gone(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Incoming bus event carries no tenant id in any recognised position.
    #[error("No tenantId is associated to the event")]
    MissingTenantId,

    /// Event resolved to a tenant that has no inbound queue and is not
    /// being deleted; surfaced so the trigger can retry or alert.
    #[error("No inbound queue exists for tenant {0}")]
    UnresolvedTenant(String),

    #[error("Validation failure: {0}")]
    Validation(String),

    #[error("Provisioning error: {0}")]
    Provision(String),

    /// Event bus rejected one or more entries of a put-events batch.
    #[error("Event bus error: {0}")]
    Bus(String),

    #[error("Queue transport error: {0}")]
    Transport(String),

    /// One or more items of a batch failed; successful items were already
    /// deleted from the source, the listed receipt handles remain for
    /// redelivery.
    #[error("Failed to process {} of a batch of messages", failed_receipts.len())]
    BatchFailed { failed_receipts: Vec<String> },

    /// Lifecycle workflow terminated in its Failure state.
    #[error("Workflow {workflow} failed for tenant {tenant_id}: {reason}")]
    WorkflowFailed {
        workflow: String,
        tenant_id: String,
        reason: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// True for errors the lifecycle executor's task retry policy applies to.
    /// Deterministic outcomes (conflict, validation, not-found) are not
    /// retried; transient external failures are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::Provision(_)
                | BridgeError::Transport(_)
                | BridgeError::Bus(_)
                | BridgeError::Io(_)
                | BridgeError::Internal(_)
        )
    }
}
