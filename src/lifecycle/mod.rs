//! Tenant resource lifecycle workflows
//!
//! CREATE, UPDATE, and DELETE are expressed as explicit state-transition
//! tables (`WorkflowDefinition`) interpreted by a generic executor. Each
//! table is data: task states name a handler on the engine, choice states
//! name an evaluator, wait states name a poll interval. The tables below are
//! the single place the workflow shapes live; changing a workflow means
//! editing its table, not the executor.
//!
//! Workflows are safe under at-least-once, possibly concurrent invocation.
//! The only cross-execution synchronization is the ledger's conditional
//! Started insert: the losing execution of a concurrent pair short-circuits
//! to success without touching any state.

mod engine;
mod executor;

pub use engine::LifecycleEngine;
pub use executor::{WorkflowExecutor, WorkflowLauncher};

use serde::{Deserialize, Serialize};

use crate::directory::TenantMetadata;
use crate::error::{BridgeError, Result};
use crate::ledger::{AuditKey, OperationKind};
use crate::provision::ResourceStatus;

/// Named task handlers the engine implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskId {
    ParseInput,
    /// Read tenant metadata; error when absent.
    ReadMetadata,
    /// Read tenant metadata; absence is recorded, not an error.
    ReadMetadataOptional,
    AuditStart,
    Deploy,
    Destroy,
    PollStatus,
    AuditSuccess,
    AuditFailure,
}

/// Named choice evaluators the engine implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceId {
    /// Deploy settled? Failure statuses and DELETE_COMPLETE mean failed.
    CheckCreateStatus,
    /// Redeploy settled? Failure statuses mean failed.
    CheckUpdateStatus,
    /// Teardown settled? Only DELETE_COMPLETE means done.
    CheckDeleteStatus,
    /// Already at the target schema version?
    CheckVersionCurrent,
}

/// Poll intervals a Wait state can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitInterval {
    CreatePoll,
    DeletePoll,
}

/// What a state does when entered.
#[derive(Debug, Clone, Copy)]
pub enum StateAction {
    Task(TaskId),
    Wait(WaitInterval),
    Choice(ChoiceId),
    Succeed,
    Fail,
}

/// One row of a transition table.
#[derive(Debug, Clone, Copy)]
pub struct StateSpec {
    pub id: &'static str,
    pub action: StateAction,
    /// Next state for Task and Wait rows.
    pub next: Option<&'static str>,
    /// Where a Task row goes when its handler fails after retries. Rows
    /// without one propagate the error and fail the execution outright.
    pub on_error: Option<&'static str>,
}

impl StateSpec {
    const fn task(id: &'static str, task: TaskId, next: &'static str) -> Self {
        Self {
            id,
            action: StateAction::Task(task),
            next: Some(next),
            on_error: None,
        }
    }

    const fn task_catching(
        id: &'static str,
        task: TaskId,
        next: &'static str,
        on_error: &'static str,
    ) -> Self {
        Self {
            id,
            action: StateAction::Task(task),
            next: Some(next),
            on_error: Some(on_error),
        }
    }

    const fn wait(id: &'static str, interval: WaitInterval, next: &'static str) -> Self {
        Self {
            id,
            action: StateAction::Wait(interval),
            next: Some(next),
            on_error: None,
        }
    }

    const fn choice(id: &'static str, choice: ChoiceId) -> Self {
        Self {
            id,
            action: StateAction::Choice(choice),
            next: None,
            on_error: None,
        }
    }

    const fn succeed(id: &'static str) -> Self {
        Self {
            id,
            action: StateAction::Succeed,
            next: None,
            on_error: None,
        }
    }

    const fn fail(id: &'static str) -> Self {
        Self {
            id,
            action: StateAction::Fail,
            next: None,
            on_error: None,
        }
    }
}

/// A complete workflow shape.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowDefinition {
    pub name: &'static str,
    pub kind: OperationKind,
    pub start: &'static str,
    /// Where the executor jumps when the wait/poll loop exceeds its ceiling.
    pub on_poll_exhausted: &'static str,
    pub states: &'static [StateSpec],
}

impl WorkflowDefinition {
    pub fn state(&self, id: &str) -> Result<&StateSpec> {
        self.states
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| BridgeError::Internal(format!("workflow {}: no state {id}", self.name)))
    }
}

const CREATE_STATES: &[StateSpec] = &[
    StateSpec::task("parse_input", TaskId::ParseInput, "audit_start"),
    StateSpec::task("audit_start", TaskId::AuditStart, "deploy"),
    StateSpec::task_catching("deploy", TaskId::Deploy, "wait", "audit_failure"),
    StateSpec::wait("wait", WaitInterval::CreatePoll, "poll_status"),
    StateSpec::task_catching("poll_status", TaskId::PollStatus, "check_status", "audit_failure"),
    StateSpec::choice("check_status", ChoiceId::CheckCreateStatus),
    StateSpec::task("audit_success", TaskId::AuditSuccess, "succeed"),
    StateSpec::task("audit_failure", TaskId::AuditFailure, "fail"),
    StateSpec::succeed("succeed"),
    StateSpec::fail("fail"),
];

const UPDATE_STATES: &[StateSpec] = &[
    StateSpec::task("parse_input", TaskId::ParseInput, "read_metadata"),
    StateSpec::task_catching(
        "read_metadata",
        TaskId::ReadMetadata,
        "check_version",
        "audit_failure",
    ),
    StateSpec::choice("check_version", ChoiceId::CheckVersionCurrent),
    StateSpec::task("audit_start", TaskId::AuditStart, "deploy"),
    StateSpec::task_catching("deploy", TaskId::Deploy, "wait", "audit_failure"),
    StateSpec::wait("wait", WaitInterval::CreatePoll, "poll_status"),
    StateSpec::task_catching("poll_status", TaskId::PollStatus, "check_status", "audit_failure"),
    StateSpec::choice("check_status", ChoiceId::CheckUpdateStatus),
    StateSpec::task("audit_success", TaskId::AuditSuccess, "succeed"),
    StateSpec::task("audit_failure", TaskId::AuditFailure, "fail"),
    StateSpec::succeed("succeed"),
    StateSpec::fail("fail"),
];

const DELETE_STATES: &[StateSpec] = &[
    StateSpec::task("parse_input", TaskId::ParseInput, "read_metadata"),
    StateSpec::task("read_metadata", TaskId::ReadMetadataOptional, "audit_start"),
    StateSpec::task("audit_start", TaskId::AuditStart, "destroy"),
    StateSpec::task_catching("destroy", TaskId::Destroy, "wait", "audit_failure"),
    StateSpec::wait("wait", WaitInterval::DeletePoll, "poll_status"),
    StateSpec::task_catching("poll_status", TaskId::PollStatus, "check_status", "audit_failure"),
    StateSpec::choice("check_status", ChoiceId::CheckDeleteStatus),
    StateSpec::task("audit_success", TaskId::AuditSuccess, "succeed"),
    StateSpec::task("audit_failure", TaskId::AuditFailure, "fail"),
    StateSpec::succeed("succeed"),
    StateSpec::fail("fail"),
];

pub const CREATE_WORKFLOW: WorkflowDefinition = WorkflowDefinition {
    name: "create-tenant-queues",
    kind: OperationKind::Create,
    start: "parse_input",
    on_poll_exhausted: "audit_failure",
    states: CREATE_STATES,
};

pub const UPDATE_WORKFLOW: WorkflowDefinition = WorkflowDefinition {
    name: "update-tenant-queues",
    kind: OperationKind::Update,
    start: "parse_input",
    on_poll_exhausted: "audit_failure",
    states: UPDATE_STATES,
};

pub const DELETE_WORKFLOW: WorkflowDefinition = WorkflowDefinition {
    name: "delete-tenant-queues",
    kind: OperationKind::Delete,
    start: "parse_input",
    on_poll_exhausted: "audit_failure",
    states: DELETE_STATES,
};

/// Execution input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowInput {
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Failed attempts preceding this one (gateway retry bookkeeping).
    #[serde(default)]
    pub retry_count: u32,
    /// Number of tenants at trigger time, recorded for capacity tracking.
    #[serde(default)]
    pub current_count: u32,
}

impl WorkflowInput {
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }
}

/// Mutable blackboard threaded through one execution.
#[derive(Debug)]
pub struct WorkflowContext {
    pub input: WorkflowInput,
    pub kind: OperationKind,
    pub audit_key: AuditKey,
    pub metadata: Option<TenantMetadata>,
    pub stack_name: Option<String>,
    pub last_status: Option<ResourceStatus>,
}

/// What a task handler asks the executor to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Follow the table's `next` edge.
    Continue,
    /// Terminate the execution as succeeded without visiting further states.
    /// Used by the audit-start conflict catch: the operation is already
    /// owned elsewhere and this execution must not touch state.
    ShortCircuitSucceed,
}
