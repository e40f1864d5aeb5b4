//! Generic transition-table interpreter and the fire-and-forget launcher.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::ledger::{AuditKey, OperationKind};

use super::{
    LifecycleEngine, StateAction, TaskOutcome, WaitInterval, WorkflowContext, WorkflowDefinition,
    WorkflowInput, CREATE_WORKFLOW, DELETE_WORKFLOW, UPDATE_WORKFLOW,
};

/// Walks a `WorkflowDefinition` to a terminal state. Task states get the
/// configured retry policy for retryable errors; wait states respect the poll
/// ceiling; terminal Fail maps to `WorkflowFailed`.
pub struct WorkflowExecutor {
    engine: Arc<LifecycleEngine>,
    config: Arc<BridgeConfig>,
    /// Replaces every sleep (poll waits and retry intervals). Test hook.
    wait_override: Option<Duration>,
}

impl WorkflowExecutor {
    pub fn new(engine: Arc<LifecycleEngine>, config: Arc<BridgeConfig>) -> Self {
        Self {
            engine,
            config,
            wait_override: None,
        }
    }

    pub fn with_wait_override(mut self, interval: Duration) -> Self {
        self.wait_override = Some(interval);
        self
    }

    fn audit_key(&self, kind: OperationKind) -> AuditKey {
        match kind {
            OperationKind::Create => AuditKey::create(),
            OperationKind::Update => AuditKey::update(self.config.schema_version.clone()),
            OperationKind::Delete => AuditKey::delete(),
        }
    }

    fn wait_duration(&self, interval: WaitInterval) -> Duration {
        if let Some(d) = self.wait_override {
            return d;
        }
        match interval {
            WaitInterval::CreatePoll => self.config.create_poll_interval(),
            WaitInterval::DeletePoll => self.config.delete_poll_interval(),
        }
    }

    fn retry_interval(&self) -> Duration {
        self.wait_override
            .unwrap_or_else(|| self.config.task_retry.interval())
    }

    /// Run one execution to its terminal state.
    pub async fn execute(&self, def: &WorkflowDefinition, input: WorkflowInput) -> Result<()> {
        let tenant_id = input.tenant_id.clone();
        let mut ctx = WorkflowContext {
            audit_key: self.audit_key(def.kind),
            kind: def.kind,
            input,
            metadata: None,
            stack_name: None,
            last_status: None,
        };

        info!(workflow = def.name, tenant_id = %tenant_id, "Workflow execution started");

        let mut current = def.start;
        let mut polls: u32 = 0;
        let mut failure_reason: Option<String> = None;

        loop {
            let state = def.state(current)?;
            debug!(workflow = def.name, tenant_id = %tenant_id, state = state.id, "Entering state");

            match state.action {
                StateAction::Task(task) => {
                    match self.run_with_retry(task, &mut ctx, def.name).await {
                        Ok(TaskOutcome::Continue) => {
                            current = state.next.ok_or_else(|| {
                                BridgeError::Internal(format!(
                                    "task state {} has no next edge",
                                    state.id
                                ))
                            })?;
                        }
                        Ok(TaskOutcome::ShortCircuitSucceed) => {
                            info!(
                                workflow = def.name,
                                tenant_id = %tenant_id,
                                "Workflow short-circuited to success"
                            );
                            return Ok(());
                        }
                        Err(e) => match state.on_error {
                            Some(fallback) => {
                                warn!(
                                    workflow = def.name,
                                    tenant_id = %tenant_id,
                                    state = state.id,
                                    error = %e,
                                    "Task failed, taking error edge"
                                );
                                failure_reason = Some(e.to_string());
                                current = fallback;
                            }
                            None => return Err(e),
                        },
                    }
                }
                StateAction::Wait(interval) => {
                    polls += 1;
                    if polls > self.config.max_poll_attempts {
                        warn!(
                            workflow = def.name,
                            tenant_id = %tenant_id,
                            polls = polls,
                            "Poll ceiling exceeded"
                        );
                        failure_reason = Some("resource never settled".to_string());
                        current = def.on_poll_exhausted;
                        continue;
                    }
                    tokio::time::sleep(self.wait_duration(interval)).await;
                    current = state.next.ok_or_else(|| {
                        BridgeError::Internal(format!("wait state {} has no next edge", state.id))
                    })?;
                }
                StateAction::Choice(choice) => {
                    current = self.engine.choose(choice, &ctx)?;
                }
                StateAction::Succeed => {
                    info!(workflow = def.name, tenant_id = %tenant_id, "Workflow execution succeeded");
                    return Ok(());
                }
                StateAction::Fail => {
                    let reason = failure_reason
                        .or_else(|| ctx.last_status.as_ref().map(|s| s.status.clone()))
                        .unwrap_or_else(|| "workflow failed".to_string());
                    return Err(BridgeError::WorkflowFailed {
                        workflow: def.name.to_string(),
                        tenant_id,
                        reason,
                    });
                }
            }
        }
    }

    async fn run_with_retry(
        &self,
        task: super::TaskId,
        ctx: &mut WorkflowContext,
        workflow: &str,
    ) -> Result<TaskOutcome> {
        let max_attempts = self.config.task_retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.engine.run_task(task, ctx).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        workflow = workflow,
                        tenant_id = %ctx.input.tenant_id,
                        attempt = attempt,
                        error = %e,
                        "Task attempt failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_interval()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Spawns executions onto the runtime. Triggering returns as soon as the
/// execution is accepted; callers observe progress through the audit ledger.
pub struct WorkflowLauncher {
    executor: Arc<WorkflowExecutor>,
}

impl WorkflowLauncher {
    pub fn new(executor: Arc<WorkflowExecutor>) -> Self {
        Self { executor }
    }

    pub fn start_create(&self, input: WorkflowInput) -> JoinHandle<Result<()>> {
        self.spawn(&CREATE_WORKFLOW, input)
    }

    pub fn start_update(&self, input: WorkflowInput) -> JoinHandle<Result<()>> {
        self.spawn(&UPDATE_WORKFLOW, input)
    }

    pub fn start_delete(&self, input: WorkflowInput) -> JoinHandle<Result<()>> {
        self.spawn(&DELETE_WORKFLOW, input)
    }

    fn spawn(
        &self,
        def: &'static WorkflowDefinition,
        input: WorkflowInput,
    ) -> JoinHandle<Result<()>> {
        let executor = self.executor.clone();
        tokio::spawn(async move {
            let result = executor.execute(def, input).await;
            if let Err(e) = &result {
                error!(workflow = def.name, error = %e, "Workflow execution failed");
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{QueueDirectory, QueueDirection};
    use crate::ledger::{AuditLedger, AuditStatus, OperationMetadata};
    use crate::provision::SimulatedProvisioner;
    use tempfile::TempDir;

    struct Harness {
        ledger: Arc<AuditLedger>,
        directory: Arc<QueueDirectory>,
        provisioner: Arc<SimulatedProvisioner>,
        executor: WorkflowExecutor,
        _tmp: TempDir,
    }

    fn harness(config: BridgeConfig) -> Harness {
        let tmp = TempDir::new().unwrap();
        let config = Arc::new(BridgeConfig {
            data_dir: tmp.path().to_path_buf(),
            ..config
        });
        let ledger = Arc::new(AuditLedger::new(tmp.path(), config.schema_version.clone()));
        let directory = Arc::new(QueueDirectory::new(config.clone()));
        let provisioner = Arc::new(
            SimulatedProvisioner::new(directory.clone(), "bridge", config.schema_version.clone())
                .with_polls_to_complete(2),
        );
        let engine = Arc::new(LifecycleEngine::new(
            ledger.clone(),
            directory.clone(),
            provisioner.clone(),
            config.clone(),
        ));
        let executor = WorkflowExecutor::new(engine, config)
            .with_wait_override(Duration::from_millis(1));
        Harness {
            ledger,
            directory,
            provisioner,
            executor,
            _tmp: tmp,
        }
    }

    fn create_input(tenant: &str) -> WorkflowInput {
        WorkflowInput {
            tenant_id: tenant.to_string(),
            client_id: Some("client-1".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_polls_until_complete() {
        let h = harness(BridgeConfig::default());

        h.executor
            .execute(&CREATE_WORKFLOW, create_input("t1"))
            .await
            .unwrap();

        assert_eq!(
            h.ledger.get_status("t1", &AuditKey::create()),
            Some(AuditStatus::Success)
        );
        let queue = h.directory.get_queue("t1", QueueDirection::Inbound).unwrap();
        assert_eq!(queue.url, "queue://t1-inbound");
    }

    #[tokio::test]
    async fn test_create_failure_writes_failure_audit() {
        let h = harness(BridgeConfig::default());
        h.provisioner.fail_tenant("t1");

        let err = h
            .executor
            .execute(&CREATE_WORKFLOW, create_input("t1"))
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::WorkflowFailed { .. }));
        assert_eq!(
            h.ledger.get_status("t1", &AuditKey::create()),
            Some(AuditStatus::Failure)
        );
        assert!(h.directory.get_metadata("t1").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_create_loser_steps_aside() {
        let h = harness(BridgeConfig::default());

        // Another execution already holds the Started row.
        h.ledger
            .begin_operation("t1", &AuditKey::create(), OperationMetadata::default())
            .unwrap();

        h.executor
            .execute(&CREATE_WORKFLOW, create_input("t1"))
            .await
            .unwrap();

        // The loser touched nothing: the row is still Started and no
        // resources were deployed.
        assert_eq!(
            h.ledger.get_status("t1", &AuditKey::create()),
            Some(AuditStatus::Started)
        );
        assert!(h.directory.get_metadata("t1").is_none());
    }

    #[tokio::test]
    async fn test_update_short_circuits_when_version_current() {
        let h = harness(BridgeConfig::default());

        h.executor
            .execute(&CREATE_WORKFLOW, create_input("t1"))
            .await
            .unwrap();
        let provisioned_at = h.directory.get_metadata("t1").unwrap().updated_at;

        h.executor
            .execute(&UPDATE_WORKFLOW, WorkflowInput::for_tenant("t1"))
            .await
            .unwrap();

        // Success recorded, but no redeploy happened.
        let key = AuditKey::update(BridgeConfig::default().schema_version);
        assert_eq!(h.ledger.get_status("t1", &key), Some(AuditStatus::Success));
        assert_eq!(h.directory.get_metadata("t1").unwrap().updated_at, provisioned_at);
    }

    #[tokio::test]
    async fn test_update_redeploys_when_version_behind() {
        let h = harness(BridgeConfig::default());
        h.executor
            .execute(&CREATE_WORKFLOW, create_input("t1"))
            .await
            .unwrap();

        // Target version moves ahead of the tenant's provisioned version.
        let tmp = h._tmp.path().to_path_buf();
        let config = Arc::new(BridgeConfig {
            schema_version: "2".to_string(),
            data_dir: tmp.clone(),
            ..Default::default()
        });
        let provisioner = Arc::new(
            SimulatedProvisioner::new(h.directory.clone(), "bridge", "2").with_polls_to_complete(1),
        );
        let engine = Arc::new(LifecycleEngine::new(
            h.ledger.clone(),
            h.directory.clone(),
            provisioner,
            config.clone(),
        ));
        let executor =
            WorkflowExecutor::new(engine, config).with_wait_override(Duration::from_millis(1));

        executor
            .execute(&UPDATE_WORKFLOW, WorkflowInput::for_tenant("t1"))
            .await
            .unwrap();

        assert_eq!(
            h.ledger.get_status("t1", &AuditKey::update("2")),
            Some(AuditStatus::Success)
        );
        assert_eq!(h.directory.get_metadata("t1").unwrap().schema_version, "2");
    }

    #[tokio::test]
    async fn test_update_missing_metadata_takes_failure_path() {
        let h = harness(BridgeConfig::default());

        let err = h
            .executor
            .execute(&UPDATE_WORKFLOW, WorkflowInput::for_tenant("ghost"))
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::WorkflowFailed { .. }));
        let key = AuditKey::update(BridgeConfig::default().schema_version);
        assert_eq!(
            h.ledger.get_status("ghost", &key),
            Some(AuditStatus::Failure)
        );
    }

    #[tokio::test]
    async fn test_delete_removes_resources() {
        let h = harness(BridgeConfig::default());
        h.executor
            .execute(&CREATE_WORKFLOW, create_input("t1"))
            .await
            .unwrap();

        h.executor
            .execute(&DELETE_WORKFLOW, WorkflowInput::for_tenant("t1"))
            .await
            .unwrap();

        assert_eq!(
            h.ledger.get_status("t1", &AuditKey::delete()),
            Some(AuditStatus::Success)
        );
        assert!(h.directory.get_metadata("t1").is_none());
        assert!(h.directory.get_queue("t1", QueueDirection::Outbound).is_none());
    }

    #[tokio::test]
    async fn test_poll_ceiling_takes_failure_path() {
        let h = harness(BridgeConfig {
            max_poll_attempts: 3,
            ..Default::default()
        });
        // Stack never settles within the ceiling.
        let provisioner = Arc::new(
            SimulatedProvisioner::new(h.directory.clone(), "bridge", "1")
                .with_polls_to_complete(100),
        );
        let config = Arc::new(BridgeConfig {
            max_poll_attempts: 3,
            data_dir: h._tmp.path().to_path_buf(),
            ..Default::default()
        });
        let engine = Arc::new(LifecycleEngine::new(
            h.ledger.clone(),
            h.directory.clone(),
            provisioner,
            config.clone(),
        ));
        let executor =
            WorkflowExecutor::new(engine, config).with_wait_override(Duration::from_millis(1));

        let err = executor
            .execute(&CREATE_WORKFLOW, create_input("t1"))
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::WorkflowFailed { .. }));
        assert_eq!(
            h.ledger.get_status("t1", &AuditKey::create()),
            Some(AuditStatus::Failure)
        );
    }

    #[tokio::test]
    async fn test_empty_tenant_id_rejected_before_audit() {
        let h = harness(BridgeConfig::default());

        let err = h
            .executor
            .execute(&CREATE_WORKFLOW, create_input("  "))
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Validation(_)));
        assert!(h.ledger.get_status("  ", &AuditKey::create()).is_none());
    }

    #[tokio::test]
    async fn test_launcher_is_fire_and_forget() {
        let h = harness(BridgeConfig::default());
        let launcher = WorkflowLauncher::new(Arc::new(h.executor));

        let handle = launcher.start_create(create_input("t1"));
        handle.await.unwrap().unwrap();

        assert_eq!(
            h.ledger.get_status("t1", &AuditKey::create()),
            Some(AuditStatus::Success)
        );
    }
}
