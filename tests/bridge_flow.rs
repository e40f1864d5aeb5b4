//! End-to-end flows through the public API: provision a tenant, relay
//! traffic both ways, tear the tenant down.

use queuebridge::config::BridgeConfig;
use queuebridge::directory::{QueueDirectory, QueueDirection};
use queuebridge::error::BridgeError;
use queuebridge::gateway::{InMemoryTenantCatalog, QueueResolution, QueueService, TokenIssuer};
use queuebridge::ledger::{AuditKey, AuditLedger, AuditStatus};
use queuebridge::lifecycle::{LifecycleEngine, WorkflowExecutor, WorkflowLauncher};
use queuebridge::provision::SimulatedProvisioner;
use queuebridge::relay::{BusEvent, InboundDisposition, InboundRelay, OutboundRelay, QueueRecord};
use queuebridge::transport::{InMemoryEventBus, InMemoryQueueTransport};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Bridge {
    config: Arc<BridgeConfig>,
    ledger: Arc<AuditLedger>,
    directory: Arc<QueueDirectory>,
    service: QueueService,
    inbound: InboundRelay,
    outbound: OutboundRelay,
    bus: Arc<InMemoryEventBus>,
    transport: Arc<InMemoryQueueTransport>,
    _tmp: TempDir,
}

fn bridge() -> Bridge {
    let tmp = TempDir::new().unwrap();
    let config = Arc::new(BridgeConfig {
        data_dir: tmp.path().to_path_buf(),
        ..Default::default()
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
        provisioner,
        config.clone(),
    ));
    let executor = Arc::new(
        WorkflowExecutor::new(engine, config.clone()).with_wait_override(Duration::from_millis(1)),
    );
    let launcher = Arc::new(WorkflowLauncher::new(executor));

    let catalog = Arc::new(InMemoryTenantCatalog::new());
    catalog.register("acme", "client-1");

    let service = QueueService::new(
        directory.clone(),
        ledger.clone(),
        launcher,
        catalog,
        Arc::new(TokenIssuer::new()),
        config.clone(),
    );

    let bus = Arc::new(InMemoryEventBus::new());
    let transport = Arc::new(InMemoryQueueTransport::new());
    let inbound = InboundRelay::new(
        directory.clone(),
        ledger.clone(),
        transport.clone(),
        config.clone(),
    );
    let outbound = OutboundRelay::new(bus.clone(), transport.clone(), config.clone());

    Bridge {
        config,
        ledger,
        directory,
        service,
        inbound,
        outbound,
        bus,
        transport,
        _tmp: tmp,
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}

fn course_event(tenant: &str) -> BusEvent {
    BusEvent {
        id: "e1".to_string(),
        source: "lms.course".to_string(),
        detail_type: "Course Created".to_string(),
        detail: json!({"tenantId": tenant}),
        time: None,
        resources: Vec::new(),
    }
}

#[tokio::test]
async fn provision_then_relay_round_trip() {
    let b = bridge();

    // First resolve starts provisioning.
    let resolution = b
        .service
        .get_queue("acme", QueueDirection::Inbound)
        .await
        .unwrap();
    assert!(matches!(resolution, QueueResolution::Provisioning));

    let ledger = b.ledger.clone();
    wait_until(move || {
        ledger.get_status("acme", &AuditKey::create()) == Some(AuditStatus::Success)
    })
    .await;

    // Now the queue resolves with credentials.
    let resolution = b
        .service
        .get_queue("acme", QueueDirection::Inbound)
        .await
        .unwrap();
    let grant = match resolution {
        QueueResolution::Ready(grant) => grant,
        other => panic!("unexpected resolution: {other:?}"),
    };
    assert_eq!(grant.queue.url, "queue://acme-inbound");

    // Bus event flows into the tenant queue.
    let disposition = b.inbound.relay_event(&course_event("acme")).await.unwrap();
    assert_eq!(disposition, InboundDisposition::Delivered);
    assert_eq!(b.transport.messages("queue://acme-inbound").len(), 1);

    // Tenant message on the shared queue flows back to the bus.
    let body = json!({
        "source": "tenant.app",
        "detail-type": "Assignment Submitted",
        "detail": {"tenantId": "acme"},
        "time": "2026-08-30T12:00:00Z"
    })
    .to_string();
    let record = QueueRecord {
        message_id: "m1".to_string(),
        receipt_handle: b.transport.push_raw(&b.config.outbound_queue_url, &body),
        body,
        sender_id: "AROA123:acme-outbound-ab12cd34".to_string(),
        source_arn: b.config.outbound_queue_arn.clone(),
    };
    let report = b.outbound.process_batch(&[record]).await.unwrap();
    assert_eq!(report.submitted, 1);
    assert_eq!(b.bus.accepted().len(), 1);
    assert_eq!(b.bus.accepted()[0].detail_type, "Assignment Submitted");
}

#[tokio::test]
async fn event_for_unknown_tenant_raises() {
    let b = bridge();

    let err = b.inbound.relay_event(&course_event("nobody")).await.unwrap_err();
    assert!(matches!(err, BridgeError::UnresolvedTenant(t) if t == "nobody"));
}

#[tokio::test]
async fn delete_stops_traffic_and_queries() {
    let b = bridge();

    b.service
        .get_queue("acme", QueueDirection::Inbound)
        .await
        .unwrap();
    let ledger = b.ledger.clone();
    wait_until(move || {
        ledger.get_status("acme", &AuditKey::create()) == Some(AuditStatus::Success)
    })
    .await;

    b.service.start_delete("acme").unwrap();
    let ledger = b.ledger.clone();
    wait_until(move || {
        ledger.get_status("acme", &AuditKey::delete()) == Some(AuditStatus::Success)
    })
    .await;

    // Queries answer not-found, and inbound traffic is dropped silently.
    assert!(matches!(
        b.service.list_queues("acme"),
        Err(BridgeError::NotFound(_))
    ));
    let err = b
        .service
        .get_queue("acme", QueueDirection::Inbound)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::NotFound(_)));

    let disposition = b.inbound.relay_event(&course_event("acme")).await.unwrap();
    assert_eq!(disposition, InboundDisposition::DroppedDeleting);
    assert!(b.directory.get_metadata("acme").is_none());
}

#[tokio::test]
async fn mixed_outbound_batch_partial_ack() {
    let b = bridge();

    let good = json!({
        "source": "tenant.app",
        "detail-type": "Thing Happened",
        "detail": {"tenantId": "acme"},
        "time": "2026-08-30T12:00:00Z"
    })
    .to_string();
    let bodies = [good.clone(), "{not json".to_string(), good];
    let records: Vec<QueueRecord> = bodies
        .iter()
        .enumerate()
        .map(|(i, body)| QueueRecord {
            message_id: format!("m{}", i + 1),
            receipt_handle: b.transport.push_raw(&b.config.outbound_queue_url, body),
            body: body.clone(),
            sender_id: "AROA123:acme-outbound-ab12cd34".to_string(),
            source_arn: b.config.outbound_queue_arn.clone(),
        })
        .collect();

    let err = b.outbound.process_batch(&records).await.unwrap_err();
    let failed = match err {
        BridgeError::BatchFailed { failed_receipts } => failed_receipts,
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(failed, vec![records[1].receipt_handle.clone()]);
    assert_eq!(b.bus.accepted().len(), 2);

    let remaining = b.transport.messages(&b.config.outbound_queue_url);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].receipt_handle, records[1].receipt_handle);
}
