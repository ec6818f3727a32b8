//! Pipeline and worker loop tests over the in-memory ports

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde_json::json;

use core_kernel::{AdapterHealth, ChannelId, UploadId};
use domain_intake::{IntakeConfig, MockStagingStore, RecordingPromotionPort, WorkerIdentity};
use domain_registry::{MockRegistryPort, NewChannel, StandardItemType};
use domain_sync::{AckOutcome, MockUploadPort, NewUpload, UploadState};
use interface_worker::{Pipeline, PipelinePorts, WorkerError, WorkerLoop};

struct Harness {
    pipeline: Arc<Pipeline>,
    store: MockStagingStore,
    promotion: RecordingPromotionPort,
    channel: ChannelId,
}

async fn harness() -> Harness {
    let registry = Arc::new(MockRegistryPort::new());
    let store = MockStagingStore::new();
    let promotion = RecordingPromotionPort::new();
    let ports = PipelinePorts {
        channels: registry.clone(),
        item_types: registry,
        staging: Arc::new(store.clone()),
        watermarks: Arc::new(store.clone()),
        uploads: Arc::new(MockUploadPort::new()),
        promotion: Arc::new(promotion.clone()),
    };
    let pipeline = Pipeline::new(
        ports,
        IntakeConfig::default(),
        WorkerIdentity::new("promotion", "worker-1").with_lease(Duration::minutes(5)),
    );
    let channel = pipeline
        .channels
        .register(NewChannel::new("SMART APPLICATIONS"))
        .await
        .unwrap();
    Harness {
        pipeline: Arc::new(pipeline),
        store,
        promotion,
        channel: channel.id,
    }
}

fn envelope(channel: ChannelId, external: &str) -> serde_json::Value {
    json!({
        "channel_id": channel.value(),
        "external_claim_id": external,
        "scheme_code": "SCH-001",
        "provider_code": "PRV-042",
        "member_number": "MEM-100234",
        "benefit_id": "OUTPATIENT",
        "amount": "1500.00",
        "invoice_date": "2024-06-14",
        "service_lines": [{
            "service_code": "CONSULTATION",
            "quantity": "1",
            "amount": "1500.00",
            "diagnosis_code": "Z00.0"
        }]
    })
}

fn worker_loop(pipeline: &Arc<Pipeline>) -> WorkerLoop {
    WorkerLoop::new(pipeline.clone(), StdDuration::from_millis(10), Duration::hours(1))
}

// ============================================================================
// Ingestion
// ============================================================================

#[tokio::test]
async fn test_ingest_json_stages_one_run() {
    let h = harness().await;
    let file = json!([envelope(h.channel, "CLM-001"), envelope(h.channel, "CLM-002")]).to_string();

    let summary = h.pipeline.ingest_json(&file).await.unwrap();

    assert_eq!(summary.claims, 2);
    assert_eq!(summary.services, 2);
    assert!(summary.rejected.is_empty());
    assert_eq!(h.store.all_claims().await.len(), 2);
    assert_eq!(h.store.all_watermarks().await.len(), 2);
    assert!(h.store.open_reservations().await.is_empty());
}

#[tokio::test]
async fn test_ingest_json_reports_row_rejections() {
    let h = harness().await;
    let unknown = ChannelId::new(999);
    let file = json!([
        envelope(h.channel, "CLM-001"),
        envelope(h.channel, "CLM-001"),
        envelope(unknown, "CLM-002"),
    ])
    .to_string();

    let summary = h.pipeline.ingest_json(&file).await.unwrap();

    assert_eq!(summary.claims, 1);
    assert_eq!(summary.rejected.len(), 2);
    assert_eq!(summary.rejected[0].claim.external_claim_id.as_str(), "CLM-001");
    assert_eq!(summary.rejected[1].claim.channel_id, unknown);
}

#[tokio::test]
async fn test_ingest_json_rejects_malformed_input() {
    let h = harness().await;

    let result = h.pipeline.ingest_json("{\"not\": \"an array\"}").await;

    assert!(matches!(result, Err(WorkerError::Input(_))));
    assert!(h.store.all_claims().await.is_empty());
    assert!(h.store.open_reservations().await.is_empty());
}

// ============================================================================
// Worker loop
// ============================================================================

#[tokio::test]
async fn test_tick_promotes_committed_claims() {
    let h = harness().await;
    let file = json!([envelope(h.channel, "CLM-001"), envelope(h.channel, "CLM-002")]).to_string();
    h.pipeline.ingest_json(&file).await.unwrap();
    let worker = worker_loop(&h.pipeline);

    let report = worker.tick().await.unwrap();

    assert!(report.released.is_empty());
    assert_eq!(report.validation.promoted_claims.len(), 2);
    assert_eq!(report.validation.promoted_services.len(), 2);
    assert_eq!(h.promotion.promoted().await.len(), 2);

    let idle = worker.tick().await.unwrap();
    assert!(idle.is_idle());
}

#[tokio::test]
async fn test_tick_releases_abandoned_runs() {
    let h = harness().await;
    let batch = h.pipeline.intake.begin().await.unwrap();
    assert!(!h.store.open_reservations().await.is_empty());
    h.store.age_reservations(Duration::hours(2)).await;

    let report = worker_loop(&h.pipeline).tick().await.unwrap();

    assert!(report.released.iter().all(|r| r.run_id == batch.run_id()));
    assert!(!report.released.is_empty());
    assert!(h.store.open_reservations().await.is_empty());
}

#[tokio::test]
async fn test_abandoned_run_does_not_hold_back_later_runs() {
    let h = harness().await;
    let _crashed = h.pipeline.intake.begin().await.unwrap();
    h.pipeline
        .ingest_json(&json!([envelope(h.channel, "CLM-LATE")]).to_string())
        .await
        .unwrap();
    h.store.age_reservations(Duration::hours(2)).await;

    let report = worker_loop(&h.pipeline).tick().await.unwrap();

    assert!(!report.released.is_empty());
    assert_eq!(report.validation.promoted_claims.len(), 1);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let h = harness().await;
    h.pipeline
        .ingest_json(&json!([envelope(h.channel, "CLM-001")]).to_string())
        .await
        .unwrap();

    let ticks = worker_loop(&h.pipeline).run(async {}).await.unwrap();

    assert_eq!(ticks, 1);
    assert_eq!(h.promotion.promoted().await.len(), 1);
}

// ============================================================================
// Upload acknowledgments
// ============================================================================

#[tokio::test]
async fn test_acknowledge_json_applies_and_reports_unknown_targets() {
    let h = harness().await;
    h.pipeline.seed_item_types().await.unwrap();
    let members = h
        .pipeline
        .item_types
        .find_by_name(StandardItemType::Members.name())
        .await
        .unwrap()
        .unwrap();
    let record = h
        .pipeline
        .uploads
        .enqueue(NewUpload::new(42, "MEM-100234", members.id, h.channel))
        .await
        .unwrap();
    let missing = UploadId::new(record.id.value() + 100);
    let acks = json!([
        { "upload_id": record.id.value(), "kind": "received", "detail": "accepted" },
        { "upload_id": missing.value(), "kind": "sent" },
    ])
    .to_string();

    let outcomes = h.pipeline.acknowledge_json(&acks).await.unwrap();

    assert_eq!(outcomes.len(), 2);
    match &outcomes[0] {
        AckOutcome::Applied { record, from } => {
            assert_eq!(*from, UploadState::NotSent);
            assert_eq!(record.state, UploadState::Received);
            assert!(record.skipped_sent);
        }
        other => panic!("expected an applied outcome, got {other:?}"),
    }
    assert_eq!(outcomes[1], AckOutcome::UnknownTarget(missing));
}

#[tokio::test]
async fn test_seed_item_types_is_idempotent() {
    let h = harness().await;

    let first = h.pipeline.seed_item_types().await.unwrap();
    let second = h.pipeline.seed_item_types().await.unwrap();

    assert_eq!(first.len(), StandardItemType::ALL.len());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_health_reports_every_adapter() {
    let h = harness().await;

    let results = h.pipeline.health().await;

    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.status == AdapterHealth::Healthy));
}
