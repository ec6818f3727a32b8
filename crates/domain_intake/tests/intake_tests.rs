//! Integration tests for domain_intake
//!
//! Everything runs against the in-memory staging store, which enforces the
//! same uniqueness and all-or-nothing rules as the database adapter.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use rust_decimal_macros::dec;

use core_kernel::{ChannelId, StagedClaimId};
use domain_intake::{
    ClaimEnvelope, EntityKind, IntakeConfig, IntakeError, IntakeService, MockStagingStore,
    QuarantineReason, RecordingPromotionPort, RowRef, ServiceLineInput, StagingStatus,
    ValidationWorker, Validator, WatermarkTracker, WorkerIdentity,
};
use domain_registry::{ChannelRegistry, MockRegistryPort, NewChannel};

struct Pipeline {
    store: MockStagingStore,
    channels: ChannelRegistry,
    tracker: WatermarkTracker,
    intake: IntakeService,
    validator: Validator,
    promotion: RecordingPromotionPort,
}

fn pipeline(config: IntakeConfig) -> Pipeline {
    let store = MockStagingStore::new();
    let channels = ChannelRegistry::new(Arc::new(MockRegistryPort::new()));
    let tracker = WatermarkTracker::new(Arc::new(store.clone()));
    let promotion = RecordingPromotionPort::new();
    let intake = IntakeService::new(channels.clone(), Arc::new(store.clone()), tracker.clone(), config);
    let validator = Validator::new(
        channels.clone(),
        Arc::new(store.clone()),
        tracker.clone(),
        Arc::new(promotion.clone()),
    );
    Pipeline { store, channels, tracker, intake, validator, promotion }
}

fn envelope(channel_id: ChannelId, external: &str) -> ClaimEnvelope {
    ClaimEnvelope {
        channel_id,
        external_claim_id: external.to_string(),
        scheme_code: "SCH-001".to_string(),
        provider_code: "PRV-042".to_string(),
        member_number: "MEM-100234".to_string(),
        benefit_id: "OUTPATIENT".to_string(),
        amount: dec!(1500.00),
        invoice_date: NaiveDate::from_ymd_opt(2024, 6, 14).unwrap(),
        service_lines: vec![ServiceLineInput {
            claim_external_id: None,
            service_code: "CONSULTATION".to_string(),
            quantity: dec!(1),
            amount: dec!(1500.00),
            diagnosis_code: Some("Z00.0".to_string()),
        }],
    }
}

fn line_for(parent: &str) -> ServiceLineInput {
    ServiceLineInput {
        claim_external_id: Some(parent.to_string()),
        service_code: "PHARMACY".to_string(),
        quantity: dec!(2),
        amount: dec!(80.00),
        diagnosis_code: None,
    }
}

// ============================================================================
// Staging
// ============================================================================

mod staging_tests {
    use super::*;

    #[tokio::test]
    async fn test_stage_claim_then_reject_duplicate() {
        let p = pipeline(IntakeConfig::default());
        let smart = p.channels.register(NewChannel::new("SMART APPLICATIONS")).await.unwrap();

        let batch = p.intake.begin().await.unwrap();
        let id = p.intake.ingest(&batch, envelope(smart.id, "CLM-2024-001")).await.unwrap();
        p.intake.commit(&batch).await.unwrap();

        let claims = p.store.all_claims().await;
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].id, id);
        assert_eq!(claims[0].status, StagingStatus::Pending);
        assert_eq!(claims[0].status.as_str(), "PENDING");
        assert_eq!(claims[0].amount, dec!(1500.00));
        assert!(!claims[0].processed);

        let retry = p.intake.begin().await.unwrap();
        let err = p
            .intake
            .ingest(&retry, envelope(smart.id, " CLM-2024-001 "))
            .await
            .unwrap_err();
        match err {
            IntakeError::DuplicateExternalClaim { existing, .. } => assert_eq!(existing, id),
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert_eq!(p.store.all_claims().await.len(), 1);
    }

    #[tokio::test]
    async fn test_same_external_id_on_two_channels() {
        let p = pipeline(IntakeConfig::default());
        let a = p.channels.register(NewChannel::new("A")).await.unwrap();
        let b = p.channels.register(NewChannel::new("B")).await.unwrap();

        let batch = p.intake.begin().await.unwrap();
        p.intake.ingest(&batch, envelope(a.id, "CLM-1")).await.unwrap();
        p.intake.ingest(&batch, envelope(b.id, "CLM-1")).await.unwrap();

        assert_eq!(p.store.all_claims().await.len(), 2);
    }

    #[tokio::test]
    async fn test_inactive_channel_rejected_at_intake() {
        let p = pipeline(IntakeConfig::default());
        let channel = p.channels.register(NewChannel::new("LEGACY")).await.unwrap();
        p.channels.deactivate(channel.id).await.unwrap();

        let batch = p.intake.begin().await.unwrap();
        let err = p.intake.ingest(&batch, envelope(channel.id, "CLM-1")).await.unwrap_err();
        assert!(matches!(err, IntakeError::InactiveChannel(id) if id == channel.id));
        assert!(p.store.all_claims().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_channels_never_collide() {
        const CHANNELS: usize = 8;
        const PER_CHANNEL: usize = 25;

        let p = pipeline(IntakeConfig { claim_capacity: 10, service_capacity: 10 });
        let mut handles = Vec::new();
        for c in 0..CHANNELS {
            let channel = p.channels.register(NewChannel::new(format!("CHANNEL {c}"))).await.unwrap();
            let intake = p.intake.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                let mut batch = intake.begin().await.unwrap();
                for n in 0..PER_CHANNEL {
                    let mut attempt = intake.ingest(&batch, envelope(channel.id, &format!("CLM-{n}"))).await;
                    if matches!(attempt, Err(IntakeError::BatchCapacityExhausted { .. })) {
                        intake.commit(&batch).await.unwrap();
                        batch = intake.begin().await.unwrap();
                        attempt = intake.ingest(&batch, envelope(channel.id, &format!("CLM-{n}"))).await;
                    }
                    ids.push(attempt.unwrap());
                }
                intake.commit(&batch).await.unwrap();
                ids
            }));
        }

        let mut all: Vec<StagedClaimId> = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), CHANNELS * PER_CHANNEL);
        assert_eq!(unique.len(), all.len());
        assert_eq!(p.store.all_claims().await.len(), CHANNELS * PER_CHANNEL);

        let mut watermarks: Vec<_> = p
            .store
            .all_watermarks()
            .await
            .into_iter()
            .filter(|w| w.kind == EntityKind::StagedClaim)
            .collect();
        watermarks.sort_by_key(|w| w.first_id);
        assert!(watermarks.windows(2).all(|w| w[0].last_id < w[1].first_id));
        assert_eq!(
            watermarks.iter().map(|w| w.len()).sum::<u64>(),
            (CHANNELS * PER_CHANNEL) as u64
        );
    }
}

// ============================================================================
// Watermarks
// ============================================================================

mod watermark_tests {
    use super::*;
    use domain_intake::WatermarkError;

    #[tokio::test]
    async fn test_commit_must_match_assigned_range() {
        let p = pipeline(IntakeConfig::default());
        let channel = p.channels.register(NewChannel::new("PORTAL")).await.unwrap();
        let batch = p.intake.begin().await.unwrap();
        let first = p.intake.ingest(&batch, envelope(channel.id, "CLM-1")).await.unwrap();
        p.intake.ingest(&batch, envelope(channel.id, "CLM-2")).await.unwrap();

        let err = p
            .tracker
            .commit_batch(batch.claims(), first.value(), first.value())
            .await
            .unwrap_err();
        assert!(matches!(err, WatermarkError::RangeMismatch { .. }));
        assert!(p.store.all_watermarks().await.is_empty());

        let watermark = p
            .tracker
            .commit_batch(batch.claims(), first.value(), first.value() + 1)
            .await
            .unwrap();
        assert_eq!(watermark.len(), 2);
    }

    #[tokio::test]
    async fn test_open_batch_holds_back_later_ranges() {
        let p = pipeline(IntakeConfig::default());
        let channel = p.channels.register(NewChannel::new("PORTAL")).await.unwrap();

        let slow = p.intake.begin().await.unwrap();
        p.intake.ingest(&slow, envelope(channel.id, "CLM-SLOW")).await.unwrap();

        let fast = p.intake.begin().await.unwrap();
        p.intake.ingest(&fast, envelope(channel.id, "CLM-FAST")).await.unwrap();
        p.intake.commit(&fast).await.unwrap();

        assert!(p
            .tracker
            .next_unprocessed_ranges(EntityKind::StagedClaim, "validator")
            .await
            .unwrap()
            .is_empty());

        p.intake.commit(&slow).await.unwrap();
        let ranges = p
            .tracker
            .next_unprocessed_ranges(EntityKind::StagedClaim, "validator")
            .await
            .unwrap();
        assert_eq!(ranges.len(), 2);
        assert!(ranges[0].last_id < ranges[1].first_id);
        assert_eq!(ranges[0].run_id, slow.run_id());
    }

    #[tokio::test]
    async fn test_abandon_stale_releases_horizon() {
        let p = pipeline(IntakeConfig::default());
        let channel = p.channels.register(NewChannel::new("PORTAL")).await.unwrap();

        let crashed = p.intake.begin().await.unwrap();
        p.intake.ingest(&crashed, envelope(channel.id, "CLM-LOST")).await.unwrap();
        p.store.age_reservations(Duration::minutes(30)).await;

        let healthy = p.intake.begin().await.unwrap();
        p.intake.ingest(&healthy, envelope(channel.id, "CLM-OK")).await.unwrap();
        p.intake.commit(&healthy).await.unwrap();

        let released = p.tracker.abandon_stale(Duration::minutes(10)).await.unwrap();
        assert_eq!(released.len(), 2);
        assert!(released.iter().all(|r| r.run_id == crashed.run_id()));

        let ranges = p
            .tracker
            .next_unprocessed_ranges(EntityKind::StagedClaim, "validator")
            .await
            .unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].run_id, healthy.run_id());

        // The abandoned claim left no row behind and can be resubmitted
        let claims = p.store.all_claims().await;
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].external_claim_id.as_str(), "CLM-OK");
    }

    #[tokio::test]
    async fn test_released_run_cannot_stage_more_rows() {
        let p = pipeline(IntakeConfig::default());
        let channel = p.channels.register(NewChannel::new("PORTAL")).await.unwrap();

        let slow = p.intake.begin().await.unwrap();
        p.store.age_reservations(Duration::minutes(30)).await;
        assert_eq!(p.tracker.abandon_stale(Duration::minutes(10)).await.unwrap().len(), 2);

        let err = p.intake.ingest(&slow, envelope(channel.id, "CLM-9")).await.unwrap_err();
        assert!(!err.is_row_scoped());
        assert!(slow.is_poisoned().await);
        assert!(p.store.all_claims().await.is_empty());
        assert!(p.store.all_services().await.is_empty());

        assert!(matches!(
            p.intake.commit(&slow).await.unwrap_err(),
            IntakeError::BatchPoisoned(_)
        ));
        assert_eq!(p.intake.abort(&slow).await.unwrap(), 0);
        assert!(p.store.all_watermarks().await.is_empty());

        // Nothing was left behind, so a resubmission stages normally
        let (committed, rejected) = p
            .intake
            .ingest_all(vec![envelope(channel.id, "CLM-9")])
            .await
            .unwrap();
        assert!(rejected.is_empty());
        assert_eq!(committed.claim_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_abort_keeps_original_error() {
        let p = pipeline(IntakeConfig::default());
        let channel = p.channels.register(NewChannel::new("PORTAL")).await.unwrap();
        p.store.fail_writes(true).await;

        let err = p
            .intake
            .ingest_all(vec![envelope(channel.id, "CLM-1")])
            .await
            .unwrap_err();

        // The insert failure is reported, not the failed release
        match err {
            IntakeError::Port(port) => assert!(port.is_transient()),
            other => panic!("expected the staging failure, got {other:?}"),
        }
        assert_eq!(p.store.open_reservations().await.len(), 2);

        p.store.fail_writes(false).await;
        p.store.age_reservations(Duration::minutes(30)).await;
        assert_eq!(p.tracker.abandon_stale(Duration::minutes(10)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_consumers_track_progress_independently() {
        let p = pipeline(IntakeConfig::default());
        let channel = p.channels.register(NewChannel::new("PORTAL")).await.unwrap();
        for n in 0..3 {
            p.intake.ingest_all(vec![envelope(channel.id, &format!("CLM-{n}"))]).await.unwrap();
        }

        let lease = Duration::minutes(1);
        let first = p
            .tracker
            .claim_next_range(EntityKind::StagedClaim, "validator", "w1", lease)
            .await
            .unwrap()
            .unwrap();
        let second = p
            .tracker
            .claim_next_range(EntityKind::StagedClaim, "validator", "w2", lease)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(first.id, second.id);
        assert!(first.first_id < second.first_id);

        p.tracker.complete_range(&first, "validator").await.unwrap();
        let validator_left = p
            .tracker
            .next_unprocessed_ranges(EntityKind::StagedClaim, "validator")
            .await
            .unwrap();
        let auditor_left = p
            .tracker
            .next_unprocessed_ranges(EntityKind::StagedClaim, "auditor")
            .await
            .unwrap();
        assert_eq!(validator_left.len(), 2);
        assert_eq!(auditor_left.len(), 3);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_committed_ranges_cover_exactly_their_rows(
            runs in prop::collection::vec((1usize..6, any::<bool>()), 1..8)
        ) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let p = pipeline(IntakeConfig { claim_capacity: 8, service_capacity: 8 });
                let channel = p.channels.register(NewChannel::new("PORTAL")).await.unwrap();
                let mut expected = 0u64;

                for (run, (size, commit)) in runs.iter().enumerate() {
                    let batch = p.intake.begin().await.unwrap();
                    for n in 0..*size {
                        p.intake
                            .ingest(&batch, envelope(channel.id, &format!("CLM-{run}-{n}")))
                            .await
                            .unwrap();
                    }
                    if *commit {
                        p.intake.commit(&batch).await.unwrap();
                        expected += *size as u64;
                    } else {
                        p.intake.abort(&batch).await.unwrap();
                    }
                }

                let ranges = p
                    .tracker
                    .next_unprocessed_ranges(EntityKind::StagedClaim, "validator")
                    .await
                    .unwrap();
                prop_assert!(ranges.windows(2).all(|w| w[0].last_id < w[1].first_id));
                prop_assert_eq!(ranges.iter().map(|r| r.len()).sum::<u64>(), expected);

                let claims = p.store.all_claims().await;
                prop_assert_eq!(claims.len() as u64, expected);
                for claim in &claims {
                    let covering: Vec<_> = ranges.iter().filter(|r| r.contains(claim.id.value())).collect();
                    prop_assert_eq!(covering.len(), 1);
                    prop_assert_eq!(covering[0].run_id, claim.run_id);
                }
                Ok(())
            })?;
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

mod validation_tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_deactivated_before_validation() {
        let p = pipeline(IntakeConfig::default());
        let channel = p.channels.register(NewChannel::new("SMART APPLICATIONS")).await.unwrap();
        let (committed, _) = p
            .intake
            .ingest_all(vec![envelope(channel.id, "CLM-2024-001")])
            .await
            .unwrap();

        p.channels.deactivate(channel.id).await.unwrap();
        let report = p.validator.validate(committed.claims.as_ref().unwrap()).await.unwrap();

        let quarantined = report.quarantined_for(QuarantineReason::InactiveChannel);
        assert_eq!(quarantined.len(), 1);
        assert!(matches!(quarantined[0], RowRef::Claim { .. }));
        assert!(report.promoted_claims.is_empty());
        assert!(p.promotion.promoted().await.is_empty());

        let claim = &p.store.all_claims().await[0];
        assert_eq!(claim.status, StagingStatus::Quarantined);
        assert_eq!(claim.quarantine_reason, Some(QuarantineReason::InactiveChannel));
        assert!(claim.processed);

        let (backlog, _) = p.validator.quarantine_backlog(10).await.unwrap();
        assert_eq!(backlog.len(), 1);
    }

    #[tokio::test]
    async fn test_orphaned_line_does_not_block_its_batch() {
        let p = pipeline(IntakeConfig::default());
        let channel = p.channels.register(NewChannel::new("PORTAL")).await.unwrap();

        let mut second = envelope(channel.id, "CLM-2");
        second.service_lines.push(line_for("CLM-MISSING"));
        let (committed, rejected) = p
            .intake
            .ingest_all(vec![envelope(channel.id, "CLM-1"), second, envelope(channel.id, "CLM-3")])
            .await
            .unwrap();
        assert!(rejected.is_empty());

        let claims_range = committed.claims.clone().unwrap();
        assert_eq!(claims_range.len(), 3);
        let staged: Vec<_> = p.store.all_claims().await.iter().map(|c| c.id.value()).collect();
        assert!(staged.iter().all(|id| claims_range.contains(*id)));

        let worker = ValidationWorker::new(
            p.validator.clone(),
            p.tracker.clone(),
            WorkerIdentity::new("validator", "worker-1"),
        );
        let report = worker.run_once().await.unwrap();

        assert_eq!(report.promoted_claims.len(), 3);
        let orphans = report.quarantined_for(QuarantineReason::OrphanedService);
        assert_eq!(orphans.len(), 1);
        match orphans[0] {
            RowRef::Service { claim_ref, .. } => {
                assert_eq!(claim_ref.external_claim_id.as_str(), "CLM-MISSING")
            }
            other => panic!("expected a service row, got {other:?}"),
        }
        assert_eq!(report.promoted_services.len(), 3);
        assert!(report.is_settled());

        let promoted = p.promotion.promoted().await;
        assert_eq!(promoted.len(), 3);
        assert!(promoted.iter().all(|c| c.services.len() == 1));

        // Both ranges are complete; a second pass has nothing to do
        let again = worker.run_once().await.unwrap();
        assert!(again.ranges.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_channel_in_staging_is_quarantined() {
        let p = pipeline(IntakeConfig::default());
        let channel = p.channels.register(NewChannel::new("PORTAL")).await.unwrap();
        let (committed, _) = p
            .intake
            .ingest_all(vec![envelope(channel.id, "CLM-1")])
            .await
            .unwrap();

        // A validator reading a registry that never saw the channel
        let validator = Validator::new(
            ChannelRegistry::new(Arc::new(MockRegistryPort::new())),
            Arc::new(p.store.clone()),
            p.tracker.clone(),
            Arc::new(p.promotion.clone()),
        );
        let report = validator.validate(committed.claims.as_ref().unwrap()).await.unwrap();
        assert_eq!(report.quarantined_for(QuarantineReason::UnknownChannel).len(), 1);
        assert_eq!(report.quarantined_for(QuarantineReason::ParentQuarantined).len(), 1);
    }

    #[tokio::test]
    async fn test_deferred_range_is_retried_by_worker() {
        let p = pipeline(IntakeConfig::default());
        let channel = p.channels.register(NewChannel::new("PORTAL")).await.unwrap();
        let (committed, _) = p
            .intake
            .ingest_all(vec![envelope(channel.id, "CLM-1")])
            .await
            .unwrap();
        let claim_id = StagedClaimId::new(committed.claims.as_ref().unwrap().first_id);

        let worker = ValidationWorker::new(
            p.validator.clone(),
            p.tracker.clone(),
            WorkerIdentity::new("validator", "worker-1"),
        );
        p.promotion.fail_for(claim_id).await;
        let report = worker.run_once().await.unwrap();
        assert!(!report.is_settled());

        p.promotion.recover(claim_id).await;
        let report = worker.run_once().await.unwrap();
        assert_eq!(report.promoted_claims, vec![claim_id]);
        assert!(worker.run_once().await.unwrap().ranges.is_empty());
    }

    #[tokio::test]
    async fn test_claim_pass_leaves_lines_of_open_runs_alone() {
        let p = pipeline(IntakeConfig::default());
        let channel = p.channels.register(NewChannel::new("PORTAL")).await.unwrap();
        let (first, _) = p
            .intake
            .ingest_all(vec![envelope(channel.id, "CLM-1")])
            .await
            .unwrap();

        let open = p.intake.begin().await.unwrap();
        let mut follow_up = envelope(channel.id, "CLM-2");
        follow_up.service_lines.push(line_for("CLM-1"));
        p.intake.ingest(&open, follow_up).await.unwrap();

        let report = p.validator.validate(first.claims.as_ref().unwrap()).await.unwrap();
        assert_eq!(report.promoted_claims.len(), 1);
        assert_eq!(report.promoted_services.len(), 1);
        let promoted = p.promotion.promoted().await;
        assert_eq!(promoted[0].services.len(), 1);
        assert!(promoted[0].services.iter().all(|s| s.run_id == first.run_id));

        p.intake.abort(&open).await.unwrap();
        assert!(p.promotion.late_lines().await.is_empty());
        assert_eq!(p.store.all_services().await.len(), 1);
    }

    #[tokio::test]
    async fn test_line_for_claim_of_earlier_run_is_promoted_late() {
        let p = pipeline(IntakeConfig::default());
        let channel = p.channels.register(NewChannel::new("PORTAL")).await.unwrap();
        p.intake.ingest_all(vec![envelope(channel.id, "CLM-1")]).await.unwrap();

        let mut follow_up = envelope(channel.id, "CLM-2");
        follow_up.service_lines.push(line_for("CLM-1"));
        p.intake.ingest_all(vec![follow_up]).await.unwrap();

        let worker = ValidationWorker::new(
            p.validator.clone(),
            p.tracker.clone(),
            WorkerIdentity::new("validator", "worker-1"),
        );
        let report = worker.run_once().await.unwrap();

        assert_eq!(report.promoted_claims.len(), 2);
        assert_eq!(report.promoted_services.len(), 3);
        assert!(report.quarantined.is_empty());
        let late = p.promotion.late_lines().await;
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].claim_ref.external_claim_id.as_str(), "CLM-1");
    }

    #[tokio::test]
    async fn test_parent_from_later_run_leaves_line_orphaned() {
        let p = pipeline(IntakeConfig::default());
        let channel = p.channels.register(NewChannel::new("PORTAL")).await.unwrap();

        let mut early = envelope(channel.id, "CLM-A");
        early.service_lines.push(line_for("CLM-Z"));
        p.intake.ingest_all(vec![early]).await.unwrap();
        p.intake.ingest_all(vec![envelope(channel.id, "CLM-Z")]).await.unwrap();

        let worker = ValidationWorker::new(
            p.validator.clone(),
            p.tracker.clone(),
            WorkerIdentity::new("validator", "worker-1"),
        );
        let report = worker.run_once().await.unwrap();

        assert_eq!(report.promoted_claims.len(), 2);
        let orphans = report.quarantined_for(QuarantineReason::OrphanedService);
        assert_eq!(orphans.len(), 1);
        match orphans[0] {
            RowRef::Service { claim_ref, .. } => {
                assert_eq!(claim_ref.external_claim_id.as_str(), "CLM-Z")
            }
            other => panic!("expected a service row, got {other:?}"),
        }
        assert!(p.promotion.late_lines().await.is_empty());

        let orphan = p
            .store
            .all_services()
            .await
            .into_iter()
            .find(|s| s.claim_ref.external_claim_id.as_str() == "CLM-Z")
            .unwrap();
        assert_eq!(orphan.parent_id, None);
        assert_eq!(orphan.status, StagingStatus::Quarantined);
    }

    #[tokio::test]
    async fn test_line_waits_for_parent_run_to_commit() {
        let p = pipeline(IntakeConfig::default());
        let channel = p.channels.register(NewChannel::new("PORTAL")).await.unwrap();

        let parent_run = p.intake.begin().await.unwrap();
        p.intake.ingest(&parent_run, envelope(channel.id, "CLM-1")).await.unwrap();

        let child_run = p.intake.begin().await.unwrap();
        let mut follow_up = envelope(channel.id, "CLM-2");
        follow_up.service_lines.push(line_for("CLM-1"));
        p.intake.ingest(&child_run, follow_up).await.unwrap();
        let child = p.intake.commit(&child_run).await.unwrap();
        let child_services = child.services.clone().unwrap();

        // The parent's claim range is still open
        let report = p.validator.validate(&child_services).await.unwrap();
        assert!(report.quarantined.is_empty());
        assert_eq!(report.deferred.len(), 2);
        assert!(!report.is_settled());

        let parent = p.intake.commit(&parent_run).await.unwrap();
        p.validator.validate(parent.claims.as_ref().unwrap()).await.unwrap();
        p.validator.validate(child.claims.as_ref().unwrap()).await.unwrap();

        let report = p.validator.validate(&child_services).await.unwrap();
        assert!(report.is_settled());
        assert!(report.quarantined.is_empty());
        assert_eq!(report.promoted_services.len(), 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(p.promotion.late_lines().await.len(), 1);
    }

    #[tokio::test]
    async fn test_line_orphaned_when_parent_run_aborts() {
        let p = pipeline(IntakeConfig::default());
        let channel = p.channels.register(NewChannel::new("PORTAL")).await.unwrap();

        let parent_run = p.intake.begin().await.unwrap();
        p.intake.ingest(&parent_run, envelope(channel.id, "CLM-1")).await.unwrap();

        let mut follow_up = envelope(channel.id, "CLM-2");
        follow_up.service_lines.push(line_for("CLM-1"));
        let (child, _) = p.intake.ingest_all(vec![follow_up]).await.unwrap();
        let child_services = child.services.clone().unwrap();

        let report = p.validator.validate(&child_services).await.unwrap();
        assert!(report.quarantined_for(QuarantineReason::OrphanedService).is_empty());

        p.intake.abort(&parent_run).await.unwrap();
        p.validator.validate(child.claims.as_ref().unwrap()).await.unwrap();
        let report = p.validator.validate(&child_services).await.unwrap();
        assert_eq!(report.quarantined_for(QuarantineReason::OrphanedService).len(), 1);
        assert!(report.is_settled());
    }
}
