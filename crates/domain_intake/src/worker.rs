//! Validation worker
//!
//! Drains committed ranges for one consumer name. Claim ranges are drained
//! before service ranges in every pass so a service line normally finds its
//! parent already decided. Several workers may share a consumer name; range
//! leases keep them on disjoint ranges.

use chrono::Duration;
use tracing::{debug, instrument};

use crate::error::IntakeError;
use crate::validation::{ValidationReport, Validator};
use crate::watermark::{EntityKind, WatermarkTracker};

/// Who is consuming ranges, and for how long a leased range is held
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    /// Progress is tracked per consumer
    pub consumer: String,
    /// Lease holder within the consumer
    pub worker: String,
    pub lease: Duration,
}

impl WorkerIdentity {
    pub fn new(consumer: impl Into<String>, worker: impl Into<String>) -> Self {
        Self {
            consumer: consumer.into(),
            worker: worker.into(),
            lease: Duration::minutes(5),
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }
}

#[derive(Clone)]
pub struct ValidationWorker {
    validator: Validator,
    tracker: WatermarkTracker,
    identity: WorkerIdentity,
}

impl ValidationWorker {
    pub fn new(validator: Validator, tracker: WatermarkTracker, identity: WorkerIdentity) -> Self {
        Self {
            validator,
            tracker,
            identity,
        }
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// Validates every range currently available to this worker
    ///
    /// A range is completed only when none of its rows were deferred. An
    /// unsettled range stays leased to this worker and is retried on the next
    /// pass, or by another worker once the lease expires.
    #[instrument(skip(self), fields(consumer = %self.identity.consumer, worker = %self.identity.worker))]
    pub async fn run_once(&self) -> Result<ValidationReport, IntakeError> {
        let mut report = ValidationReport::default();
        let consumer = &self.identity.consumer;
        for kind in EntityKind::ALL {
            for range in self.tracker.next_unprocessed_ranges(kind, consumer).await? {
                if !self
                    .tracker
                    .try_claim(&range, consumer, &self.identity.worker, self.identity.lease)
                    .await?
                {
                    continue;
                }
                let range_report = self.validator.validate(&range).await?;
                if range_report.is_settled() {
                    self.tracker.complete_range(&range, consumer).await?;
                } else {
                    debug!(watermark_id = %range.id, deferred = range_report.deferred.len(), "Range left open");
                }
                report.merge(range_report);
            }
        }
        Ok(report)
    }
}
