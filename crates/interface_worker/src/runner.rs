//! Polling loop
//!
//! Each tick first releases reservations left open by crashed runs, then
//! drains the committed ranges available to this worker. Transient storage
//! failures are logged and retried on the next tick; anything else stops the
//! loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use domain_intake::{Reservation, ValidationReport};

use crate::error::WorkerError;
use crate::pipeline::Pipeline;

/// Work done in one tick
#[derive(Debug, Default)]
pub struct TickReport {
    pub released: Vec<Reservation>,
    pub validation: ValidationReport,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.released.is_empty() && self.validation.ranges.is_empty()
    }
}

pub struct WorkerLoop {
    pipeline: Arc<Pipeline>,
    poll_interval: Duration,
    stale_after: chrono::Duration,
}

impl WorkerLoop {
    pub fn new(pipeline: Arc<Pipeline>, poll_interval: Duration, stale_after: chrono::Duration) -> Self {
        Self {
            pipeline,
            poll_interval,
            stale_after,
        }
    }

    /// Runs one recovery and validation pass
    pub async fn tick(&self) -> Result<TickReport, WorkerError> {
        let released = self.pipeline.watermarks.abandon_stale(self.stale_after).await?;
        let validation = self.pipeline.worker.run_once().await?;
        Ok(TickReport { released, validation })
    }

    /// Ticks until `shutdown` resolves; returns the number of completed ticks
    pub async fn run<F>(&self, shutdown: F) -> Result<u64, WorkerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticks = 0u64;
        loop {
            match self.tick().await {
                Ok(report) => {
                    ticks += 1;
                    if !report.is_idle() {
                        info!(
                            released = report.released.len(),
                            ranges = report.validation.ranges.len(),
                            promoted_claims = report.validation.promoted_claims.len(),
                            promoted_services = report.validation.promoted_services.len(),
                            quarantined = report.validation.quarantined.len(),
                            deferred = report.validation.deferred.len(),
                            "Worker tick finished"
                        );
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "Worker tick failed, retrying next poll");
                }
                Err(e) => {
                    error!(error = %e, "Worker tick failed");
                    return Err(e);
                }
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!(ticks, "Worker loop stopping");
                    return Ok(ticks);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
