//! Intake Worker
//!
//! Runs the claims intake pipeline as a process:
//!
//! - **Config**: `WorkerConfig` loaded from `INTAKE_*` environment variables
//! - **Pipeline**: intake, watermark tracking, validation and upload tracking
//!   wired to one set of ports
//! - **Runner**: the polling loop that recovers abandoned runs and validates
//!   committed ranges
//! - **Promotion**: the handoff used when no production system is attached
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use interface_worker::{LogPromotionPort, Pipeline, PipelinePorts, WorkerConfig, WorkerLoop};
//!
//! let config = WorkerConfig::from_env()?;
//! let ports = PipelinePorts::postgres(pool, Arc::new(LogPromotionPort::new()));
//! let pipeline = Arc::new(Pipeline::new(ports, config.intake(), config.identity()));
//! WorkerLoop::new(pipeline, config.poll_interval(), config.stale_after())
//!     .run(tokio::signal::ctrl_c().map(|_| ()))
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod promotion;
pub mod runner;

pub use config::WorkerConfig;
pub use error::WorkerError;
pub use pipeline::{IngestSummary, Pipeline, PipelinePorts, RejectedEnvelope};
pub use promotion::LogPromotionPort;
pub use runner::{TickReport, WorkerLoop};
