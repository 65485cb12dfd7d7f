//! # 🎭 parity-orchestration: the GPU-then-CPU parity pipeline
//!
//! Sequences the `parity-core` components into one run and maps every
//! failure to the stage it came from.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Orchestrator                             │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │            Execution Pipeline                         │  │
//! │  │  build/GPU → run/GPU → build/CPU → run/CPU            │  │
//! │  │            → compare → publish                        │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │            Report Sinks                               │  │
//! │  │  plot | json                                          │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use parity_orchestration::Orchestrator;
//! use parity_core::{HarnessConfig, SystemProcessRunner};
//!
//! let runner = SystemProcessRunner::new();
//! let mut orch = Orchestrator::new(HarnessConfig::default(), &runner)?.with_configured_sinks();
//!
//! let outcome = orch.run()?;
//! outcome.ensure_within_tolerance()?;
//! ```

pub mod error;
pub mod orchestrator;
pub mod pipeline;

pub use error::{
    exit_code_for, OrchestrationError, OrchestrationResult, EXIT_BUILD, EXIT_COMPARE, EXIT_RUN,
    EXIT_SETUP,
};
pub use orchestrator::{Orchestrator, ParityOutcome, SinkFailure};
pub use pipeline::{Pipeline, PipelineStage, StageRecord, StageStatus};
