//! # 🔬 parity-core: GPU/CPU differential verification
//!
//! Builds the N-body simulator under two backend configurations, runs both
//! with identical parameters, and reconciles their outputs.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       ProcessRunner                          │
//! │      SystemProcessRunner (std::process)  |  ScriptedRunner   │
//! └──────────────┬──────────────────────┬────────────────────────┘
//!                │                      │
//!   ┌────────────▼─────────┐  ┌─────────▼──────────┐  ┌───────────────────┐
//!   │  BuildConfigurator   │─►│  SimulationRunner  │─►│ ResidualComparator│
//!   │  GPU / CPU flag sets │  │  -f wu -o out -e … │  │ align · Δ · stats │
//!   └──────────────────────┘  └────────────────────┘  └─────────┬─────────┘
//!                                                               │
//!                                                     ┌─────────▼─────────┐
//!                                                     │    ReportSink     │
//!                                                     │   plot  |  JSON   │
//!                                                     └───────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use parity_core::*;
//!
//! let runner = SystemProcessRunner::new();
//! let config = HarnessConfig::default();
//! let builder = BuildConfigurator::new(config.build.clone(), &runner);
//! let sim = SimulationRunner::new(config.build.binary_path(), config.simulator.clone(), &runner);
//!
//! let params = config.parameters.parameters();
//! let gpu = sim.run(&builder.apply(Backend::Gpu)?, &params)?;
//! let cpu = sim.run(&builder.apply(Backend::Cpu)?, &params.with_output_path("CPUBRUTE.out"))?;
//!
//! let report = ResidualComparator::new().compare(&gpu, &cpu)?;
//! println!("max |Δ| = {:e}", report.summary.max_abs);
//! ```

pub mod backend;
pub mod build;
pub mod config;
pub mod error;
pub mod params;
pub mod process;
pub mod residual;
pub mod runner;
pub mod sink;

pub use backend::{Backend, BackendConfig, BackendProfile};
pub use build::{remove_if_exists, BuildConfigurator, BuildSettings};
pub use config::{CompareSettings, HarnessConfig, RunSettings, CONFIG_FILE_NAME};
pub use error::{HarnessError, HarnessResult, Stage};
pub use params::SimulationParameters;
pub use process::{Invocation, ProcessError, ProcessOutcome, ProcessRunner, SystemProcessRunner};
pub use residual::{
    ArtifactRecords, FieldSummary, FlagKind, FlaggedSample, ResidualComparator, ResidualReport,
    ResidualSummary, SampleResidual, Tolerance, Verdict,
};
pub use runner::{RunArtifact, SimulationRunner, SimulatorSettings};
pub use sink::{JsonReportSink, PlotCommand, PlotSettings, ReportSink, SinkError};
