//! Parity run orchestration

use std::time::Instant;

use parity_core::{
    remove_if_exists, Backend, BackendConfig, BuildConfigurator, HarnessConfig, JsonReportSink,
    PlotCommand, ProcessRunner, ReportSink, ResidualComparator, ResidualReport, RunArtifact,
    SimulationParameters, SimulationRunner, Stage, Verdict,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::pipeline::{Pipeline, PipelineStage, StageRecord};

/// A sink that failed during publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkFailure {
    pub sink: String,
    pub message: String,
}

/// Everything a successful run produced
#[derive(Debug, Clone)]
pub struct ParityOutcome {
    pub gpu: RunArtifact,
    pub cpu: RunArtifact,
    pub report: ResidualReport,
    /// Report checked against the configured tolerance
    pub verdict: Verdict,
    pub stages: Vec<StageRecord>,
    pub sink_failures: Vec<SinkFailure>,
}

impl ParityOutcome {
    /// Turns a failing verdict into [`OrchestrationError::ToleranceExceeded`]
    pub fn ensure_within_tolerance(&self) -> OrchestrationResult<()> {
        if self.verdict.passed() {
            Ok(())
        } else {
            Err(OrchestrationError::ToleranceExceeded {
                violations: self.verdict.violations.clone(),
            })
        }
    }
}

/// Results carried from one stage to the next
#[derive(Default)]
struct StageResults {
    gpu_config: Option<BackendConfig>,
    cpu_config: Option<BackendConfig>,
    gpu: Option<RunArtifact>,
    cpu: Option<RunArtifact>,
    report: Option<ResidualReport>,
    sink_failures: Vec<SinkFailure>,
}

/// Components shared by every stage of one run
struct Stages<'a> {
    builder: BuildConfigurator<'a>,
    simulator: SimulationRunner<'a>,
    comparator: ResidualComparator,
    gpu_params: SimulationParameters,
    cpu_params: SimulationParameters,
}

/// Drives GPU build, GPU run, CPU build, CPU run, comparison and publish
pub struct Orchestrator<'r> {
    config: HarnessConfig,
    pipeline: Pipeline,
    runner: &'r dyn ProcessRunner,
    sinks: Vec<Box<dyn ReportSink + 'r>>,
}

impl<'r> Orchestrator<'r> {
    /// Validates `config`; no sinks are attached yet
    pub fn new(config: HarnessConfig, runner: &'r dyn ProcessRunner) -> OrchestrationResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pipeline: Pipeline::new(),
            runner,
            sinks: Vec::new(),
        })
    }

    /// Attaches the sinks named in the `[plot]` section
    pub fn with_configured_sinks(mut self) -> Self {
        if self.config.plot.enabled {
            let plot = PlotCommand::new(&self.config.plot, self.runner);
            self.sinks.push(Box::new(plot));
        }
        if let Some(path) = self.config.plot.report_json.clone() {
            self.sinks.push(Box::new(JsonReportSink::new(path)));
        }
        self
    }

    pub fn add_sink(&mut self, sink: Box<dyn ReportSink + 'r>) {
        self.sinks.push(sink);
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Parameters of the GPU and CPU runs, checked for parity
    pub fn parameters(&self) -> OrchestrationResult<(SimulationParameters, SimulationParameters)> {
        let gpu = self.config.parameters.parameters();
        let cpu = gpu.with_output_path(self.config.parameters.output_for(Backend::Cpu));
        gpu.ensure_parity(&cpu)?;
        Ok((gpu, cpu))
    }

    /// Runs every stage in order.
    ///
    /// Both declared output files are removed before the first stage, so a
    /// failed run never leaves a previous run's artifacts behind.
    /// The first failing stage aborts the run and its error is returned.
    /// Sink failures are logged and collected in the outcome. A tolerance
    /// violation is not an error here; see [`ParityOutcome::ensure_within_tolerance`].
    pub fn run(&mut self) -> OrchestrationResult<ParityOutcome> {
        let (gpu_params, cpu_params) = self.parameters()?;
        for params in [&gpu_params, &cpu_params] {
            remove_if_exists(params.output_path(), Stage::Setup)?;
        }

        let Self {
            config,
            pipeline,
            runner,
            sinks,
        } = self;
        let runner: &dyn ProcessRunner = *runner;

        let comparator = if config.compare.summary_only {
            ResidualComparator::new().summary_only()
        } else {
            ResidualComparator::new()
        };
        let stages = Stages {
            builder: BuildConfigurator::new(config.build.clone(), runner),
            simulator: SimulationRunner::new(
                config.build.binary_path(),
                config.simulator.clone(),
                runner,
            ),
            comparator,
            gpu_params,
            cpu_params,
        };

        let mut results = StageResults::default();
        pipeline.start();
        while let Some(stage) = pipeline.current_stage() {
            debug!(%stage, "stage started");
            let started = Instant::now();
            match stages.execute(stage, &mut results, sinks.as_slice()) {
                Ok(()) => {
                    let elapsed = started.elapsed();
                    info!(%stage, elapsed_ms = elapsed.as_millis() as u64, "stage completed");
                    pipeline.complete(stage, elapsed);
                }
                Err(e) => {
                    error!(%stage, error = %e, "stage failed");
                    pipeline.fail(stage, started.elapsed(), e.to_string());
                    return Err(e);
                }
            }
        }

        let StageResults {
            gpu: Some(gpu),
            cpu: Some(cpu),
            report: Some(report),
            sink_failures,
            ..
        } = results
        else {
            return Err(OrchestrationError::InvalidPipeline(
                "pipeline finished without both artifacts and a report".into(),
            ));
        };

        let verdict = report.verdict(&config.compare.tolerance());
        for violation in &verdict.violations {
            warn!(%violation, "tolerance exceeded");
        }

        Ok(ParityOutcome {
            gpu,
            cpu,
            report,
            verdict,
            stages: pipeline.records().to_vec(),
            sink_failures,
        })
    }
}

impl Stages<'_> {
    fn execute(
        &self,
        stage: PipelineStage,
        results: &mut StageResults,
        sinks: &[Box<dyn ReportSink + '_>],
    ) -> OrchestrationResult<()> {
        match stage {
            PipelineStage::BuildGpu => {
                results.gpu_config = Some(self.builder.apply(Backend::Gpu)?);
            }
            PipelineStage::RunGpu => {
                let config = require(results.gpu_config.as_ref(), stage)?;
                results.gpu = Some(self.simulator.run(config, &self.gpu_params)?);
            }
            PipelineStage::BuildCpu => {
                results.cpu_config = Some(self.builder.apply(Backend::Cpu)?);
            }
            PipelineStage::RunCpu => {
                let config = require(results.cpu_config.as_ref(), stage)?;
                results.cpu = Some(self.simulator.run(config, &self.cpu_params)?);
            }
            PipelineStage::Compare => {
                let gpu = require(results.gpu.as_ref(), stage)?;
                let cpu = require(results.cpu.as_ref(), stage)?;
                let report = self.comparator.compare(gpu, cpu)?;
                info!(
                    max_abs = report.summary.max_abs,
                    max_rel = report.summary.max_rel,
                    flagged = report.flagged_count(),
                    "residuals computed"
                );
                results.report = Some(report);
            }
            PipelineStage::Publish => {
                let report = require(results.report.as_ref(), stage)?;
                let gpu = require(results.gpu.as_ref(), stage)?;
                let cpu = require(results.cpu.as_ref(), stage)?;
                for sink in sinks {
                    if let Err(e) = sink.publish(report, gpu, cpu) {
                        warn!(sink = sink.name(), error = %e, "report sink failed");
                        results.sink_failures.push(SinkFailure {
                            sink: sink.name().to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn require<T>(value: Option<&T>, stage: PipelineStage) -> OrchestrationResult<&T> {
    value.ok_or_else(|| {
        OrchestrationError::InvalidPipeline(format!("stage {stage} ran before its inputs existed"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_core::process::mock::ScriptedRunner;

    #[test]
    fn test_invalid_config_rejected() {
        let runner = ScriptedRunner::new();
        let mut config = HarnessConfig::default();
        config.parameters.timesteps = 0;

        let err = Orchestrator::new(config, &runner).err().unwrap();
        assert_eq!(err.exit_code(), crate::error::EXIT_SETUP);
        assert!(runner.invocations().is_empty());
    }

    #[test]
    fn test_configured_sinks() {
        let runner = ScriptedRunner::new();
        let mut config = HarnessConfig::default();
        config.plot.report_json = Some("report.json".into());

        let orch = Orchestrator::new(config.clone(), &runner)
            .unwrap()
            .with_configured_sinks();
        assert_eq!(orch.sink_names(), vec!["plot", "json"]);

        config.plot.enabled = false;
        config.plot.report_json = None;
        let orch = Orchestrator::new(config, &runner).unwrap().with_configured_sinks();
        assert!(orch.sink_names().is_empty());
    }

    #[test]
    fn test_parameters_share_everything_but_output() {
        let runner = ScriptedRunner::new();
        let orch = Orchestrator::new(HarnessConfig::default(), &runner).unwrap();
        let (gpu, cpu) = orch.parameters().unwrap();

        assert_eq!(gpu.seed, cpu.seed);
        assert_eq!(gpu.timestep_count, cpu.timestep_count);
        assert_eq!(gpu.output_path(), std::path::Path::new("GPUBRUTE.out"));
        assert_eq!(cpu.output_path(), std::path::Path::new("CPUBRUTE.out"));
    }

    #[test]
    fn test_require_missing_input() {
        let err = require::<u8>(None, PipelineStage::Compare).unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidPipeline(_)));
    }
}
