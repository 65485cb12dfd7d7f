//! Plotting boundary
//!
//! A [`ResidualReport`] is handed to zero or more sinks once the comparison
//! is done. Nothing a sink returns feeds back into the run; callers log sink
//! errors and move on.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::process::{Invocation, ProcessError, ProcessRunner};
use crate::residual::ResidualReport;
use crate::runner::RunArtifact;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("`{program}` ended with {status}")]
    Failed { program: String, status: String },

    #[error("failed to write report {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Consumer of a finished comparison
pub trait ReportSink {
    fn name(&self) -> &str;

    fn publish(
        &self,
        report: &ResidualReport,
        left: &RunArtifact,
        right: &RunArtifact,
    ) -> Result<(), SinkError>;
}

/// Plot section (`[plot]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotSettings {
    pub enabled: bool,
    /// Plotting program
    pub program: PathBuf,
    /// Arguments placed before the two artifact paths
    pub args: Vec<String>,
    pub timeout_secs: Option<u64>,
    /// Where to write the JSON report, if anywhere
    pub report_json: Option<PathBuf>,
}

impl Default for PlotSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            program: PathBuf::from("python2"),
            args: vec!["PlotNbodyResidual.py".to_string()],
            timeout_secs: None,
            report_json: None,
        }
    }
}

/// Runs an external plotting program on the two artifacts
pub struct PlotCommand<'r> {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
    runner: &'r dyn ProcessRunner,
}

impl<'r> PlotCommand<'r> {
    pub fn new(settings: &PlotSettings, runner: &'r dyn ProcessRunner) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
            timeout: settings.timeout_secs.map(Duration::from_secs),
            runner,
        }
    }

    pub fn invocation(&self, left: &RunArtifact, right: &RunArtifact) -> Invocation {
        Invocation::new(&self.program)
            .args(self.args.iter().cloned())
            .arg(left.path().display().to_string())
            .arg(right.path().display().to_string())
    }
}

impl ReportSink for PlotCommand<'_> {
    fn name(&self) -> &str {
        "plot"
    }

    fn publish(
        &self,
        _report: &ResidualReport,
        left: &RunArtifact,
        right: &RunArtifact,
    ) -> Result<(), SinkError> {
        let invocation = self.invocation(left, right);
        info!(command = %invocation, "plotting residuals");
        let outcome = self.runner.run(&invocation, self.timeout)?;
        if outcome.success() {
            Ok(())
        } else {
            Err(SinkError::Failed {
                program: invocation.program_name(),
                status: outcome.describe(),
            })
        }
    }
}

/// Writes the report as pretty-printed JSON
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    path: PathBuf,
}

impl JsonReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for JsonReportSink {
    fn name(&self) -> &str {
        "json"
    }

    fn publish(
        &self,
        report: &ResidualReport,
        left: &RunArtifact,
        right: &RunArtifact,
    ) -> Result<(), SinkError> {
        let document = serde_json::json!({
            "left": left,
            "right": right,
            "report": report,
        });
        let text = serde_json::to_string_pretty(&document)?;
        std::fs::write(&self.path, text).map_err(|source| SinkError::Write {
            path: self.path.clone(),
            source,
        })?;
        info!(path = %self.path.display(), "wrote residual report");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::process::mock::{self, ScriptedRunner};
    use crate::residual::{ArtifactRecords, ResidualComparator};

    fn sample_report() -> ResidualReport {
        let gpu = ArtifactRecords::parse("1.0 2.0\n", "GPUBRUTE.out", "GPU");
        let cpu = ArtifactRecords::parse("1.0 2.5\n", "CPUBRUTE.out", "CPU");
        ResidualComparator::new().compare_records(&gpu, &cpu).unwrap()
    }

    fn artifacts() -> (RunArtifact, RunArtifact) {
        (
            RunArtifact::new("GPUBRUTE.out", Backend::Gpu),
            RunArtifact::new("CPUBRUTE.out", Backend::Cpu),
        )
    }

    #[test]
    fn test_plot_command_appends_artifact_paths() {
        let runner = ScriptedRunner::new();
        let plot = PlotCommand::new(&PlotSettings::default(), &runner);
        let (gpu, cpu) = artifacts();

        plot.publish(&sample_report(), &gpu, &cpu).unwrap();
        let calls = runner.invocations();
        assert_eq!(
            calls[0].to_string(),
            "python2 PlotNbodyResidual.py GPUBRUTE.out CPUBRUTE.out"
        );
    }

    #[test]
    fn test_plot_failure_is_reported() {
        let runner = ScriptedRunner::new().on("python2", |_| mock::exit(1));
        let plot = PlotCommand::new(&PlotSettings::default(), &runner);
        let (gpu, cpu) = artifacts();

        let err = plot.publish(&sample_report(), &gpu, &cpu).unwrap_err();
        assert!(err.to_string().contains("exit status 1"));
    }

    #[test]
    fn test_json_sink_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("residual.json");
        let (gpu, cpu) = artifacts();

        JsonReportSink::new(&path)
            .publish(&sample_report(), &gpu, &cpu)
            .unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["left"]["backend"], "gpu");
        assert_eq!(value["report"]["summary"]["max_abs"], 0.5);
    }
}
