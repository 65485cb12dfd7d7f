//! SimulationRunner: executes the compiled simulator for one backend

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::{Backend, BackendConfig};
use crate::build::remove_if_exists;
use crate::error::{HarnessError, HarnessResult, Stage};
use crate::params::SimulationParameters;
use crate::process::{Invocation, ProcessOutcome, ProcessRunner};

/// Suffix given to output files left behind by a failed or killed run
pub const PARTIAL_SUFFIX: &str = "partial";

/// Simulator section (`[simulator]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    /// Fixed flags placed after `-f <workunit> -o <output>`
    pub flags: Vec<String>,
    /// Timeout for one simulator run
    pub timeout_secs: Option<u64>,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            flags: vec!["-x".to_string(), "-i".to_string()],
            timeout_secs: None,
        }
    }
}

/// Output file of one simulator execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArtifact {
    pub output_path: PathBuf,
    pub backend: Backend,
}

impl RunArtifact {
    pub fn new(output_path: impl Into<PathBuf>, backend: Backend) -> Self {
        Self {
            output_path: output_path.into(),
            backend,
        }
    }

    pub fn path(&self) -> &Path {
        &self.output_path
    }
}

/// Runs the simulator binary with a fixed parameter set
pub struct SimulationRunner<'r> {
    binary: PathBuf,
    settings: SimulatorSettings,
    runner: &'r dyn ProcessRunner,
}

impl<'r> SimulationRunner<'r> {
    pub fn new(
        binary: impl Into<PathBuf>,
        settings: SimulatorSettings,
        runner: &'r dyn ProcessRunner,
    ) -> Self {
        Self {
            binary: binary.into(),
            settings,
            runner,
        }
    }

    /// Full simulator invocation for `config` and `params`:
    /// `<binary> -f <wu> -o <out> <flags> <runtime args> -e <seed> <steps> <extra>`
    pub fn invocation(&self, config: &BackendConfig, params: &SimulationParameters) -> Invocation {
        Invocation::new(&self.binary)
            .arg("-f")
            .arg(params.workunit_path.display().to_string())
            .arg("-o")
            .arg(params.output_path.display().to_string())
            .args(self.settings.flags.iter().cloned())
            .args(config.runtime_args().iter().cloned())
            .arg("-e")
            .arg(params.seed.to_string())
            .arg(params.timestep_count.to_string())
            .args(params.extra_args.iter().cloned())
    }

    /// Runs the simulator and waits for it.
    ///
    /// Any previous file at the output path is removed first. On success the
    /// output exists, is non-empty, and its path is returned unmodified.
    pub fn run(
        &self,
        config: &BackendConfig,
        params: &SimulationParameters,
    ) -> HarnessResult<RunArtifact> {
        let backend = config.backend();
        let output = params.output_path.clone();
        remove_if_exists(&output, Stage::Run)?;

        let invocation = self.invocation(config, params);
        info!(%backend, command = %invocation, "running simulator");
        let started = Instant::now();

        let outcome = match self
            .runner
            .run(&invocation, self.settings.timeout_secs.map(Duration::from_secs))
        {
            Ok(outcome) => outcome,
            Err(e) => {
                return Err(HarnessError::ExecutionFailure {
                    backend,
                    reason: e.to_string(),
                });
            }
        };

        match outcome {
            ProcessOutcome::Exited { code: Some(0) } => {}
            ProcessOutcome::TimedOut { elapsed } => {
                quarantine_partial(&output, backend);
                return Err(HarnessError::ExecutionTimeout {
                    stage: Stage::Run,
                    backend,
                    program: invocation.program_name(),
                    elapsed,
                });
            }
            other => {
                quarantine_partial(&output, backend);
                return Err(HarnessError::ExecutionFailure {
                    backend,
                    reason: other.describe(),
                });
            }
        }

        verify_output(&output, backend)?;
        info!(
            %backend,
            output = %output.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "simulator finished"
        );
        Ok(RunArtifact::new(output, backend))
    }
}

/// Output must exist and hold something other than whitespace.
fn verify_output(path: &Path, backend: Backend) -> HarnessResult<()> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(HarnessError::MissingOutputFailure {
                backend,
                path: path.to_path_buf(),
                reason: "file was not created".to_string(),
            });
        }
        Err(e) => return Err(HarnessError::io(Stage::Run, path, e)),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(HarnessError::MissingOutputFailure {
            backend,
            path: path.to_path_buf(),
            reason: "file is empty".to_string(),
        });
    }
    Ok(())
}

/// Renames a half-written output to `<output>.partial`.
fn quarantine_partial(path: &Path, backend: Backend) {
    if !path.exists() {
        return;
    }
    let mut partial = path.as_os_str().to_owned();
    partial.push(".");
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);
    match std::fs::rename(path, &partial) {
        Ok(()) => warn!(%backend, partial = %partial.display(), "kept incomplete output"),
        Err(e) => warn!(%backend, output = %path.display(), error = %e, "could not move incomplete output"),
    }
}
