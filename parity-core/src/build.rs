//! BuildConfigurator: selects a backend flag set and rebuilds the simulator
//!
//! ```text
//! configure(backend) ──► BackendConfig
//!                            │
//!   clean binary ──► cmake <flags> <source_dir> ──► make ──► binary exists?
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::{Backend, BackendConfig, BackendProfile};
use crate::error::{HarnessError, HarnessResult, Stage};
use crate::process::{Invocation, ProcessOutcome, ProcessRunner};

/// Build configuration section (`[build]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Directory holding the top-level CMakeLists.txt
    pub source_dir: PathBuf,
    /// Directory cmake and make run in
    pub build_dir: PathBuf,
    /// cmake executable
    pub cmake: PathBuf,
    /// make executable
    pub make: PathBuf,
    /// Extra make arguments (e.g. `-j8`)
    pub make_args: Vec<String>,
    /// Simulator binary, relative to `build_dir` unless absolute
    pub binary: PathBuf,
    /// Timeout for each of the configure and compile steps
    pub timeout_secs: Option<u64>,
    /// Reuse the existing binary instead of rebuilding
    pub skip: bool,
    /// GPU flag set
    pub gpu: BackendProfile,
    /// CPU flag set
    pub cpu: BackendProfile,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            build_dir: PathBuf::from("."),
            cmake: PathBuf::from("cmake"),
            make: PathBuf::from("make"),
            make_args: Vec::new(),
            binary: PathBuf::from("bin/milkyway_nbody"),
            timeout_secs: None,
            skip: false,
            gpu: BackendProfile::gpu(),
            cpu: BackendProfile::cpu(),
        }
    }
}

impl BuildSettings {
    /// Resolved path of the simulator binary
    pub fn binary_path(&self) -> PathBuf {
        if self.binary.is_absolute() {
            self.binary.clone()
        } else {
            self.build_dir.join(&self.binary)
        }
    }

    pub fn profile(&self, backend: Backend) -> &BackendProfile {
        match backend {
            Backend::Gpu => &self.gpu,
            Backend::Cpu => &self.cpu,
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Selects and applies backend configurations before compilation
pub struct BuildConfigurator<'r> {
    settings: BuildSettings,
    runner: &'r dyn ProcessRunner,
}

impl<'r> BuildConfigurator<'r> {
    pub fn new(settings: BuildSettings, runner: &'r dyn ProcessRunner) -> Self {
        Self { settings, runner }
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Deterministic flag set for `backend`
    pub fn configure(&self, backend: Backend) -> BackendConfig {
        BackendConfig::new(backend, self.settings.profile(backend).clone())
    }

    /// Configures and, unless building is skipped, rebuilds for `backend`.
    /// Returns the configuration the simulator must run with.
    pub fn apply(&self, backend: Backend) -> HarnessResult<BackendConfig> {
        let config = self.configure(backend);
        if self.settings.skip {
            self.verify_binary(backend)?;
            info!(%backend, binary = %self.settings.binary_path().display(), "skipping build");
        } else {
            self.build(&config)?;
        }
        Ok(config)
    }

    /// Runs configure + compile for `config`.
    ///
    /// The previous binary is removed first, so a failed compile can never
    /// leave a stale binary behind for the run stage.
    pub fn build(&self, config: &BackendConfig) -> HarnessResult<PathBuf> {
        let backend = config.backend();
        let binary = self.settings.binary_path();
        remove_if_exists(&binary, Stage::Build)?;

        let configure = Invocation::new(&self.settings.cmake)
            .args(config.configure_args())
            .arg(self.settings.source_dir.display().to_string())
            .current_dir(&self.settings.build_dir);
        info!(%backend, command = %configure, "configuring");
        self.run_step(backend, &configure)?;

        let compile = Invocation::new(&self.settings.make)
            .args(self.settings.make_args.iter().cloned())
            .current_dir(&self.settings.build_dir);
        info!(%backend, command = %compile, "compiling");
        self.run_step(backend, &compile)?;

        self.verify_binary(backend)?;
        Ok(binary)
    }

    fn verify_binary(&self, backend: Backend) -> HarnessResult<()> {
        let binary = self.settings.binary_path();
        if binary.is_file() {
            Ok(())
        } else {
            Err(HarnessError::BuildFailure {
                backend,
                reason: format!("simulator binary {} not found", binary.display()),
            })
        }
    }

    fn run_step(&self, backend: Backend, invocation: &Invocation) -> HarnessResult<()> {
        let outcome = self
            .runner
            .run(invocation, self.settings.timeout())
            .map_err(|e| HarnessError::BuildFailure {
                backend,
                reason: e.to_string(),
            })?;

        match outcome {
            ProcessOutcome::Exited { code: Some(0) } => Ok(()),
            ProcessOutcome::TimedOut { elapsed } => Err(HarnessError::ExecutionTimeout {
                stage: Stage::Build,
                backend,
                program: invocation.program_name(),
                elapsed,
            }),
            other => {
                warn!(%backend, command = %invocation, status = %other.describe(), "build step failed");
                Err(HarnessError::BuildFailure {
                    backend,
                    reason: format!("`{}` ended with {}", invocation.program_name(), other.describe()),
                })
            }
        }
    }
}

/// Removes a declared file; a missing file is not an error.
pub fn remove_if_exists(path: &Path, stage: Stage) -> HarnessResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HarnessError::io(stage, path, e)),
    }
}
