//! Harness configuration (`nbody-parity.toml`)
//!
//! Every section is optional; a missing file means the stock defaults
//! (workunit, seed, timesteps). Environment variables (also read from `.env`) override
//! the file, and command-line flags override both.

use std::env;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::build::BuildSettings;
use crate::error::{HarnessError, HarnessResult};
use crate::params::{self, SimulationParameters};
use crate::residual::Tolerance;
use crate::runner::SimulatorSettings;
use crate::sink::PlotSettings;

/// File searched for from the working directory upwards
pub const CONFIG_FILE_NAME: &str = "nbody-parity.toml";

/// Simulator binary override
pub const ENV_BINARY: &str = "NBODY_PARITY_BINARY";
/// Source directory override
pub const ENV_SOURCE_DIR: &str = "NBODY_PARITY_SOURCE_DIR";
/// Per-run simulator timeout override, in seconds
pub const ENV_TIMEOUT_SECS: &str = "NBODY_PARITY_TIMEOUT_SECS";

static DOTENV_INIT: Lazy<()> = Lazy::new(|| {
    let _ = dotenv::dotenv();
});

#[inline]
fn ensure_loaded() {
    let _ = &*DOTENV_INIT;
}

/// Parameters section (`[parameters]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub workunit: PathBuf,
    pub seed: u64,
    pub timesteps: u64,
    /// Softening length and tuning scalars
    pub extra_args: Vec<String>,
    pub gpu_output: PathBuf,
    pub cpu_output: PathBuf,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            workunit: PathBuf::from(params::DEFAULT_WORKUNIT),
            seed: params::DEFAULT_SEED,
            timesteps: params::DEFAULT_TIMESTEPS,
            extra_args: params::default_extra_args(),
            gpu_output: PathBuf::from("GPUBRUTE.out"),
            cpu_output: PathBuf::from("CPUBRUTE.out"),
        }
    }
}

impl RunSettings {
    pub fn output_for(&self, backend: Backend) -> &Path {
        match backend {
            Backend::Gpu => &self.gpu_output,
            Backend::Cpu => &self.cpu_output,
        }
    }

    /// Parameters shared by both runs, writing to the GPU output
    pub fn parameters(&self) -> SimulationParameters {
        SimulationParameters {
            workunit_path: self.workunit.clone(),
            output_path: self.gpu_output.clone(),
            seed: self.seed,
            timestep_count: self.timesteps,
            extra_args: self.extra_args.clone(),
        }
    }
}

/// Comparison section (`[compare]`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareSettings {
    pub max_abs: Option<f64>,
    pub max_rel: Option<f64>,
    /// Drop per-sample differences from the report
    pub summary_only: bool,
}

impl CompareSettings {
    pub fn tolerance(&self) -> Tolerance {
        Tolerance {
            max_abs: self.max_abs,
            max_rel: self.max_rel,
        }
    }

    /// Tolerances must be finite and non-negative
    pub fn validate(&self) -> HarnessResult<()> {
        for (name, value) in [("max_abs", self.max_abs), ("max_rel", self.max_rel)] {
            if let Some(v) = value {
                if !(v.is_finite() && v >= 0.0) {
                    return Err(HarnessError::Config(format!(
                        "compare.{name} must be a non-negative number, got {v}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Complete harness configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub build: BuildSettings,
    pub simulator: SimulatorSettings,
    pub parameters: RunSettings,
    pub compare: CompareSettings,
    pub plot: PlotSettings,
}

impl HarnessConfig {
    /// Parse a configuration from TOML
    pub fn from_toml(content: &str) -> HarnessResult<Self> {
        toml::from_str(content)
            .map_err(|e| HarnessError::Config(format!("failed to parse configuration: {e}")))
    }

    /// Load a configuration file
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Search `start_dir` and its parents for [`CONFIG_FILE_NAME`]
    pub fn find_and_load(start_dir: &Path) -> HarnessResult<Option<(Self, PathBuf)>> {
        let mut current = start_dir.to_path_buf();
        loop {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                let config = Self::from_file(&candidate)?;
                return Ok(Some((config, candidate)));
            }
            if !current.pop() {
                return Ok(None);
            }
        }
    }

    /// Explicit file if given, otherwise the nearest config file, otherwise
    /// defaults. Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>, start_dir: &Path) -> HarnessResult<(Self, Option<PathBuf>)> {
        let (mut config, source) = match explicit {
            Some(path) => (Self::from_file(path)?, Some(path.to_path_buf())),
            None => match Self::find_and_load(start_dir)? {
                Some((config, path)) => (config, Some(path)),
                None => (Self::default(), None),
            },
        };
        config.apply_env_overrides()?;
        Ok((config, source))
    }

    /// Apply `NBODY_PARITY_*` overrides from the process environment and `.env`
    pub fn apply_env_overrides(&mut self) -> HarnessResult<()> {
        ensure_loaded();
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> HarnessResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(binary) = lookup(ENV_BINARY) {
            self.build.binary = PathBuf::from(binary);
        }
        if let Some(dir) = lookup(ENV_SOURCE_DIR) {
            self.build.source_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            let secs = secs.trim().parse::<u64>().map_err(|_| {
                HarnessError::Config(format!("{ENV_TIMEOUT_SECS} must be a whole number of seconds, got `{secs}`"))
            })?;
            self.simulator.timeout_secs = Some(secs);
        }
        Ok(())
    }

    /// Reject configurations that cannot produce a meaningful comparison
    pub fn validate(&self) -> HarnessResult<()> {
        if self.parameters.timesteps == 0 {
            return Err(HarnessError::Config("timesteps must be greater than zero".into()));
        }
        if self.parameters.gpu_output == self.parameters.cpu_output {
            return Err(HarnessError::Config(format!(
                "GPU and CPU runs must write to different files (both use {})",
                self.parameters.gpu_output.display()
            )));
        }
        self.compare.validate()
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> HarnessResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| HarnessError::Config(format!("failed to serialize configuration: {e}")))
    }
}
