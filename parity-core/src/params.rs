//! Simulation parameters shared by both backend runs

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// Default workunit shipped with the simulator sources
pub const DEFAULT_WORKUNIT: &str = "nbody/sample_workunits/EMD_10k_plummer.lua";
/// Default seed
pub const DEFAULT_SEED: u64 = 36912;
/// Default number of timesteps
pub const DEFAULT_TIMESTEPS: u64 = 10_000;

/// Parameters of one simulator invocation
///
/// Both backend runs use copies that differ only in `output_path`; see
/// [`SimulationParameters::ensure_parity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationParameters {
    /// Initial conditions (workunit script)
    pub workunit_path: PathBuf,
    /// Where the simulator writes its final state
    pub output_path: PathBuf,
    /// Deterministic seed (`-e`)
    pub seed: u64,
    /// Number of timesteps
    pub timestep_count: u64,
    /// Softening length and further tuning scalars, forwarded verbatim
    pub extra_args: Vec<String>,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            workunit_path: PathBuf::from(DEFAULT_WORKUNIT),
            output_path: PathBuf::from("GPUBRUTE.out"),
            seed: DEFAULT_SEED,
            timestep_count: DEFAULT_TIMESTEPS,
            extra_args: default_extra_args(),
        }
    }
}

pub(crate) fn default_extra_args() -> Vec<String> {
    vec!["1".to_string(), ".2".to_string(), "12".to_string()]
}

impl SimulationParameters {
    /// Copy of these parameters writing to another output file
    pub fn with_output_path(&self, output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            ..self.clone()
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Checks that two runs were parameterized identically.
    ///
    /// Everything except `output_path` must match, and the output paths must
    /// differ so neither run can overwrite the other's artifact.
    pub fn ensure_parity(&self, other: &SimulationParameters) -> HarnessResult<()> {
        let mut mismatches = Vec::new();
        if self.workunit_path != other.workunit_path {
            mismatches.push(format!(
                "workunit {} vs {}",
                self.workunit_path.display(),
                other.workunit_path.display()
            ));
        }
        if self.seed != other.seed {
            mismatches.push(format!("seed {} vs {}", self.seed, other.seed));
        }
        if self.timestep_count != other.timestep_count {
            mismatches.push(format!(
                "timesteps {} vs {}",
                self.timestep_count, other.timestep_count
            ));
        }
        if self.extra_args != other.extra_args {
            mismatches.push(format!(
                "extra args {:?} vs {:?}",
                self.extra_args, other.extra_args
            ));
        }
        if self.output_path == other.output_path {
            mismatches.push(format!(
                "both runs write to {}",
                self.output_path.display()
            ));
        }

        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::ParameterMismatch(mismatches.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_parameters() {
        let params = SimulationParameters::default();
        assert_eq!(params.seed, 36912);
        assert_eq!(params.timestep_count, 10_000);
        assert_eq!(params.extra_args, vec!["1", ".2", "12"]);
    }

    #[test]
    fn test_parity_accepts_output_only_difference() {
        let gpu = SimulationParameters::default();
        let cpu = gpu.with_output_path("CPUBRUTE.out");
        assert!(gpu.ensure_parity(&cpu).is_ok());
    }

    #[test]
    fn test_parity_rejects_seed_difference() {
        let gpu = SimulationParameters::default();
        let mut cpu = gpu.with_output_path("CPUBRUTE.out");
        cpu.seed = 1;
        let err = gpu.ensure_parity(&cpu).unwrap_err();
        assert!(err.to_string().contains("seed 36912 vs 1"));
    }

    #[test]
    fn test_parity_rejects_shared_output() {
        let gpu = SimulationParameters::default();
        let err = gpu.ensure_parity(&gpu.clone()).unwrap_err();
        assert!(matches!(err, HarnessError::ParameterMismatch(_)));
    }
}
