//! Orchestration errors and process exit codes

use parity_core::{HarnessError, Stage};
use thiserror::Error;

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// Exit code for configuration, usage and setup I/O errors
pub const EXIT_SETUP: i32 = 1;
/// Exit code for build-stage failures
pub const EXIT_BUILD: i32 = 2;
/// Exit code for execution-stage failures (including timeouts and missing output)
pub const EXIT_RUN: i32 = 3;
/// Exit code for comparison-stage failures (including tolerance violations)
pub const EXIT_COMPARE: i32 = 4;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Failure inside a stage
    #[error(transparent)]
    Harness(#[from] HarnessError),

    /// Stage ran without the results it depends on
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// Residuals exceed the configured tolerance
    #[error("[compare] tolerance exceeded: {}", .violations.join("; "))]
    ToleranceExceeded { violations: Vec<String> },
}

impl OrchestrationError {
    pub fn stage(&self) -> Stage {
        match self {
            OrchestrationError::Harness(err) => err.stage(),
            OrchestrationError::InvalidPipeline(_) => Stage::Setup,
            OrchestrationError::ToleranceExceeded { .. } => Stage::Compare,
        }
    }

    /// Distinct non-zero exit code per failing stage
    pub fn exit_code(&self) -> i32 {
        exit_code_for(self.stage())
    }
}

pub fn exit_code_for(stage: Stage) -> i32 {
    match stage {
        Stage::Setup => EXIT_SETUP,
        Stage::Build => EXIT_BUILD,
        Stage::Run => EXIT_RUN,
        Stage::Compare => EXIT_COMPARE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_core::Backend;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = OrchestrationError::InvalidPipeline("test".into());
        assert!(err.to_string().contains("Invalid pipeline"));
    }

    #[test]
    fn test_harness_error_conversion() {
        let err: OrchestrationError = HarnessError::BuildFailure {
            backend: Backend::Gpu,
            reason: "cmake exited with status 1".into(),
        }
        .into();
        assert!(err.to_string().contains("[build/GPU]"));
        assert_eq!(err.exit_code(), EXIT_BUILD);
    }

    #[test]
    fn test_exit_codes_are_distinct_per_stage() {
        let timeout: OrchestrationError = HarnessError::ExecutionTimeout {
            stage: Stage::Run,
            backend: Backend::Cpu,
            program: "milkyway_nbody".into(),
            elapsed: Duration::from_secs(60),
        }
        .into();
        let tolerance = OrchestrationError::ToleranceExceeded {
            violations: vec!["max absolute error 1e-3 exceeds 1e-6".into()],
        };
        assert_eq!(timeout.exit_code(), EXIT_RUN);
        assert_eq!(tolerance.exit_code(), EXIT_COMPARE);
        assert_eq!(
            OrchestrationError::from(HarnessError::Config("x".into())).exit_code(),
            EXIT_SETUP
        );
    }
}
