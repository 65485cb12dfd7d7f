//! Harness error taxonomy
//!
//! Every fatal failure names the stage it happened in and, when the stage is
//! backend specific, the backend.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::backend::Backend;

pub type HarnessResult<T> = Result<T, HarnessError>;

/// Stage of a parity run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Configuration, argument parsing, filesystem setup
    Setup,
    /// Configure + compile
    Build,
    /// Simulator execution
    Run,
    /// Residual reconciliation
    Compare,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Setup => "setup",
            Stage::Build => "build",
            Stage::Run => "run",
            Stage::Compare => "compare",
        };
        f.write_str(name)
    }
}

/// Harness errors
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Configure or compile step failed
    #[error("[build/{backend}] build failed: {reason}")]
    BuildFailure { backend: Backend, reason: String },

    /// Simulator exited non-zero or could not be spawned
    #[error("[run/{backend}] simulator failed: {reason}")]
    ExecutionFailure { backend: Backend, reason: String },

    /// Subprocess exceeded its timeout and was killed
    #[error("[{stage}/{backend}] `{program}` timed out after {:.1}s", .elapsed.as_secs_f64())]
    ExecutionTimeout {
        stage: Stage,
        backend: Backend,
        program: String,
        elapsed: Duration,
    },

    /// Declared output file absent or empty after a successful exit
    #[error("[run/{backend}] output {} is missing or incomplete: {reason}", .path.display())]
    MissingOutputFailure {
        backend: Backend,
        path: PathBuf,
        reason: String,
    },

    /// Artifacts hold a different number of records
    #[error("[compare] record count mismatch: {left_label} has {left} record(s), {right_label} has {right}")]
    RecordCountMismatch {
        left_label: String,
        right_label: String,
        left: usize,
        right: usize,
    },

    /// Aligned records hold a different number of fields
    #[error("[compare] field count mismatch at sample {index}: {left} field(s) vs {right}")]
    FieldCountMismatch {
        index: usize,
        left: usize,
        right: usize,
    },

    /// Record field is not a number
    #[error("[compare] malformed record in {}:{line}: `{token}` is not a number", .path.display())]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        token: String,
    },

    /// The two backend runs were not given the same parameters
    #[error("[compare] parameter mismatch between backend runs: {0}")]
    ParameterMismatch(String),

    /// Filesystem error outside a subprocess
    #[error("[{stage}] I/O error on {}: {source}", .path.display())]
    Io {
        stage: Stage,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration
    #[error("[setup] invalid configuration: {0}")]
    Config(String),
}

impl HarnessError {
    /// Stage the error occurred in
    pub fn stage(&self) -> Stage {
        match self {
            HarnessError::BuildFailure { .. } => Stage::Build,
            HarnessError::ExecutionFailure { .. } | HarnessError::MissingOutputFailure { .. } => {
                Stage::Run
            }
            HarnessError::ExecutionTimeout { stage, .. } | HarnessError::Io { stage, .. } => *stage,
            HarnessError::RecordCountMismatch { .. }
            | HarnessError::FieldCountMismatch { .. }
            | HarnessError::MalformedRecord { .. }
            | HarnessError::ParameterMismatch(_) => Stage::Compare,
            HarnessError::Config(_) => Stage::Setup,
        }
    }

    /// Backend involved, when the stage is backend specific
    pub fn backend(&self) -> Option<Backend> {
        match self {
            HarnessError::BuildFailure { backend, .. }
            | HarnessError::ExecutionFailure { backend, .. }
            | HarnessError::ExecutionTimeout { backend, .. }
            | HarnessError::MissingOutputFailure { backend, .. } => Some(*backend),
            _ => None,
        }
    }

    pub(crate) fn io(stage: Stage, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Io {
            stage,
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names_stage_and_backend() {
        let err = HarnessError::BuildFailure {
            backend: Backend::Gpu,
            reason: "make exited with status 2".into(),
        };
        assert_eq!(err.stage(), Stage::Build);
        assert_eq!(err.backend(), Some(Backend::Gpu));
        assert!(err.to_string().contains("[build/GPU]"));
    }

    #[test]
    fn test_timeout_keeps_its_stage() {
        let err = HarnessError::ExecutionTimeout {
            stage: Stage::Run,
            backend: Backend::Cpu,
            program: "milkyway_nbody".into(),
            elapsed: Duration::from_millis(1500),
        };
        assert_eq!(err.stage(), Stage::Run);
        assert!(err.to_string().contains("timed out after 1.5s"));
        assert!(err.to_string().contains("[run/CPU]"));
    }

    #[test]
    fn test_compare_errors_have_no_backend() {
        let err = HarnessError::RecordCountMismatch {
            left_label: "GPU".into(),
            right_label: "CPU".into(),
            left: 0,
            right: 5,
        };
        assert_eq!(err.stage(), Stage::Compare);
        assert_eq!(err.backend(), None);
    }
}
