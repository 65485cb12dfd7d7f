//! Fixed build/run/compare pipeline

use std::time::Duration;

use parity_core::{Backend, Stage};

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum PipelineStage {
    /// Configure + compile with the GPU flag set
    BuildGpu = 0,
    /// Run the GPU binary
    RunGpu = 1,
    /// Reconfigure + compile with the CPU flag set
    BuildCpu = 2,
    /// Run the CPU binary
    RunCpu = 3,
    /// Residual comparison
    Compare = 4,
    /// Hand the report to the sinks
    Publish = 5,
}

impl PipelineStage {
    /// Backend the stage works on
    pub fn backend(&self) -> Option<Backend> {
        match self {
            PipelineStage::BuildGpu | PipelineStage::RunGpu => Some(Backend::Gpu),
            PipelineStage::BuildCpu | PipelineStage::RunCpu => Some(Backend::Cpu),
            PipelineStage::Compare | PipelineStage::Publish => None,
        }
    }

    /// Error stage the pipeline stage reports under
    pub fn kind(&self) -> Stage {
        match self {
            PipelineStage::BuildGpu | PipelineStage::BuildCpu => Stage::Build,
            PipelineStage::RunGpu | PipelineStage::RunCpu => Stage::Run,
            PipelineStage::Compare | PipelineStage::Publish => Stage::Compare,
        }
    }

    /// Next stage, `None` after publish
    pub fn next(&self) -> Option<PipelineStage> {
        match self {
            PipelineStage::BuildGpu => Some(PipelineStage::RunGpu),
            PipelineStage::RunGpu => Some(PipelineStage::BuildCpu),
            PipelineStage::BuildCpu => Some(PipelineStage::RunCpu),
            PipelineStage::RunCpu => Some(PipelineStage::Compare),
            PipelineStage::Compare => Some(PipelineStage::Publish),
            PipelineStage::Publish => None,
        }
    }

    /// All stages in execution order
    pub fn all() -> Vec<PipelineStage> {
        vec![
            PipelineStage::BuildGpu,
            PipelineStage::RunGpu,
            PipelineStage::BuildCpu,
            PipelineStage::RunCpu,
            PipelineStage::Compare,
            PipelineStage::Publish,
        ]
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.backend() {
            Some(backend) => write!(f, "{}/{}", self.kind(), backend),
            None if *self == PipelineStage::Publish => f.write_str("publish"),
            None => write!(f, "{}", self.kind()),
        }
    }
}

/// How a stage ended
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StageStatus {
    Completed,
    Failed(String),
}

/// Timing and status of one executed stage
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StageRecord {
    pub stage: PipelineStage,
    pub elapsed: Duration,
    pub status: StageStatus,
}

/// Execution pipeline
///
/// Strictly sequential: stages run one after another in [`PipelineStage::all`]
/// order and a failed stage ends the run.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Stage about to run
    current_stage: Option<PipelineStage>,
    /// Executed stages
    records: Vec<StageRecord>,
    /// Stopped by a failed stage
    failed: bool,
}

impl Pipeline {
    /// Creates an idle pipeline
    pub fn new() -> Self {
        Self {
            current_stage: None,
            records: Vec::new(),
            failed: false,
        }
    }

    /// Stages in execution order
    pub fn stages(&self) -> Vec<PipelineStage> {
        PipelineStage::all()
    }

    /// Current stage
    pub fn current_stage(&self) -> Option<PipelineStage> {
        self.current_stage
    }

    /// Starts at the first stage
    pub fn start(&mut self) {
        self.current_stage = PipelineStage::all().first().copied();
        self.records.clear();
        self.failed = false;
    }

    /// Records `stage` as completed and advances to the next stage
    pub fn complete(&mut self, stage: PipelineStage, elapsed: Duration) -> Option<PipelineStage> {
        self.records.push(StageRecord {
            stage,
            elapsed,
            status: StageStatus::Completed,
        });
        self.current_stage = stage.next();
        self.current_stage
    }

    /// Records `stage` as failed and stops the pipeline
    pub fn fail(&mut self, stage: PipelineStage, elapsed: Duration, reason: impl Into<String>) {
        self.records.push(StageRecord {
            stage,
            elapsed,
            status: StageStatus::Failed(reason.into()),
        });
        self.current_stage = None;
        self.failed = true;
    }

    /// Stages executed so far
    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    /// Summed time of executed stages
    pub fn total_elapsed(&self) -> Duration {
        self.records.iter().map(|r| r.elapsed).sum()
    }

    /// Whether a stage is pending
    pub fn is_running(&self) -> bool {
        self.current_stage.is_some()
    }

    /// Every stage completed
    pub fn is_finished(&self) -> bool {
        !self.failed
            && self.current_stage.is_none()
            && self.records.len() == PipelineStage::all().len()
    }

    /// Clears all state
    pub fn reset(&mut self) {
        self.current_stage = None;
        self.records.clear();
        self.failed = false;
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_new() {
        let pipeline = Pipeline::new();
        assert_eq!(pipeline.stages().len(), 6);
        assert!(pipeline.records().is_empty());
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_pipeline_start() {
        let mut pipeline = Pipeline::new();
        pipeline.start();
        assert!(pipeline.is_running());
        assert_eq!(pipeline.current_stage(), Some(PipelineStage::BuildGpu));
    }

    #[test]
    fn test_pipeline_runs_to_completion() {
        let mut pipeline = Pipeline::new();
        pipeline.start();
        while let Some(stage) = pipeline.current_stage() {
            pipeline.complete(stage, Duration::from_millis(10));
        }
        assert!(pipeline.is_finished());
        assert_eq!(pipeline.records().len(), 6);
        assert_eq!(pipeline.total_elapsed(), Duration::from_millis(60));
    }

    #[test]
    fn test_pipeline_failure_stops() {
        let mut pipeline = Pipeline::new();
        pipeline.start();
        pipeline.fail(PipelineStage::BuildGpu, Duration::ZERO, "cmake failed");

        assert!(!pipeline.is_running());
        assert!(!pipeline.is_finished());
        assert_eq!(
            pipeline.records()[0].status,
            StageStatus::Failed("cmake failed".into())
        );
    }

    #[test]
    fn test_pipeline_reset() {
        let mut pipeline = Pipeline::new();
        pipeline.start();
        pipeline.complete(PipelineStage::BuildGpu, Duration::ZERO);

        assert!(pipeline.is_running());

        pipeline.reset();
        assert!(!pipeline.is_running());
        assert!(pipeline.records().is_empty());
    }

    #[test]
    fn test_pipeline_stage_next() {
        assert_eq!(PipelineStage::BuildGpu.next(), Some(PipelineStage::RunGpu));
        assert_eq!(PipelineStage::RunGpu.next(), Some(PipelineStage::BuildCpu));
        assert_eq!(PipelineStage::Publish.next(), None);
    }

    #[test]
    fn test_pipeline_stage_all() {
        let all_stages = PipelineStage::all();
        assert_eq!(all_stages.len(), 6);
        assert_eq!(all_stages[0], PipelineStage::BuildGpu);
        assert_eq!(all_stages[5], PipelineStage::Publish);
    }

    #[test]
    fn test_stage_backend_and_kind() {
        assert_eq!(PipelineStage::RunCpu.backend(), Some(Backend::Cpu));
        assert_eq!(PipelineStage::RunCpu.kind(), Stage::Run);
        assert_eq!(PipelineStage::Compare.backend(), None);
        assert_eq!(PipelineStage::BuildGpu.to_string(), "build/GPU");
        assert_eq!(PipelineStage::Publish.to_string(), "publish");
    }
}
