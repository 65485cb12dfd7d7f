//! nbody-parity - GPU/CPU differential verification for the N-body simulator
//! Command-line interface for building, running and comparing both backends

use clap::{Args, Parser, Subcommand};
use colored::*;
use parity_core::{
    Backend, HarnessConfig, HarnessError, HarnessResult, JsonReportSink, ReportSink, ResidualComparator,
    ResidualReport, RunArtifact, SystemProcessRunner,
};
use parity_orchestration::{
    exit_code_for, OrchestrationError, Orchestrator, StageRecord, StageStatus, EXIT_SETUP,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Flagged samples listed before the output is truncated
const MAX_FLAGGED_SHOWN: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "nbody-parity")]
#[command(author = "MilkyWay@home N-body Contributors")]
#[command(version = "2026.1.16")]
#[command(about = "Build, run and compare the GPU and CPU N-body backends", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compare two existing output files without building or running
    Compare {
        /// Reference output (reported as GPU)
        #[arg(value_name = "LEFT")]
        left: PathBuf,

        /// Output compared against LEFT (reported as CPU)
        #[arg(value_name = "RIGHT")]
        right: PathBuf,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Print the effective configuration as TOML
    Config {
        #[command(flatten)]
        run: RunArgs,
    },
}

/// Options shared by every command
#[derive(Args, Debug, Default, Clone)]
struct CommonArgs {
    /// Configuration file (default: nearest nbody-parity.toml)
    #[arg(short, long, value_name = "FILE", env = "NBODY_PARITY_CONFIG")]
    config: Option<PathBuf>,

    /// Kill any subprocess running longer than this
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Fail when the maximum absolute residual exceeds this
    #[arg(long, value_name = "ERR")]
    max_abs_error: Option<f64>,

    /// Fail when the maximum relative residual exceeds this
    #[arg(long, value_name = "ERR")]
    max_rel_error: Option<f64>,

    /// Write the residual report as JSON
    #[arg(long, value_name = "FILE")]
    report_json: Option<PathBuf>,

    /// Discard subprocess output and log warnings only
    #[arg(short, long)]
    quiet: bool,
}

/// Options of a full parity run
#[derive(Args, Debug, Default, Clone)]
struct RunArgs {
    /// Number of timesteps for both runs
    #[arg(long, value_name = "N")]
    timesteps: Option<u64>,

    /// Lua workunit describing the initial conditions
    #[arg(long, value_name = "FILE")]
    workunit: Option<PathBuf>,

    /// Random seed for both runs
    #[arg(long)]
    seed: Option<u64>,

    /// Reuse the existing simulator binary
    #[arg(long)]
    skip_build: bool,

    /// GPU output file
    #[arg(long, value_name = "FILE")]
    gpu_output: Option<PathBuf>,

    /// CPU output file
    #[arg(long, value_name = "FILE")]
    cpu_output: Option<PathBuf>,

    /// Do not run the plotting program
    #[arg(long)]
    no_plot: bool,

    #[command(flatten)]
    common: CommonArgs,
}

impl CommonArgs {
    fn apply(&self, config: &mut HarnessConfig) {
        if let Some(secs) = self.timeout_secs {
            config.build.timeout_secs = Some(secs);
            config.simulator.timeout_secs = Some(secs);
            config.plot.timeout_secs = Some(secs);
        }
        if let Some(max_abs) = self.max_abs_error {
            config.compare.max_abs = Some(max_abs);
        }
        if let Some(max_rel) = self.max_rel_error {
            config.compare.max_rel = Some(max_rel);
        }
        if let Some(path) = &self.report_json {
            config.plot.report_json = Some(path.clone());
        }
    }

    /// Applies the flags, then rejects unusable tolerances
    fn apply_checked(&self, config: &mut HarnessConfig) -> HarnessResult<()> {
        self.apply(config);
        config.compare.validate()
    }
}

impl RunArgs {
    fn apply(&self, config: &mut HarnessConfig) {
        self.common.apply(config);
        let params = &mut config.parameters;
        if let Some(timesteps) = self.timesteps {
            params.timesteps = timesteps;
        }
        if let Some(workunit) = &self.workunit {
            params.workunit = workunit.clone();
        }
        if let Some(seed) = self.seed {
            params.seed = seed;
        }
        if let Some(out) = &self.gpu_output {
            params.gpu_output = out.clone();
        }
        if let Some(out) = &self.cpu_output {
            params.cpu_output = out.clone();
        }
        if self.skip_build {
            config.build.skip = true;
        }
        if self.no_plot {
            config.plot.enabled = false;
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let quiet = match &cli.command {
        Some(Commands::Compare { common, .. }) => common.quiet,
        Some(Commands::Config { run }) => run.common.quiet,
        None => cli.run.common.quiet,
    };
    init_tracing(quiet);

    let result = match &cli.command {
        None => run_command(&cli.run),
        Some(Commands::Compare {
            left,
            right,
            common,
        }) => compare_command(left, right, common),
        Some(Commands::Config { run }) => config_command(run),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(exit_code(&e));
    }
}

fn init_tracing(quiet: bool) {
    let default_filter = if quiet {
        "warn"
    } else {
        "parity_cli=info,parity_core=info,parity_orchestration=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Exit code of the stage an error came from; anything else is a setup error
fn exit_code(error: &anyhow::Error) -> i32 {
    if let Some(e) = error.downcast_ref::<OrchestrationError>() {
        e.exit_code()
    } else if let Some(e) = error.downcast_ref::<HarnessError>() {
        exit_code_for(e.stage())
    } else {
        EXIT_SETUP
    }
}

fn load_config(common: &CommonArgs) -> anyhow::Result<HarnessConfig> {
    let cwd = std::env::current_dir()?;
    let (config, source) = HarnessConfig::load(common.config.as_deref(), &cwd)?;
    match source {
        Some(path) => tracing::info!(path = %path.display(), "loaded configuration"),
        None => tracing::debug!("no configuration file found, using defaults"),
    }
    Ok(config)
}

// ============================================================================
// Commands
// ============================================================================

fn run_command(args: &RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(&args.common)?;
    args.apply(&mut config);

    println!(
        "{} GPU/CPU parity run ({} timesteps, seed {})",
        "Starting".green().bold(),
        config.parameters.timesteps,
        config.parameters.seed
    );

    let runner = SystemProcessRunner::new().quiet(args.common.quiet);
    let mut orchestrator = Orchestrator::new(config, &runner)?.with_configured_sinks();
    let outcome = orchestrator.run()?;

    print_stages(&outcome.stages);
    print_report(&outcome.report);
    for failure in &outcome.sink_failures {
        println!(
            "{} {} sink failed: {}",
            "warning:".yellow().bold(),
            failure.sink,
            failure.message
        );
    }

    outcome.ensure_within_tolerance()?;
    println!("{}", "    Finished".green().bold());
    Ok(())
}

fn compare_command(left: &Path, right: &Path, common: &CommonArgs) -> anyhow::Result<()> {
    let mut config = load_config(common)?;
    common.apply_checked(&mut config)?;

    let gpu = RunArtifact::new(left, Backend::Gpu);
    let cpu = RunArtifact::new(right, Backend::Cpu);
    println!(
        "{} {} against {}",
        "Comparing".green().bold(),
        left.display().to_string().cyan(),
        right.display().to_string().cyan()
    );

    let comparator = if config.compare.summary_only {
        ResidualComparator::new().summary_only()
    } else {
        ResidualComparator::new()
    };
    let report = comparator.compare(&gpu, &cpu)?;
    print_report(&report);

    if let Some(path) = &config.plot.report_json {
        let sink = JsonReportSink::new(path);
        if let Err(e) = sink.publish(&report, &gpu, &cpu) {
            println!("{} {} sink failed: {}", "warning:".yellow().bold(), sink.name(), e);
        }
    }

    let verdict = report.verdict(&config.compare.tolerance());
    if !verdict.passed() {
        return Err(OrchestrationError::ToleranceExceeded {
            violations: verdict.violations,
        }
        .into());
    }
    println!("{}", "    Finished".green().bold());
    Ok(())
}

fn config_command(args: &RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(&args.common)?;
    args.apply(&mut config);
    config.validate()?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn print_stages(stages: &[StageRecord]) {
    for record in stages {
        let status = match &record.status {
            StageStatus::Completed => "ok".green(),
            StageStatus::Failed(_) => "failed".red(),
        };
        println!(
            "{:>12} {:<12} {:.2}s",
            status,
            record.stage.to_string(),
            record.elapsed.as_secs_f64()
        );
    }
}

fn print_report(report: &ResidualReport) {
    let summary = &report.summary;
    println!();
    println!(
        "{} {} vs {}: {} records, {} fields",
        "Residuals".bold(),
        report.left_label.cyan(),
        report.right_label.cyan(),
        report.record_count,
        report.field_count
    );

    let location = summary
        .max_abs_at
        .map(|(record, field)| format!(" (record {record}, field {field})"))
        .unwrap_or_default();
    println!("  {:<10} {:e}{}", "max |Δ|", summary.max_abs, location);
    println!("  {:<10} {:e}", "mean |Δ|", summary.mean_abs);
    println!("  {:<10} {:e}", "rms |Δ|", summary.rms_abs);
    println!("  {:<10} {:e}", "max rel", summary.max_rel);
    println!("  {:<10} {:e}", "mean rel", summary.mean_rel);

    if !report.fields.is_empty() {
        println!();
        println!("  {:>5} {:>12} {:>12} {:>12}", "field", "max |Δ|", "mean |Δ|", "max rel");
        for field in &report.fields {
            println!(
                "  {:>5} {:>12.3e} {:>12.3e} {:>12.3e}",
                field.field, field.max_abs, field.mean_abs, field.max_rel
            );
        }
    }

    if report.flagged.is_empty() {
        if report.is_identical() {
            println!("{}", "  outputs are identical".green());
        }
        return;
    }

    println!(
        "{} {} sample(s) with non-finite values or differences excluded",
        "warning:".yellow().bold(),
        report.flagged_count()
    );
    for sample in report.flagged.iter().take(MAX_FLAGGED_SHOWN) {
        println!(
            "  sample {} (lines {}/{}), {:?} in fields {:?}",
            sample.index, sample.left_line, sample.right_line, sample.kind, sample.fields
        );
    }
    if report.flagged_count() > MAX_FLAGGED_SHOWN {
        println!("  ... {} more", report.flagged_count() - MAX_FLAGGED_SHOWN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::path::Path;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_arguments_runs_with_defaults() {
        let cli = Cli::try_parse_from(["nbody-parity"]).unwrap();
        assert!(cli.command.is_none());

        let mut config = HarnessConfig::default();
        cli.run.apply(&mut config);
        assert_eq!(config, HarnessConfig::default());
    }

    #[test]
    fn test_run_flags_override_config() {
        let cli = Cli::try_parse_from([
            "nbody-parity",
            "--timesteps",
            "10",
            "--seed",
            "1",
            "--skip-build",
            "--no-plot",
            "--cpu-output",
            "cpu.out",
            "--max-abs-error",
            "1e-6",
            "--timeout-secs",
            "30",
        ])
        .unwrap();

        let mut config = HarnessConfig::default();
        cli.run.apply(&mut config);

        assert_eq!(config.parameters.timesteps, 10);
        assert_eq!(config.parameters.seed, 1);
        assert!(config.build.skip);
        assert!(!config.plot.enabled);
        assert_eq!(config.parameters.cpu_output, Path::new("cpu.out"));
        assert_eq!(config.parameters.gpu_output, Path::new("GPUBRUTE.out"));
        assert_eq!(config.compare.max_abs, Some(1e-6));
        assert_eq!(config.simulator.timeout_secs, Some(30));
        assert_eq!(config.build.timeout_secs, Some(30));
    }

    #[test]
    fn test_compare_subcommand() {
        let cli = Cli::try_parse_from([
            "nbody-parity",
            "compare",
            "GPUBRUTE.out",
            "CPUBRUTE.out",
            "--report-json",
            "report.json",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Compare {
                left,
                right,
                common,
            }) => {
                assert_eq!(left, Path::new("GPUBRUTE.out"));
                assert_eq!(right, Path::new("CPUBRUTE.out"));
                assert_eq!(common.report_json.as_deref(), Some(Path::new("report.json")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_compare_rejects_negative_tolerance() {
        let cli = Cli::try_parse_from([
            "nbody-parity",
            "compare",
            "a.out",
            "b.out",
            "--max-abs-error=-1",
        ])
        .unwrap();
        let Some(Commands::Compare { common, .. }) = cli.command else {
            panic!("expected compare subcommand");
        };

        let mut config = HarnessConfig::default();
        let err = anyhow::Error::from(common.apply_checked(&mut config).unwrap_err());
        assert_eq!(exit_code(&err), EXIT_SETUP);

        let mut config = HarnessConfig::default();
        let ok = CommonArgs {
            max_rel_error: Some(1e-6),
            ..CommonArgs::default()
        };
        assert!(ok.apply_checked(&mut config).is_ok());
        assert_eq!(config.compare.max_rel, Some(1e-6));
    }

    #[test]
    fn test_run_flags_conflict_with_subcommand() {
        assert!(Cli::try_parse_from(["nbody-parity", "--seed", "1", "compare", "a", "b"]).is_err());
    }

    #[test]
    fn test_exit_code_from_stage() {
        let err = anyhow::Error::from(HarnessError::ExecutionFailure {
            backend: Backend::Cpu,
            reason: "exit status 1".into(),
        });
        assert_eq!(exit_code(&err), parity_orchestration::EXIT_RUN);

        let err = anyhow::Error::from(OrchestrationError::ToleranceExceeded {
            violations: vec!["max absolute error".into()],
        });
        assert_eq!(exit_code(&err), parity_orchestration::EXIT_COMPARE);

        assert_eq!(exit_code(&anyhow::anyhow!("bad usage")), EXIT_SETUP);
    }
}
