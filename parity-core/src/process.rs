//! Subprocess boundary
//!
//! The build system, the simulator and the plotting script are all external
//! programs that report success through their exit status only. Every
//! component goes through [`ProcessRunner`] so tests can swap in
//! [`mock::ScriptedRunner`] instead of spawning real processes.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

/// A program invocation: program, ordered arguments, working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// File name of the program, for logs and error messages
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Value following `flag` in the argument list (`-o out` -> `out`)
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|idx| self.args.get(idx + 1))
            .map(String::as_str)
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// How a subprocess ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exited on its own. `None` when terminated by a signal.
    Exited { code: Option<i32> },
    /// Killed after exceeding its timeout
    TimedOut { elapsed: Duration },
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ProcessOutcome::Exited { code: Some(0) })
    }

    /// Human readable exit description (`exit status 2`, `killed by signal`)
    pub fn describe(&self) -> String {
        match self {
            ProcessOutcome::Exited { code: Some(code) } => format!("exit status {code}"),
            ProcessOutcome::Exited { code: None } => "killed by signal".to_string(),
            ProcessOutcome::TimedOut { elapsed } => {
                format!("timed out after {:.1}s", elapsed.as_secs_f64())
            }
        }
    }
}

/// Failure to start or wait on a subprocess
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting on `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs external programs to completion
pub trait ProcessRunner {
    /// Runs `invocation` and blocks until it exits, or until `timeout`
    /// elapses, in which case the child is killed and reaped.
    fn run(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutcome, ProcessError>;
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for &R {
    fn run(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutcome, ProcessError> {
        (**self).run(invocation, timeout)
    }
}

/// Production runner backed by `std::process`
///
/// On timeout only the direct child is killed and reaped. Processes it
/// spawned itself (a `make` job server, a shell pipeline) are not signalled
/// and may outlive the run.
#[derive(Debug, Clone)]
pub struct SystemProcessRunner {
    quiet: bool,
    poll_interval: Duration,
}

impl SystemProcessRunner {
    pub fn new() -> Self {
        Self {
            quiet: false,
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Discard the children's stdout/stderr instead of inheriting them
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    fn wait_with_timeout(
        &self,
        child: &mut Child,
        program: &str,
        limit: Duration,
    ) -> Result<ProcessOutcome, ProcessError> {
        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(ProcessOutcome::Exited { code: status.code() }),
                Ok(None) => {}
                Err(source) => {
                    terminate_and_reap(child);
                    return Err(ProcessError::Wait {
                        program: program.to_string(),
                        source,
                    });
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= limit {
                warn!(program, elapsed_ms = elapsed.as_millis() as u64, "subprocess timed out, killing");
                terminate_and_reap(child);
                return Ok(ProcessOutcome::TimedOut { elapsed });
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

impl Default for SystemProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner for SystemProcessRunner {
    fn run(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutcome, ProcessError> {
        let program = invocation.program_name();
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args).stdin(Stdio::null());
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }
        if self.quiet {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        debug!(command = %invocation, "spawning subprocess");
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

        match timeout {
            Some(limit) => self.wait_with_timeout(&mut child, &program, limit),
            None => {
                let status = child
                    .wait()
                    .map_err(|source| ProcessError::Wait { program, source })?;
                Ok(ProcessOutcome::Exited { code: status.code() })
            }
        }
    }
}

/// Kills the direct child and waits for it; descendants are left alone.
fn terminate_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

pub mod mock {
    //! Scripted process runner for tests.
    //!
    //! Rules are matched against the program's file name; the first rule
    //! whose pattern is contained in the name decides the outcome. Unmatched
    //! invocations exit with status 0.

    use super::*;
    use std::cell::RefCell;
    use std::path::Path;

    type Action = Box<dyn Fn(&Invocation) -> ProcessOutcome>;

    struct Rule {
        pattern: String,
        action: Action,
    }

    /// Records every invocation and answers from scripted rules
    #[derive(Default)]
    pub struct ScriptedRunner {
        rules: Vec<Rule>,
        calls: RefCell<Vec<Invocation>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Adds a rule for programs whose name contains `pattern`
        pub fn on<F>(mut self, pattern: &str, action: F) -> Self
        where
            F: Fn(&Invocation) -> ProcessOutcome + 'static,
        {
            self.rules.push(Rule {
                pattern: pattern.to_string(),
                action: Box::new(action),
            });
            self
        }

        /// Every invocation seen so far, in order
        pub fn invocations(&self) -> Vec<Invocation> {
            self.calls.borrow().clone()
        }

        /// Number of invocations whose program name contains `pattern`
        pub fn count(&self, pattern: &str) -> usize {
            self.calls
                .borrow()
                .iter()
                .filter(|inv| inv.program_name().contains(pattern))
                .count()
        }
    }

    impl ProcessRunner for ScriptedRunner {
        fn run(
            &self,
            invocation: &Invocation,
            _timeout: Option<Duration>,
        ) -> Result<ProcessOutcome, ProcessError> {
            self.calls.borrow_mut().push(invocation.clone());
            let name = invocation.program_name();
            let outcome = self
                .rules
                .iter()
                .find(|rule| name.contains(&rule.pattern))
                .map(|rule| (rule.action)(invocation))
                .unwrap_or(ProcessOutcome::Exited { code: Some(0) });
            Ok(outcome)
        }
    }

    /// Exit with the given status
    pub fn exit(code: i32) -> ProcessOutcome {
        ProcessOutcome::Exited { code: Some(code) }
    }

    /// Creates an empty file at `path` (a freshly built binary)
    pub fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(path, b"");
    }

    /// Writes `contents` to the path given after `-o`, then exits 0
    pub fn write_output(invocation: &Invocation, contents: &str) -> ProcessOutcome {
        if let Some(out) = invocation.value_of("-o") {
            let out = match &invocation.working_dir {
                Some(dir) => dir.join(out),
                None => PathBuf::from(out),
            };
            let _ = std::fs::write(out, contents);
        }
        exit(0)
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{self, ScriptedRunner};
    use super::*;

    #[test]
    fn test_invocation_display_quotes_spaces() {
        let inv = Invocation::new("cmake").arg("-DCMAKE_C_FLAGS=-O2 -g").arg("..");
        assert_eq!(inv.to_string(), "cmake '-DCMAKE_C_FLAGS=-O2 -g' ..");
        assert_eq!(inv.program_name(), "cmake");
    }

    #[test]
    fn test_invocation_value_of() {
        let inv = Invocation::new("./bin/milkyway_nbody").args(["-f", "wu.lua", "-o", "GPU.out"]);
        assert_eq!(inv.value_of("-o"), Some("GPU.out"));
        assert_eq!(inv.value_of("-e"), None);
        assert_eq!(inv.program_name(), "milkyway_nbody");
    }

    #[test]
    fn test_outcome_success() {
        assert!(mock::exit(0).success());
        assert!(!mock::exit(2).success());
        assert!(!ProcessOutcome::Exited { code: None }.success());
        assert!(
            !ProcessOutcome::TimedOut {
                elapsed: Duration::from_secs(1)
            }
            .success()
        );
    }

    #[test]
    fn test_scripted_runner_records_calls() {
        let runner = ScriptedRunner::new().on("make", |_| mock::exit(2));
        let outcome = runner.run(&Invocation::new("make"), None).unwrap();
        assert_eq!(outcome, mock::exit(2));
        let outcome = runner.run(&Invocation::new("cmake"), None).unwrap();
        // "cmake" contains "make": first matching rule wins
        assert_eq!(outcome, mock::exit(2));
        assert_eq!(runner.count("make"), 2);
        assert_eq!(runner.invocations().len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_reports_exit_code() {
        let runner = SystemProcessRunner::new().quiet(true);
        let inv = Invocation::new("sh").args(["-c", "exit 3"]);
        let outcome = runner.run(&inv, None).unwrap();
        assert_eq!(outcome, ProcessOutcome::Exited { code: Some(3) });
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_kills_on_timeout() {
        let runner = SystemProcessRunner::new().quiet(true);
        let inv = Invocation::new("sh").args(["-c", "sleep 5"]);
        let started = Instant::now();
        let outcome = runner.run(&inv, Some(Duration::from_millis(50))).unwrap();
        assert!(matches!(outcome, ProcessOutcome::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_system_runner_returns_once_direct_child_is_killed() {
        let runner = SystemProcessRunner::new().quiet(true);
        let inv = Invocation::new("sh").args(["-c", "sleep 5; true"]);
        let started = Instant::now();
        let outcome = runner.run(&inv, Some(Duration::from_millis(50))).unwrap();
        assert!(matches!(outcome, ProcessOutcome::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_system_runner_spawn_failure() {
        let runner = SystemProcessRunner::new();
        let inv = Invocation::new("/nonexistent/definitely-not-a-binary");
        let err = runner.run(&inv, None).unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
