//! Process execution for direct commands, staged scripts and the editor.
//!
//! Every child inherits the terminal's stdin, stdout and stderr so
//! interactive programs behave normally.

use anyhow::{Context, Result, anyhow, bail};
use std::path::Path;
use std::process::{Command, ExitStatus};
use tracing::{error, info};

/// Shell used for direct `$` commands and staged scripts.
pub const SHELL: &str = "bash";

// =============================================================================
// Traits for Dependency Injection
// =============================================================================

/// Trait for running system processes.
///
/// This abstraction enables testing without spawning real processes.
pub trait ProcessRunner: Send + Sync {
    /// Runs a program to completion with inherited stdio.
    fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> Result<ExitStatus>;

    /// Checks if a program exists in PATH.
    fn program_exists(&self, program: &str) -> bool;
}

/// Default process runner using std::process::Command.
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> Result<ExitStatus> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd.status()
            .with_context(|| format!("failed to start {program}"))
    }

    fn program_exists(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

// =============================================================================
// Executor Implementation
// =============================================================================

/// Spawns the processes the session asks for.
///
/// # Example
///
/// ```no_run
/// use aiterm::executor::Executor;
/// use std::path::Path;
///
/// let executor = Executor::new();
/// executor.run_command("ls -la", Path::new("/tmp"))?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Executor<R: ProcessRunner = SystemProcessRunner> {
    runner: R,
}

impl Executor {
    pub fn new() -> Self {
        Self::with_runner(SystemProcessRunner)
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ProcessRunner> Executor<R> {
    /// Creates an executor with a custom runner (for testing).
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Runs `command` with `bash -c` from `cwd`.
    ///
    /// # Errors
    ///
    /// Returns an error if the shell cannot be started or the command exits
    /// with a non-zero status.
    pub fn run_command(&self, command: &str, cwd: &Path) -> Result<()> {
        info!("Executing command in {}: {}", cwd.display(), command);
        let status = self.runner.run(SHELL, &["-c", command], Some(cwd))?;
        Self::check_status(command, status)
    }

    /// Runs a staged script file with `bash <file>` from `cwd`.
    pub fn run_script(&self, script: &Path, cwd: &Path) -> Result<()> {
        let script_path = script.to_string_lossy().into_owned();
        info!("Executing script {} in {}", script_path, cwd.display());
        let status = self.runner.run(SHELL, &[script_path.as_str()], Some(cwd))?;
        Self::check_status(&script_path, status)
    }

    /// Opens `file` with `editor`, which may carry arguments (`code -w`).
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The editor value is empty
    /// - The editor program is not installed
    /// - The editor exits with a non-zero status
    pub fn open_editor(&self, editor: &str, file: &Path) -> Result<()> {
        let mut parts = editor.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("No editor configured"))?;

        if !self.runner.program_exists(program) {
            bail!("Editor '{}' is not installed or not in PATH", program);
        }

        let file_path = file.to_string_lossy().into_owned();
        let mut args: Vec<&str> = parts.collect();
        args.push(file_path.as_str());

        info!("Opening {} with {}", file_path, editor);
        let status = self.runner.run(program, &args, None)?;
        Self::check_status(program, status)
    }

    fn check_status(what: &str, status: ExitStatus) -> Result<()> {
        if status.success() {
            return Ok(());
        }
        error!("{} failed with status: {}", what, status);
        match status.code() {
            Some(code) => Err(anyhow!("exit status {}", code)),
            None => Err(anyhow!("terminated by signal ({})", status)),
        }
    }
}
