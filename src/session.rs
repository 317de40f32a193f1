//! The interactive read-eval loop.
//!
//! Each line is classified as a built-in (`exit`, `clear`, `config`), a
//! direct shell command (`$...`) or a prompt for the model. Replies that
//! contain a shell block go through directory tracking, staging, review and
//! execution.

use crate::config::{Config, resolve_editor};
use crate::conversation::Conversation;
use crate::directory::{VirtualDir, detect_cd};
use crate::executor::{Executor, ProcessRunner, SystemProcessRunner};
use crate::extract::extract_shell_block;
use crate::provider::{self, Provider, SYSTEM_PROMPT};
use crate::review::{Confirmation, ScriptReview};
use crate::staging::stage_script_in;
use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// One line of user input, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Exit,
    Clear,
    Config,
    /// A `$`-prefixed command, without the `$`.
    Shell(String),
    Prompt(String),
}

impl Input {
    pub fn classify(line: &str) -> Self {
        let line = line.trim();
        match line {
            "" => Self::Empty,
            "exit" => Self::Exit,
            "clear" => Self::Clear,
            "config" => Self::Config,
            _ => match line.strip_prefix('$') {
                Some(rest) if rest.trim().is_empty() => Self::Empty,
                Some(rest) => Self::Shell(rest.trim().to_string()),
                None => Self::Prompt(line.to_string()),
            },
        }
    }
}

/// What happened to the shell block of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOutcome {
    NoScript,
    /// The script was only a `cd`, applied to the virtual directory.
    DirectoryOnly,
    Declined,
    Executed,
}

/// Target of a direct `cd` command: `Some("")` for a bare `cd`.
fn direct_cd_target(command: &str) -> Option<&str> {
    command
        .strip_prefix("cd")
        .filter(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
        .map(str::trim)
}

pub struct Session<R: ProcessRunner = SystemProcessRunner> {
    provider: Box<dyn Provider>,
    conversation: Conversation,
    cwd: VirtualDir,
    executor: Executor<R>,
    review: ScriptReview,
    config_path: PathBuf,
    editor: String,
    home: Option<PathBuf>,
    stage_dir: PathBuf,
}

impl Session {
    /// A session in the process working directory using real processes.
    pub fn new(provider: Box<dyn Provider>) -> Result<Self> {
        let cwd = VirtualDir::from_current_dir().context("failed to get current directory")?;
        let config_path = Config::config_path()?;
        Ok(Self::with_parts(provider, Executor::new(), cwd, config_path)
            .with_editor(resolve_editor(|key| std::env::var(key).ok()))
            .with_home(dirs::home_dir()))
    }

    /// Runs the loop on the process's stdin, stdout and stderr.
    pub async fn run(&mut self) -> Result<()> {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        self.run_with_io(&mut input, &mut io::stdout(), &mut io::stderr())
            .await
    }
}

impl<R: ProcessRunner> Session<R> {
    pub fn with_parts(
        provider: Box<dyn Provider>,
        executor: Executor<R>,
        cwd: VirtualDir,
        config_path: PathBuf,
    ) -> Self {
        Self {
            provider,
            conversation: Conversation::primed(SYSTEM_PROMPT),
            cwd,
            executor,
            review: ScriptReview::new(),
            config_path,
            editor: crate::config::DEFAULT_EDITOR.to_string(),
            home: None,
            stage_dir: std::env::temp_dir(),
        }
    }

    pub fn with_editor(mut self, editor: impl Into<String>) -> Self {
        self.editor = editor.into();
        self
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    /// Directory where scripts are staged before execution.
    pub fn with_stage_dir(mut self, dir: PathBuf) -> Self {
        self.stage_dir = dir;
        self
    }

    pub fn cwd(&self) -> &Path {
        self.cwd.path()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn executor(&self) -> &Executor<R> {
        &self.executor
    }

    /// Runs the loop until `exit`, end of input, or an input error.
    pub async fn run_with_io<I, O, E>(&mut self, input: &mut I, out: &mut O, err: &mut E) -> Result<()>
    where
        I: BufRead,
        O: Write,
        E: Write,
    {
        info!(cwd = %self.cwd.path().display(), provider = %self.provider.kind(), "session started");

        loop {
            write!(out, "aiterm:{}> ", self.cwd.short_name())?;
            out.flush()?;

            let mut line = String::new();
            match input.read_line(&mut line) {
                Ok(0) => {
                    writeln!(out, "\nExiting.")?;
                    break;
                }
                Ok(_) => {}
                // The undecodable line has been consumed; read the next one.
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!("discarding input line that is not valid UTF-8");
                    writeln!(err, "Error reading input: {e}")?;
                    continue;
                }
                Err(e) => return Err(e).context("failed to read input"),
            }

            match Input::classify(&line) {
                Input::Empty => {}
                Input::Exit => break,
                Input::Clear => self.clear(out, err)?,
                Input::Config => self.open_config(out, err)?,
                Input::Shell(command) => self.run_shell(&command, out, err)?,
                Input::Prompt(prompt) => self.handle_prompt(&prompt, input, out, err).await?,
            }
        }

        self.close();
        Ok(())
    }

    fn clear<O: Write, E: Write>(&mut self, out: &mut O, err: &mut E) -> Result<()> {
        match self.provider.clear_history(&mut self.conversation) {
            Ok(()) => writeln!(out, "Conversation history cleared.")?,
            Err(e) => writeln!(err, "Error clearing history: {e:#}")?,
        }
        Ok(())
    }

    fn open_config<O: Write, E: Write>(&mut self, out: &mut O, err: &mut E) -> Result<()> {
        writeln!(out, "Opening config file: {}", self.config_path.display())?;
        out.flush()?;
        if let Err(e) = self.executor.open_editor(&self.editor, &self.config_path) {
            writeln!(err, "Error opening config file: {e:#}")?;
        }
        Ok(())
    }

    fn run_shell<O: Write, E: Write>(&mut self, command: &str, out: &mut O, err: &mut E) -> Result<()> {
        if let Some(target) = direct_cd_target(command) {
            match self.cwd.change(target, self.home.as_deref()) {
                Ok(path) => debug!(path = %path.display(), "changed directory"),
                Err(e) => writeln!(err, "{e}")?,
            }
            return Ok(());
        }

        out.flush()?;
        if let Err(e) = self.executor.run_command(command, self.cwd.path()) {
            writeln!(err, "Error executing command: {e:#}")?;
        }
        Ok(())
    }

    async fn handle_prompt<I, O, E>(
        &mut self,
        prompt: &str,
        input: &mut I,
        out: &mut O,
        err: &mut E,
    ) -> Result<()>
    where
        I: BufRead,
        O: Write,
        E: Write,
    {
        write!(out, "AI: ")?;
        out.flush()?;

        let response =
            match provider::send(self.provider.as_ref(), &mut self.conversation, prompt, out, err).await {
                Ok(response) => response,
                Err(e) => {
                    error!("prompt failed: {e:#}");
                    writeln!(err, "Error processing prompt: {e:#}")?;
                    return Ok(());
                }
            };

        match self.handle_response(&response, input, out, err) {
            Ok(outcome) => debug!(?outcome, "response handled"),
            Err(e) => writeln!(err, "{e:#}")?,
        }
        Ok(())
    }

    /// Act on the shell block of `response`, if any.
    ///
    /// A `cd` in the script moves the virtual directory first. A script that
    /// is only that `cd` stops there; anything else is staged, shown, and run
    /// on confirmation in the virtual directory.
    pub fn handle_response<I, O, E>(
        &mut self,
        response: &str,
        input: &mut I,
        out: &mut O,
        err: &mut E,
    ) -> Result<ScriptOutcome>
    where
        I: BufRead,
        O: Write,
        E: Write,
    {
        let script = extract_shell_block(response);
        if script.is_empty() {
            return Ok(ScriptOutcome::NoScript);
        }

        if let Some(cd) = detect_cd(&script) {
            match self.cwd.resolve(&cd.target, self.home.as_deref()) {
                Ok(resolved) => {
                    if resolved != self.cwd.path() {
                        writeln!(out, "Changed directory to: {}", resolved.display())?;
                        self.cwd.set(resolved);
                    }
                }
                Err(e) => {
                    warn!(cd_target = %cd.target, "cd in script does not resolve");
                    writeln!(err, "{e}")?;
                }
            }
            if cd.is_whole_script(&script) {
                return Ok(ScriptOutcome::DirectoryOnly);
            }
        }

        let staged = stage_script_in(&self.stage_dir, &script).context("Error saving script")?;
        let contents = staged.read_contents().context("Error reading script")?;

        self.review.display_script_with_io(&contents, out)?;
        match self.review.confirm_with_io(input, out)? {
            Confirmation::Execute => {
                out.flush()?;
                self.executor
                    .run_script(staged.path(), self.cwd.path())
                    .context("Error executing script")?;
                Ok(ScriptOutcome::Executed)
            }
            Confirmation::Decline => {
                self.review.show_declined_with_io(out)?;
                Ok(ScriptOutcome::Declined)
            }
        }
    }

    fn close(&mut self) {
        if let Err(e) = self.provider.close() {
            warn!("failed to close provider: {e:#}");
        }
        info!("session ended");
    }
}
