//! Virtual working directory tracking.
//!
//! Every shell the session spawns is a fresh child process, so a `cd` inside
//! it cannot outlive the child. The session keeps its own notion of the
//! current directory instead and passes it to each spawned process.

use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Directory does not exist: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Could not determine home directory")]
    NoHome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDir {
    path: PathBuf,
}

impl VirtualDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Starts from the process working directory.
    pub fn from_current_dir() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last path component, used in the REPL prompt.
    pub fn short_name(&self) -> String {
        match self.path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => self.path.display().to_string(),
        }
    }

    /// Resolve a `cd` target against this directory without changing it.
    ///
    /// Empty and `~` targets go to `home`, `~/x` is home-relative, relative
    /// targets are joined to the current path and normalised lexically.
    pub fn resolve(&self, target: &str, home: Option<&Path>) -> Result<PathBuf, DirectoryError> {
        let target = target.trim();
        let candidate = if target.is_empty() || target == "~" {
            home.ok_or(DirectoryError::NoHome)?.to_path_buf()
        } else if let Some(rest) = target.strip_prefix("~/") {
            home.ok_or(DirectoryError::NoHome)?.join(rest)
        } else {
            let path = Path::new(target);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                self.path.join(path)
            }
        };

        let resolved = normalize(&candidate);
        if resolved.is_dir() {
            Ok(resolved)
        } else {
            Err(DirectoryError::NotFound(resolved))
        }
    }

    /// Resolve `target` and move there. On error the directory is unchanged.
    pub fn change(&mut self, target: &str, home: Option<&Path>) -> Result<&Path, DirectoryError> {
        let resolved = self.resolve(target, home)?;
        debug!(from = %self.path.display(), to = %resolved.display(), "virtual directory changed");
        self.path = resolved;
        Ok(&self.path)
    }

    pub fn set(&mut self, path: PathBuf) {
        self.path = path;
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// A `cd` found inside a generated script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdCommand {
    pub target: String,
}

impl CdCommand {
    /// True when the script consists of nothing but this `cd`.
    pub fn is_whole_script(&self, script: &str) -> bool {
        let script = script.trim();
        script
            .strip_prefix("cd")
            .map(|rest| {
                rest.starts_with(char::is_whitespace) && rest.trim() == self.target
            })
            .unwrap_or(false)
    }
}

fn cd_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)(?:^|[\s;&|(])cd[ \t]+([^\s;]+)").expect("cd pattern is valid")
    })
}

/// Find the first `cd <target>` in a script. Only the first one is reported.
pub fn detect_cd(script: &str) -> Option<CdCommand> {
    cd_regex()
        .captures(script)
        .and_then(|caps| caps.get(1))
        .map(|target| CdCommand {
            target: target.as_str().to_string(),
        })
}
