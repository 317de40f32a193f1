//! Staging of extracted scripts as temporary executables.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

pub const SHEBANG: &str = "#!/bin/bash\n";

/// Owner read/write/execute.
const SCRIPT_MODE: u32 = 0o700;

static SEQUENCE: AtomicUsize = AtomicUsize::new(0);

/// The step of staging that failed. The partial file is already removed.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("failed to create script file {}: {source}", path.display())]
    Create { path: PathBuf, source: io::Error },
    #[error("failed to write shebang: {0}")]
    Shebang(#[source] io::Error),
    #[error("failed to write code: {0}")]
    Body(#[source] io::Error),
    #[error("failed to write trailing newline: {0}")]
    TrailingNewline(#[source] io::Error),
    #[error("failed to close temp file: {0}")]
    Close(#[source] io::Error),
    #[error("failed to set executable permission: {0}")]
    Permissions(#[source] io::Error),
}

/// A script written to disk. The file is removed when this is dropped.
#[derive(Debug)]
pub struct StagedScript {
    path: PathBuf,
}

impl StagedScript {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_contents(&self) -> io::Result<String> {
        fs::read_to_string(&self.path)
    }
}

impl Drop for StagedScript {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed staged script"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), error = %err, "failed to remove staged script"),
        }
    }
}

/// Destination of a staged script's bytes.
trait ScriptSink: Write {
    /// Flush to disk before the file is closed.
    fn sync(&mut self) -> io::Result<()>;
}

impl ScriptSink for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Stage `code` in `dir` as `aiterm-<pid>-<seq>.sh`.
pub fn stage_script_in(dir: &Path, code: &str) -> Result<StagedScript, StageError> {
    stage_with(dir, code, |file| file)
}

fn stage_with<S, F>(dir: &Path, code: &str, sink: F) -> Result<StagedScript, StageError>
where
    S: ScriptSink,
    F: FnOnce(File) -> S,
{
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let path = dir.join(format!("aiterm-{}-{}.sh", std::process::id(), seq));

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|source| StageError::Create {
            path: path.clone(),
            source,
        })?;

    // From here on the guard removes the file if any step fails.
    let staged = StagedScript { path };
    write_script(sink(file), code)?;
    set_executable(staged.path()).map_err(StageError::Permissions)?;

    debug!(path = %staged.path().display(), bytes = code.len(), "staged script");
    Ok(staged)
}

fn write_script<S: ScriptSink>(mut sink: S, code: &str) -> Result<(), StageError> {
    sink.write_all(SHEBANG.as_bytes())
        .map_err(StageError::Shebang)?;
    sink.write_all(code.as_bytes()).map_err(StageError::Body)?;
    if !code.ends_with('\n') {
        sink.write_all(b"\n").map_err(StageError::TrailingNewline)?;
    }
    sink.flush().map_err(StageError::Close)?;
    sink.sync().map_err(StageError::Close)?;
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(SCRIPT_MODE))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_staged_script_has_shebang_code_and_single_newline() {
        let dir = TempDir::new().unwrap();

        let staged = stage_script_in(dir.path(), "echo hi\nls").unwrap();

        assert_eq!(staged.read_contents().unwrap(), "#!/bin/bash\necho hi\nls\n");
    }

    #[test]
    fn test_existing_trailing_newline_is_not_doubled() {
        let dir = TempDir::new().unwrap();

        let staged = stage_script_in(dir.path(), "echo hi\n").unwrap();

        assert_eq!(staged.read_contents().unwrap(), "#!/bin/bash\necho hi\n");
    }

    #[test]
    fn test_file_name_contains_process_id() {
        let dir = TempDir::new().unwrap();

        let staged = stage_script_in(dir.path(), "true").unwrap();

        let name = staged.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&format!("aiterm-{}-", std::process::id())));
        assert!(name.ends_with(".sh"));
    }

    #[test]
    fn test_consecutive_scripts_get_distinct_paths() {
        let dir = TempDir::new().unwrap();

        let first = stage_script_in(dir.path(), "true").unwrap();
        let second = stage_script_in(dir.path(), "true").unwrap();

        assert_ne!(first.path(), second.path());
    }

    #[cfg(unix)]
    #[test]
    fn test_script_is_owner_executable_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();

        let staged = stage_script_in(dir.path(), "true").unwrap();

        let mode = fs::metadata(staged.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = TempDir::new().unwrap();
        let staged = stage_script_in(dir.path(), "true").unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());

        drop(staged);

        assert!(!path.exists());
    }

    /// Passes writes through to the file until the `fail_at`-th write.
    struct FlakyFile {
        file: File,
        writes: usize,
        fail_at: usize,
        fail_sync: bool,
    }

    impl FlakyFile {
        fn failing_write(fail_at: usize) -> impl FnOnce(File) -> Self {
            move |file| Self { file, writes: 0, fail_at, fail_sync: false }
        }

        fn failing_sync() -> impl FnOnce(File) -> Self {
            |file| Self { file, writes: 0, fail_at: usize::MAX, fail_sync: true }
        }
    }

    impl Write for FlakyFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            if self.writes == self.fail_at {
                return Err(io::Error::other("disk full"));
            }
            self.file.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }

    impl ScriptSink for FlakyFile {
        fn sync(&mut self) -> io::Result<()> {
            if self.fail_sync {
                return Err(io::Error::other("sync failed"));
            }
            self.file.sync_all()
        }
    }

    fn entries(dir: &TempDir) -> usize {
        fs::read_dir(dir.path()).unwrap().count()
    }

    #[test]
    fn test_body_failure_removes_partial_file() {
        let dir = TempDir::new().unwrap();

        let err = stage_with(dir.path(), "echo hi", FlakyFile::failing_write(2)).unwrap_err();

        assert!(matches!(err, StageError::Body(_)));
        assert!(err.to_string().contains("failed to write code: disk full"));
        assert_eq!(entries(&dir), 0);
    }

    #[test]
    fn test_shebang_failure_removes_partial_file() {
        let dir = TempDir::new().unwrap();

        let err = stage_with(dir.path(), "echo hi", FlakyFile::failing_write(1)).unwrap_err();

        assert!(matches!(err, StageError::Shebang(_)));
        assert_eq!(entries(&dir), 0);
    }

    #[test]
    fn test_sync_failure_is_reported_as_close() {
        let dir = TempDir::new().unwrap();

        let err = stage_with(dir.path(), "echo hi\n", FlakyFile::failing_sync()).unwrap_err();

        assert!(matches!(err, StageError::Close(_)));
        assert_eq!(entries(&dir), 0);
    }

    #[test]
    fn test_create_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");

        let err = stage_script_in(&missing, "true").unwrap_err();

        assert!(matches!(err, StageError::Create { .. }));
        assert!(err.to_string().contains("failed to create script file"));
    }
}
