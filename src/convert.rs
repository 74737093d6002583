//! DOCX to PDF conversion through a headless office suite
//!
//! The converter is invoked as
//! `soffice --headless ... --convert-to pdf --outdir <dir> <input>` and writes
//! `<dir>/<input stem>.pdf`. A conversion that has already produced that file
//! is reused without running the converter again.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use log::{debug, warn};
use reqwest::Url;
use tempfile::TempDir;
use crate::error::{ConversionError, Result};

/// Default converter program
pub const DEFAULT_PROGRAM: &str = "soffice";

/// Default limit on a single conversion
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on the `--version` availability check
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Flags that keep the office suite from opening any window or restoring state
const HEADLESS_FLAGS: &[&str] = &[
    "--headless",
    "--norestore",
    "--nolockcheck",
    "--nodefault",
    "--invisible",
];

/// Runs the external converter with a timeout
#[derive(Debug, Clone)]
pub struct Converter {
    program: PathBuf,
    timeout: Duration,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM, DEFAULT_TIMEOUT)
    }
}

impl Converter {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the converter program launches and answers `--version` in time
    pub fn is_available(&self) -> bool {
        let check_timeout = self.timeout.min(VERSION_CHECK_TIMEOUT);
        let mut child = match self.command().arg("--version").spawn() {
            Ok(child) => child,
            Err(e) => {
                debug!("cannot launch {}: {}", self.program.display(), e);
                return false;
            }
        };

        match wait_with_deadline(&mut child, check_timeout) {
            Ok(Some(_)) => true,
            Ok(None) => {
                warn!(
                    "{} --version did not answer within {}s",
                    self.program.display(),
                    check_timeout.as_secs()
                );
                false
            }
            Err(e) => {
                debug!("waiting on {} failed: {}", self.program.display(), e);
                false
            }
        }
    }

    /// Converter command with silenced stdio, in its own process group on unix
    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command
    }

    /// Path the converter writes for `input`
    pub fn derived_path(input: &Path) -> PathBuf {
        input.with_extension("pdf")
    }

    /// Convert `input` to PDF, returning the path of the converted file
    ///
    /// The caller owns the returned file and is responsible for removing it.
    pub fn convert(&self, input: &Path) -> std::result::Result<PathBuf, ConversionError> {
        let output = Self::derived_path(input);
        if output.as_path() == input {
            return Err(ConversionError::NoOutput(output));
        }

        if output.exists() {
            debug!("reusing converted file {}", output.display());
            return Ok(output);
        }

        let outdir = match input.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        // A private profile keeps concurrent instances from handing off to each other
        let profile = tempfile::Builder::new().prefix("page-recount-profile-").tempdir()?;
        let profile_url = Url::from_directory_path(profile.path())
            .map_err(|()| io::Error::new(ErrorKind::InvalidInput, "profile path is not absolute"))?;

        let mut child = self
            .command()
            .arg(format!("-env:UserInstallation={}", profile_url))
            .args(HEADLESS_FLAGS)
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(outdir)
            .arg(input)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ConversionError::MissingBinary(self.program.clone()),
                _ => ConversionError::Io(e),
            })?;

        let status = wait_with_deadline(&mut child, self.timeout)?
            .ok_or(ConversionError::Timeout(self.timeout))?;

        if !status.success() {
            return Err(ConversionError::NonZeroExit(status));
        }
        if !output.exists() {
            return Err(ConversionError::NoOutput(output));
        }

        Ok(output)
    }
}

/// Wait for `child` until `timeout` elapses; `None` means it was killed
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            terminate(child);
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Kill `child` and, on unix, every process in its group
///
/// The office suite launcher forks the real converter, which killing the
/// launcher alone would leave running.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let signalled = Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = signalled {
            debug!("could not signal process group {}: {}", group, e);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// A file removed when the guard is dropped
#[derive(Debug)]
pub struct RemoveOnDrop(PathBuf);

impl RemoveOnDrop {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.0) {
            if e.kind() != ErrorKind::NotFound {
                warn!("failed to remove {}: {}", self.0.display(), e);
            }
        }
    }
}

/// A downloaded document staged on disk for the converter
///
/// Owned by a single record's resolution. The directory and everything in it,
/// converted output included, is deleted on drop.
#[derive(Debug)]
pub struct TempArtifact {
    dir: TempDir,
    source: PathBuf,
}

impl TempArtifact {
    /// Write `bytes` to a fresh private directory as `document.<extension>`
    pub fn stage(bytes: &[u8], extension: &str) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("page-recount-").tempdir()?;
        let source = dir.path().join(format!("document.{}", extension));
        fs::write(&source, bytes)?;
        Ok(Self { dir, source })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}
