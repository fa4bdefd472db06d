use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{Error, ProcessError, Result};
use crate::settings::ResolvedPaths;

/// Arguments handed to the external mesh program for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshRequest {
    pub image_path: PathBuf,
    pub output_name: String,
    pub destination_folder: PathBuf,
}

impl MeshRequest {
    /// Where the external program is expected to write its mesh. The
    /// script trims the name and swaps spaces for underscores.
    pub fn expected_artifact(&self) -> PathBuf {
        let name = self.output_name.trim().replace(' ', "_");
        self.destination_folder.join(format!("{name}.obj"))
    }
}

/// Result of a run that exited with code 0.
#[derive(Debug, Clone)]
pub struct MeshOutcome {
    pub command_line: String,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub expected_artifact: PathBuf,
    /// Informational only; success is decided by the exit code.
    pub artifact_present: bool,
}

/// Runs `<interpreter> <script> <image> <name> <folder>`.
#[derive(Debug, Clone)]
pub struct MeshInvoker {
    interpreter: PathBuf,
    script: PathBuf,
    timeout: Option<Duration>,
}

impl MeshInvoker {
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            timeout: None,
        }
    }

    pub fn from_paths(paths: &ResolvedPaths, timeout: Option<Duration>) -> Self {
        Self::new(&paths.interpreter, &paths.script_path).with_timeout(timeout)
    }

    /// Without a timeout a hung process is awaited forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    pub fn args(&self, request: &MeshRequest) -> Vec<String> {
        vec![
            self.script.display().to_string(),
            request.image_path.display().to_string(),
            request.output_name.clone(),
            request.destination_folder.display().to_string(),
        ]
    }

    /// The command as it would be typed in a shell, for logs.
    pub fn command_line(&self, request: &MeshRequest) -> String {
        let quoted: Vec<String> = self
            .args(request)
            .into_iter()
            .map(|arg| format!("\"{arg}\""))
            .collect();
        format!("{} {}", self.interpreter.display(), quoted.join(" "))
    }

    pub async fn invoke(&self, request: &MeshRequest) -> Result<MeshOutcome> {
        if !self.script.exists() {
            return Err(ProcessError::ScriptNotFound(self.script.clone()).into());
        }

        let command_line = self.command_line(request);
        info!(command = %command_line, "starting mesh generation");

        let mut command = Command::new(&self.interpreter);
        command
            .args(self.args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: self.interpreter.display().to_string(),
            source,
        })?;

        let wait = child.wait_with_output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| ProcessError::TimedOut(limit))?,
            None => wait.await,
        }
        .map_err(|err| Error::io(&self.interpreter, err))?;

        let elapsed = started.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            warn!(
                code = ?output.status.code(),
                stderr = %stderr.trim(),
                "mesh generation failed"
            );
            return Err(ProcessError::Failed {
                code: output.status.code(),
                stderr,
            }
            .into());
        }

        let expected_artifact = request.expected_artifact();
        let artifact_present = expected_artifact.exists();
        if !artifact_present {
            warn!(
                path = %expected_artifact.display(),
                "mesh program exited cleanly but the expected artifact is missing"
            );
        }
        info!(elapsed_ms = elapsed.as_millis() as u64, "mesh generation finished");

        Ok(MeshOutcome {
            command_line,
            stdout,
            stderr,
            elapsed,
            expected_artifact,
            artifact_present,
        })
    }
}
