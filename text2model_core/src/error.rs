use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure the workflow can surface to a front end.
#[derive(Debug, Error)]
pub enum Error {
    /// Network or API failure, including malformed responses and timeouts.
    #[error("remote image service failed: {0}")]
    RemoteService(String),

    /// The remote call succeeded but returned no images.
    #[error("remote image service returned no images")]
    EmptyResult,

    #[error(transparent)]
    ExternalProcess(#[from] ProcessError),

    #[error("no image selected")]
    NoSelection,

    #[error("selection {index} is out of range ({len} images available)")]
    InvalidSelection { index: usize, len: usize },

    /// Another workflow operation is still in flight.
    #[error("another generation is already running")]
    Busy,

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("settings store error: {0}")]
    Settings(String),
}

/// Failures of the external mesh-reconstruction program.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("mesh script not found at {0}")]
    ScriptNotFound(PathBuf),

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("mesh generation exited with {}: {stderr}", describe_code(.code))]
    Failed { code: Option<i32>, stderr: String },

    #[error("mesh generation timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn remote(err: impl std::fmt::Display) -> Self {
        Error::RemoteService(err.to_string())
    }

    /// Short text suitable for a dialog or status line.
    pub fn user_message(&self) -> String {
        match self {
            Error::ExternalProcess(ProcessError::Failed { .. }) => {
                "Failed to generate 3D model. See log for details.".to_string()
            }
            Error::RemoteService(_) | Error::EmptyResult => {
                format!("Failed to generate images: {self}")
            }
            other => other.to_string(),
        }
    }
}
