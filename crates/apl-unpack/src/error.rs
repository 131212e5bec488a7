//! Error taxonomy for detection and extraction.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while detecting or extracting an artifact.
#[derive(Error, Debug)]
pub enum UnpackError {
    /// The input could not be inspected at all (missing or unreadable).
    #[error("Cannot detect format of {}: {reason}", path.display())]
    Detection { path: PathBuf, reason: String },

    /// A strategy needs an external tool that is not installed.
    #[error(
        "'{tool}' is required to extract {strategy} archives but was not found; install it"
    )]
    MissingTool {
        tool: &'static str,
        strategy: &'static str,
    },

    /// An external tool exited unsuccessfully.
    #[error("Command failed ({}): {command}{}", status_text(*status), stderr_suffix(stderr))]
    ToolFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// An external tool exceeded the configured timeout and was killed.
    #[error("Command timed out after {}s: {command}", timeout.as_secs())]
    ToolTimeout { command: String, timeout: Duration },

    /// The format was recognized but the container is structurally broken.
    #[error("Bad container {}: {reason}", path.display())]
    BadContainer { path: PathBuf, reason: String },

    /// A mounted volume survived every eject attempt.
    #[error("Failed to eject {} after {attempts} attempts", mount_point.display())]
    EjectFailed { mount_point: PathBuf, attempts: u32 },

    /// Relocation refused to overwrite an existing path.
    #[error("Refusing to overwrite existing path: {}", path.display())]
    DestinationConflict { path: PathBuf },

    /// Filesystem error tied to a specific path.
    #[error("IO error at {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    /// Filesystem error without path context.
    #[error(transparent)]
    RawIo(#[from] io::Error),
}

impl UnpackError {
    /// Attach a path to an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a [`UnpackError::BadContainer`] for `path`.
    pub fn bad_container(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::BadContainer {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True when the fix is installing a tool.
    pub fn is_missing_tool(&self) -> bool {
        matches!(self, Self::MissingTool { .. })
    }

    /// True when the fix is re-fetching the input.
    pub fn is_corrupt_input(&self) -> bool {
        matches!(self, Self::BadContainer { .. } | Self::ToolFailed { .. })
    }
}

fn status_text(status: Option<i32>) -> String {
    status.map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}"))
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n{trimmed}")
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, UnpackError>;
