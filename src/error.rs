//! Error handling module for depbuild
//!
//! One `thiserror` enum covers every failure the library reports.
//! Step actions report hard failures through these types; the pipeline turns
//! them into `StepOutcome::Failed` at the invocation boundary.

use thiserror::Error;

/// Main error type for the build pipeline
#[derive(Error, Debug)]
pub enum BuildError {
    /// IO errors (file operations, directories, archives on disk)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors (options, forced step flags)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Packaging script template errors
    #[error("Template error: {0}")]
    Template(String),

    /// Archive extraction and source layout errors
    #[error("Archive error: {0}")]
    Archive(String),

    /// Network errors while fetching sources
    #[error("Download error: {0}")]
    Download(String),

    /// Shell command errors (spawn failures, non-zero exits)
    #[error("Command failed: {0}")]
    Command(String),

    /// A unit key that no builder is registered for
    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    /// A step returned a hard failure; the run stops here
    #[error("{step} for {unit} failed: {reason}")]
    StepFailed {
        unit: String,
        step: String,
        reason: String,
    },

    /// The run was stopped by SIGINT/SIGTERM/SIGHUP
    #[error("Interrupted by signal")]
    Interrupted,

    /// General errors (catch-all for edge cases)
    #[error("{0}")]
    General(String),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, BuildError>;

// Convenient error constructors
impl BuildError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a template error
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    /// Create an archive error
    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive(msg.into())
    }

    /// Create a download error
    pub fn download(msg: impl Into<String>) -> Self {
        Self::Download(msg.into())
    }

    /// Create a command error
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// Create a step failure error
    pub fn step_failed(
        unit: impl Into<String>,
        step: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::StepFailed {
            unit: unit.into(),
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Create a general error
    pub fn general(msg: impl Into<String>) -> Self {
        Self::General(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BuildError::config("unknown step 'z' for qt4");
        assert_eq!(err.to_string(), "Configuration error: unknown step 'z' for qt4");

        let err = BuildError::step_failed("boost", "build", "exit code 2");
        assert_eq!(err.to_string(), "build for boost failed: exit code 2");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BuildError = io_err.into();
        assert!(matches!(err, BuildError::Io(_)));
    }

    #[test]
    fn test_error_constructors() {
        let err = BuildError::command("make exited with 2");
        assert!(matches!(err, BuildError::Command(_)));

        let err = BuildError::archive("unsupported extension");
        assert!(matches!(err, BuildError::Archive(_)));
    }
}
