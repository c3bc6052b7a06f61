//! Step outcomes.

use std::fmt;

/// Result of running one step action.
///
/// `Deferred` means "not actionable yet": nothing is recorded and the run
/// continues, so a later invocation retries the step. `Failed` stops the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    Deferred(String),
    Failed(String),
}

impl StepOutcome {
    pub fn deferred(reason: impl Into<String>) -> Self {
        Self::Deferred(reason.into())
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Map a command's success flag to Done or Failed
    pub fn from_success(success: bool, what: impl fmt::Display) -> Self {
        if success {
            Self::Done
        } else {
            Self::Failed(format!("{} did not succeed", what))
        }
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    #[inline]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => write!(f, "done"),
            Self::Deferred(reason) => write!(f, "deferred: {}", reason),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}
