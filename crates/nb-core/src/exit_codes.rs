//! Exit codes for the `nb-batch` CLI.
//!
//! Scripts read the outcome from the code alone; it is derived from the
//! batch result counts, never from parsing output.

use crate::batch::{BatchOutcome, BatchResult};

/// Process exit codes. Stable contract for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Every input succeeded or was skipped.
    Success = 0,

    /// At least one input failed, at least one did not.
    PartialFailure = 1,

    /// Every input failed.
    TotalFailure = 2,

    /// Unusable arguments or config; also returned when no input resolved.
    InvalidArgs = 3,

    /// The batch could not run (output directory not writable).
    IoError = 4,

    /// Interrupted before all inputs were processed.
    Cancelled = 5,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Success
    }

    pub fn from_outcome(outcome: BatchOutcome) -> Self {
        match outcome {
            BatchOutcome::Empty => ExitCode::InvalidArgs,
            BatchOutcome::Success => ExitCode::Success,
            BatchOutcome::PartialFailure => ExitCode::PartialFailure,
            BatchOutcome::TotalFailure => ExitCode::TotalFailure,
            BatchOutcome::Cancelled => ExitCode::Cancelled,
        }
    }

    /// Name used in JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Success => "OK",
            ExitCode::PartialFailure => "ERR_PARTIAL",
            ExitCode::TotalFailure => "ERR_TOTAL",
            ExitCode::InvalidArgs => "ERR_ARGS",
            ExitCode::IoError => "ERR_IO",
            ExitCode::Cancelled => "ERR_CANCELLED",
        }
    }
}

impl From<&BatchResult> for ExitCode {
    fn from(result: &BatchResult) -> Self {
        ExitCode::from_outcome(result.outcome)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
