//! Error taxonomy for the harness.
//!
//! [`HarnessError`] covers run-level failures (bad parameters, I/O, thread
//! start/join). [`KernelError`] is a per-test failure: the kernel could not
//! produce a statistic for one (configuration, bitstream) pair. Kernel errors
//! never abort a run; they are recorded on the test and excluded from the
//! acceptance math.

use std::error::Error;
use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

use crate::report::Report;

/// Run-level failure.
#[derive(Debug)]
pub enum HarnessError {
    /// A parameter value or range was rejected before any work started.
    Validation(String),
    /// The bit source or an output file failed.
    Io(io::Error),
    /// A worker thread could not be started or joined.
    Concurrency(String),
    /// A caller addressed a configuration or test the report does not hold.
    Report(String),
}

impl HarnessError {
    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation(detail.into())
    }
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(detail) => write!(f, "invalid parameter: {detail}"),
            Self::Io(err) => write!(f, "i/o failure: {err}"),
            Self::Concurrency(detail) => write!(f, "worker pool failure: {detail}"),
            Self::Report(detail) => write!(f, "report addressing error: {detail}"),
        }
    }
}

impl Error for HarnessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for HarnessError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// A kernel failed to run for one (configuration, bitstream) pair.
///
/// This is distinct from a test that ran and produced a low p-value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KernelError {
    /// Scratch memory could not be reserved.
    Allocation { bytes: usize },
    /// The bitstream is too short for this parameterization.
    InsufficientData { needed: usize, got: usize },
    /// A special function or distribution rejected its arguments.
    Numeric { detail: String },
    /// The kernel panicked on its worker thread.
    Panicked { detail: String },
}

impl KernelError {
    pub fn numeric(detail: impl fmt::Display) -> Self {
        Self::Numeric {
            detail: detail.to_string(),
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { bytes } => write!(f, "failed to allocate {bytes} bytes of scratch"),
            Self::InsufficientData { needed, got } => {
                write!(f, "insufficient data: need {needed} bits, got {got}")
            }
            Self::Numeric { detail } => write!(f, "numeric failure: {detail}"),
            Self::Panicked { detail } => write!(f, "kernel panicked: {detail}"),
        }
    }
}

impl Error for KernelError {}

/// A fatal error stopped the run; `report` holds every result collected
/// before it, finalized.
#[derive(Debug)]
pub struct RunAborted {
    pub error: HarnessError,
    pub report: Box<Report>,
}

impl fmt::Display for RunAborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run of '{}' aborted after {} bitstream(s): {}",
            self.report.test_name, self.report.bitstreams_tested, self.error
        )
    }
}

impl Error for RunAborted {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_error_messages_name_the_failure() {
        let err = KernelError::InsufficientData {
            needed: 100,
            got: 8,
        };
        assert_eq!(err.to_string(), "insufficient data: need 100 bits, got 8");
        assert!(KernelError::numeric("df <= 0").to_string().contains("df <= 0"));
    }

    #[test]
    fn io_errors_keep_their_source() {
        let err: HarnessError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("i/o failure"));
    }
}
