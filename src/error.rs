//! Error types shared by the samplers, the profiler and the exporters.
//!
//! Every failure below is recoverable from the point of view of the agent:
//! the scheduler decides whether a sampler gets disabled, the profiler drops
//! a single attempt, and the exporters log and move on.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures reading an external data source (/proc, a test data file, ...).
#[derive(Error, Debug)]
pub enum SourceError {
    /// The source cannot be used at all; the owning sampler gets disabled.
    #[error("{source_name} unavailable: {reason}")]
    Unavailable {
        source_name: &'static str,
        reason: String,
    },

    /// The source answered but the content could not be interpreted.
    #[error("{source_name} returned malformed data: {reason}")]
    Malformed {
        source_name: &'static str,
        reason: String,
    },

    #[error("reading {path}: {err}")]
    Io { path: PathBuf, err: io::Error },
}

impl SourceError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: io::Error) -> Self {
        SourceError::Io {
            path: path.into(),
            err,
        }
    }

    /// Whether the failure means the source should not be polled again.
    pub fn is_unavailable(&self) -> bool {
        match self {
            SourceError::Unavailable { .. } => true,
            SourceError::Io { err, .. } => matches!(
                err.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            SourceError::Malformed { .. } => false,
        }
    }
}

/// Failures reported by a sampler to the scheduler.
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("{sampler} sampler is disabled")]
    Disabled { sampler: &'static str },

    #[error("{sampler} sampler failed: {source}")]
    Source {
        sampler: &'static str,
        #[source]
        source: SourceError,
    },
}

/// Failures of a single profiling attempt, or of the profiling subsystem.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("syscall tracing is only supported on linux, running on {os}")]
    UnsupportedOs { os: &'static str },

    #[error("syscall tracing requires root privileges (euid {euid})")]
    InsufficientPrivilege { euid: u32 },

    #[error("failed to start tracer for pid {pid}: {err}")]
    Spawn { pid: u32, err: io::Error },

    #[error("failed to wait for tracer of pid {pid}: {err}")]
    Wait { pid: u32, err: io::Error },

    #[error("failed to access trace report {path}: {err}")]
    Report { path: PathBuf, err: io::Error },
}

/// Failures publishing metrics to an external collector.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("pushgateway push to {url} failed: {reason}")]
    Push { url: String, reason: String },

    #[error("push task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_classification() {
        let missing = SourceError::io("/proc/stat", io::Error::from(io::ErrorKind::NotFound));
        assert!(missing.is_unavailable());

        let malformed = SourceError::Malformed {
            source_name: "loadavg",
            reason: "short line".into(),
        };
        assert!(!malformed.is_unavailable());

        let interrupted =
            SourceError::io("/proc/stat", io::Error::from(io::ErrorKind::Interrupted));
        assert!(!interrupted.is_unavailable());
    }
}
