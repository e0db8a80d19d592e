//! State repository error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::repo::CommitPhase;

/// Errors raised while publishing to the state repository.
#[derive(Debug, Error)]
pub enum StateRepoError {
    /// A git command exited unsuccessfully.
    #[error("error {phase} repo: `git {command}` failed: {stderr}")]
    Git {
        phase: CommitPhase,
        command: String,
        stderr: String,
    },

    /// The remote branch advanced between reset and push.
    #[error("push to branch {branch} was rejected because the remote has newer commits")]
    PushRejected { branch: String, stderr: String },

    /// A repository step exceeded its deadline and was aborted.
    #[error("error {phase} repo: timed out after {after:?}")]
    Timeout { phase: CommitPhase, after: Duration },

    /// A resource path escapes the repository root.
    #[error("invalid resource path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// Filesystem error while writing resources.
    #[error("error writing {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to spawn a git process or access the working copy.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StateRepoError {
    /// Conflicts are worth retrying: the whole reset-write-push sequence can
    /// succeed on a fresh attempt.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::PushRejected { .. })
    }

    /// The phase the protocol failed in, when known.
    pub fn phase(&self) -> Option<CommitPhase> {
        match self {
            Self::Git { phase, .. } | Self::Timeout { phase, .. } => Some(*phase),
            Self::PushRejected { .. } => Some(CommitPhase::Pushing),
            Self::InvalidPath { .. } | Self::Write { .. } => Some(CommitPhase::Writing),
            Self::Io(_) => None,
        }
    }
}
