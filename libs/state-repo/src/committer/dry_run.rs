use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::Committer;
use crate::error::StateRepoError;
use crate::files::ResourceFile;
use crate::repo::CommitOutcome;

/// A commit captured by [`DryRunCommitter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DryRunCommit {
    pub message: String,
    pub files: Vec<ResourceFile>,
}

/// Records commits in call order without touching any storage.
///
/// Used to preview what a request would publish, and by tests asserting on
/// the exact file set.
#[derive(Debug, Default)]
pub struct DryRunCommitter {
    commits: Mutex<Vec<DryRunCommit>>,
}

impl DryRunCommitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commits recorded so far.
    pub fn commits(&self) -> Vec<DryRunCommit> {
        self.commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain the recorded commits.
    pub fn take_commits(&self) -> Vec<DryRunCommit> {
        std::mem::take(&mut *self.commits.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl Committer for DryRunCommitter {
    async fn commit(
        &self,
        message: &str,
        files: Vec<ResourceFile>,
    ) -> Result<CommitOutcome, StateRepoError> {
        self.commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DryRunCommit {
                message: message.to_string(),
                files,
            });
        Ok(CommitOutcome::Unpublished)
    }
}
