//! Commit dispatch.

mod dry_run;
mod file;
mod git;

pub use dry_run::{DryRunCommit, DryRunCommitter};
pub use file::FileCommitter;
pub use git::GitCommitter;

use async_trait::async_trait;

use crate::error::StateRepoError;
use crate::files::ResourceFile;
use crate::repo::CommitOutcome;

/// Applies a named, atomic set of file changes.
#[async_trait]
pub trait Committer: Send + Sync {
    /// Publish `files` as one change described by `message`.
    async fn commit(
        &self,
        message: &str,
        files: Vec<ResourceFile>,
    ) -> Result<CommitOutcome, StateRepoError>;
}
