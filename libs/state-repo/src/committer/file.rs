use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::Committer;
use crate::error::StateRepoError;
use crate::files::{self, ResourceFile};
use crate::repo::CommitOutcome;

/// Writes files straight into a local directory, with no version control.
///
/// Useful for snapshotting rendered output.
#[derive(Debug, Clone)]
pub struct FileCommitter {
    root: PathBuf,
}

impl FileCommitter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Committer for FileCommitter {
    async fn commit(
        &self,
        message: &str,
        files: Vec<ResourceFile>,
    ) -> Result<CommitOutcome, StateRepoError> {
        debug!(
            root = %self.root.display(),
            message,
            files = files.len(),
            "Writing resources to directory"
        );
        files::apply(&self.root, &files).await?;
        Ok(CommitOutcome::Unpublished)
    }
}
