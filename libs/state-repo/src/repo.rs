//! Version-control backend for the state repository.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::StateRepoError;
use crate::files::{self, ResourceFile};

/// Result of a commit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new commit was created (and, for git, pushed).
    Committed { hash: String },

    /// The tree was already in the requested state; nothing was committed
    /// or pushed.
    NoChanges,

    /// The changes were recorded or written locally without publishing to
    /// the state repository (dry-run and file-output committers).
    Unpublished,
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    pub fn hash(&self) -> Option<&str> {
        match self {
            Self::Committed { hash } => Some(hash),
            _ => None,
        }
    }
}

/// Step of the commit protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPhase {
    Resetting,
    Writing,
    Committing,
    Pushing,
}

impl fmt::Display for CommitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Self::Resetting => "resetting",
            Self::Writing => "writing",
            Self::Committing => "committing",
            Self::Pushing => "pushing",
        };
        f.write_str(phase)
    }
}

/// A version-control backend bound to a single working copy.
///
/// Methods take `&mut self`: whoever holds the backend owns the working copy.
/// [`crate::GitCommitter`] keeps it behind a mutex for the whole
/// reset-write-commit-push span.
#[async_trait]
pub trait StateRepo: Send {
    /// Discard all local drift and move to the remote branch tip.
    async fn reset_hard_to_remote(&mut self) -> Result<(), StateRepoError>;

    /// Write and delete `files` in the working copy without committing.
    async fn write(&mut self, files: &[ResourceFile]) -> Result<(), StateRepoError>;

    /// Stage everything and commit with `message`.
    ///
    /// Returns [`CommitOutcome::NoChanges`] when the tree is clean.
    async fn commit_all(&mut self, message: &str) -> Result<CommitOutcome, StateRepoError>;

    /// Apply `files`, stage everything and commit with `message`.
    async fn write_and_commit(
        &mut self,
        message: &str,
        files: &[ResourceFile],
    ) -> Result<CommitOutcome, StateRepoError> {
        self.write(files).await?;
        self.commit_all(message).await
    }

    /// Push the local branch to the remote.
    async fn push(&mut self) -> Result<(), StateRepoError>;
}

/// Location and identity of the state repository.
#[derive(Debug, Clone)]
pub struct GitConfig {
    /// Remote URL (anything `git clone` accepts).
    pub url: String,

    /// Branch holding desired state.
    pub branch: String,

    /// Where the working copy lives on disk.
    pub local_path: PathBuf,

    /// Commit author name.
    pub author_name: String,

    /// Commit author email.
    pub author_email: String,
}

impl GitConfig {
    pub fn new(url: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            branch: "main".to_string(),
            local_path: local_path.into(),
            author_name: "riser-server".to_string(),
            author_email: "riser-server@riser.dev".to_string(),
        }
    }

    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }
}

/// [`StateRepo`] backed by the `git` executable.
///
/// The working copy is cloned lazily on the first reset.
#[derive(Debug)]
pub struct GitRepo {
    config: GitConfig,
}

impl GitRepo {
    pub fn new(config: GitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GitConfig {
        &self.config
    }

    /// Clone the remote unless a usable working copy already exists.
    ///
    /// A clone killed part way leaves a `.git` without a valid `HEAD`; such a
    /// working copy is removed and cloned again.
    async fn ensure_cloned(&self) -> Result<(), StateRepoError> {
        let path = &self.config.local_path;
        if tokio::fs::try_exists(path.join(".git")).await? {
            if self.has_valid_head().await {
                return Ok(());
            }
            warn!(path = %path.display(), "Discarding unusable working copy");
            tokio::fs::remove_dir_all(path).await?;
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(
            url = %self.config.url,
            branch = %self.config.branch,
            path = %path.display(),
            "Cloning state repository"
        );

        let path_arg = path.to_string_lossy();
        run_git(
            None,
            CommitPhase::Resetting,
            &[
                "clone",
                "--branch",
                self.config.branch.as_str(),
                "--single-branch",
                self.config.url.as_str(),
                path_arg.as_ref(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn has_valid_head(&self) -> bool {
        let git_dir = format!("--git-dir={}", self.config.local_path.join(".git").display());
        self.git(
            CommitPhase::Resetting,
            &[git_dir.as_str(), "rev-parse", "--verify", "--quiet", "HEAD"],
        )
        .await
        .is_ok()
    }

    /// Remove `*.lock` files left in `.git` by a git process that was killed
    /// mid-step. Only called with the working copy held exclusively.
    async fn remove_stale_locks(&self) -> Result<(), StateRepoError> {
        let mut pending = vec![self.config.local_path.join(".git")];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    if entry.file_name() != "objects" {
                        pending.push(path);
                    }
                } else if path.extension().is_some_and(|ext| ext == "lock") {
                    warn!(lock = %path.display(), "Removing stale git lock");
                    tokio::fs::remove_file(&path).await?;
                }
            }
        }
        Ok(())
    }

    async fn git(&self, phase: CommitPhase, args: &[&str]) -> Result<String, StateRepoError> {
        run_git(Some(self.config.local_path.as_path()), phase, args).await
    }
}

#[async_trait]
impl StateRepo for GitRepo {
    async fn reset_hard_to_remote(&mut self) -> Result<(), StateRepoError> {
        self.ensure_cloned().await?;
        self.remove_stale_locks().await?;

        let branch = self.config.branch.as_str();
        let remote_ref = format!("origin/{branch}");
        self.git(CommitPhase::Resetting, &["fetch", "origin", branch])
            .await?;
        self.git(
            CommitPhase::Resetting,
            &["checkout", "-B", branch, remote_ref.as_str()],
        )
        .await?;
        self.git(CommitPhase::Resetting, &["reset", "--hard", remote_ref.as_str()])
            .await?;
        self.git(CommitPhase::Resetting, &["clean", "-fd"]).await?;

        debug!(branch = %branch, "Working copy reset to remote");
        Ok(())
    }

    async fn write(&mut self, files: &[ResourceFile]) -> Result<(), StateRepoError> {
        files::apply(&self.config.local_path, files).await
    }

    async fn commit_all(&mut self, message: &str) -> Result<CommitOutcome, StateRepoError> {
        self.git(CommitPhase::Committing, &["add", "--all"]).await?;
        let status = self
            .git(CommitPhase::Committing, &["status", "--porcelain"])
            .await?;
        if status.trim().is_empty() {
            return Ok(CommitOutcome::NoChanges);
        }

        let author_name = format!("user.name={}", self.config.author_name);
        let author_email = format!("user.email={}", self.config.author_email);
        self.git(
            CommitPhase::Committing,
            &[
                "-c",
                author_name.as_str(),
                "-c",
                author_email.as_str(),
                "commit",
                "--quiet",
                "-m",
                message,
            ],
        )
        .await?;

        let hash = self
            .git(CommitPhase::Committing, &["rev-parse", "HEAD"])
            .await?;
        Ok(CommitOutcome::Committed {
            hash: hash.trim().to_string(),
        })
    }

    async fn push(&mut self) -> Result<(), StateRepoError> {
        let refspec = format!("HEAD:refs/heads/{}", self.config.branch);
        match self
            .git(CommitPhase::Pushing, &["push", "origin", refspec.as_str()])
            .await
        {
            Err(StateRepoError::Git { stderr, .. }) if is_rejected_push(&stderr) => {
                Err(StateRepoError::PushRejected {
                    branch: self.config.branch.clone(),
                    stderr,
                })
            }
            other => other.map(|_| ()),
        }
    }
}

/// Run `git` and return stdout. The child is killed if the future is dropped,
/// which is how deadlines abort in-flight commands.
async fn run_git(
    cwd: Option<&Path>,
    phase: CommitPhase,
    args: &[&str],
) -> Result<String, StateRepoError> {
    let mut cmd = Command::new("git");
    if let Some(cwd) = cwd {
        cmd.arg("-c")
            .arg(format!("safe.directory={}", cwd.display()))
            .current_dir(cwd);
    }
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(command = ?cmd, %phase, "Running git");

    let output = cmd.output().await?;
    if !output.status.success() {
        return Err(StateRepoError::Git {
            phase,
            command: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn is_rejected_push(stderr: &str) -> bool {
    ["[rejected]", "non-fast-forward", "fetch first", "[remote rejected]"]
        .iter()
        .any(|marker| stderr.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_rejected_push() {
        let stderr = " ! [rejected]        HEAD -> main (fetch first)\nerror: failed to push some refs";
        assert!(is_rejected_push(stderr));
        assert!(!is_rejected_push("fatal: could not read from remote repository"));
    }

    #[test]
    fn commit_outcome_hash() {
        let outcome = CommitOutcome::Committed {
            hash: "abc123".to_string(),
        };
        assert!(outcome.is_committed());
        assert_eq!(outcome.hash(), Some("abc123"));
        assert_eq!(CommitOutcome::NoChanges.hash(), None);
    }

    #[test]
    fn git_config_defaults_to_main() {
        let config = GitConfig::new("https://example.com/state.git", "/tmp/state");
        assert_eq!(config.branch, "main");
        assert_eq!(config.with_branch("prod").branch, "prod");
    }
}
