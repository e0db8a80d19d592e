//! # riser-state-repo
//!
//! Publishing desired state to a version-controlled state repository.
//!
//! The state repository is the durable source of truth for what should run
//! in each stage. This crate provides:
//!
//! - [`StateRepo`]: a version-control backend bound to one working copy
//!   (`reset_hard_to_remote`, `write`, `commit_all`, `push`), with [`GitRepo`]
//!   as the git implementation
//! - [`Committer`]: "apply a named, atomic set of file changes", with three
//!   variants:
//!   - [`GitCommitter`] serializes commits through the working copy
//!   - [`DryRunCommitter`] records commits in memory without any I/O
//!   - [`FileCommitter`] writes files into a plain directory
//!
//! ## Commit protocol
//!
//! `Idle → Resetting → Writing → Committing → Pushing → Idle` (or `Failed`).
//! The working copy is reset to the remote branch tip before every write, so
//! drift left behind by out-of-band edits or failed attempts is never
//! published. A clean tree after writing yields [`CommitOutcome::NoChanges`]
//! and no push.
//!
//! A step that overruns its deadline kills its git process. The next reset
//! removes the lock files such a process leaves in `.git`, and re-clones a
//! working copy whose clone never finished.

mod committer;
mod error;
mod files;
mod repo;

pub use committer::{Committer, DryRunCommit, DryRunCommitter, FileCommitter, GitCommitter};
pub use error::StateRepoError;
pub use files::ResourceFile;
pub use repo::{CommitOutcome, CommitPhase, GitConfig, GitRepo, StateRepo};
