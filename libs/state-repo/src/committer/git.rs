use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::Committer;
use crate::error::StateRepoError;
use crate::files::ResourceFile;
use crate::repo::{CommitOutcome, CommitPhase, GitRepo, StateRepo};

/// Publishes commits through a single working copy, one at a time.
///
/// The committer owns the [`StateRepo`]. Each commit holds the lock from the
/// reset until the push returns, so concurrent callers queue instead of
/// interleaving writes. Every step runs under `step_timeout`; a step that
/// overruns is dropped (killing its git process) and the lock is released.
///
/// A push rejected because the remote moved is reported as
/// [`StateRepoError::PushRejected`] and not retried here.
pub struct GitCommitter<R = GitRepo> {
    repo: Mutex<R>,
    step_timeout: Duration,
}

impl<R: StateRepo> GitCommitter<R> {
    pub fn new(repo: R, step_timeout: Duration) -> Self {
        Self {
            repo: Mutex::new(repo),
            step_timeout,
        }
    }

    async fn step<T>(
        &self,
        phase: CommitPhase,
        fut: impl Future<Output = Result<T, StateRepoError>>,
    ) -> Result<T, StateRepoError> {
        debug!(%phase, "Commit step");
        tokio::time::timeout(self.step_timeout, fut)
            .await
            .unwrap_or(Err(StateRepoError::Timeout {
                phase,
                after: self.step_timeout,
            }))
    }

    async fn run(
        &self,
        repo: &mut R,
        message: &str,
        files: &[ResourceFile],
    ) -> Result<CommitOutcome, StateRepoError> {
        self.step(CommitPhase::Resetting, repo.reset_hard_to_remote())
            .await?;

        self.step(CommitPhase::Writing, repo.write(files)).await?;
        let outcome = self
            .step(CommitPhase::Committing, repo.commit_all(message))
            .await?;

        match &outcome {
            CommitOutcome::Committed { hash } => {
                self.step(CommitPhase::Pushing, repo.push()).await?;
                info!(commit = %hash, "Pushed state repository commit");
            }
            _ => info!("No changes to commit"),
        }

        Ok(outcome)
    }
}

#[async_trait]
impl<R: StateRepo + 'static> Committer for GitCommitter<R> {
    #[instrument(skip(self, files), fields(files = files.len()))]
    async fn commit(
        &self,
        message: &str,
        files: Vec<ResourceFile>,
    ) -> Result<CommitOutcome, StateRepoError> {
        let mut repo = self.repo.lock().await;
        let result = self.run(&mut repo, message, &files).await;
        drop(repo);

        if let Err(e) = &result {
            warn!(error = %e, phase = ?e.phase(), "State repository commit failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Clone, Default)]
    struct Counters {
        in_flight: Arc<AtomicBool>,
        overlaps: Arc<AtomicUsize>,
        resets: Arc<AtomicUsize>,
        commits: Arc<AtomicUsize>,
        pushes: Arc<AtomicUsize>,
    }

    impl Counters {
        fn count(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    struct FakeRepo {
        counters: Counters,
        delay: Duration,
        has_changes: bool,
        hang_write_once: Arc<AtomicBool>,
        hang_push_once: Arc<AtomicBool>,
    }

    impl FakeRepo {
        fn new(counters: Counters) -> Self {
            Self {
                counters,
                delay: Duration::from_millis(10),
                has_changes: true,
                hang_write_once: Arc::new(AtomicBool::new(false)),
                hang_push_once: Arc::new(AtomicBool::new(false)),
            }
        }

        fn finish(&self) {
            self.counters.in_flight.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StateRepo for FakeRepo {
        async fn reset_hard_to_remote(&mut self) -> Result<(), StateRepoError> {
            if self.counters.in_flight.swap(true, Ordering::SeqCst) {
                self.counters.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            self.counters.resets.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(())
        }

        async fn write(&mut self, _files: &[ResourceFile]) -> Result<(), StateRepoError> {
            if self.hang_write_once.swap(false, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(())
        }

        async fn commit_all(&mut self, _message: &str) -> Result<CommitOutcome, StateRepoError> {
            if !self.has_changes {
                self.finish();
                return Ok(CommitOutcome::NoChanges);
            }
            let n = self.counters.commits.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(CommitOutcome::Committed {
                hash: format!("commit-{n}"),
            })
        }

        async fn push(&mut self) -> Result<(), StateRepoError> {
            if self.hang_push_once.swap(false, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            tokio::time::sleep(self.delay).await;
            self.counters.pushes.fetch_add(1, Ordering::SeqCst);
            self.finish();
            Ok(())
        }
    }

    fn files() -> Vec<ResourceFile> {
        vec![ResourceFile::write("state/dev/app.json", "{}")]
    }

    #[tokio::test]
    async fn commit_with_changes_pushes_exactly_once() {
        let counters = Counters::default();
        let committer = GitCommitter::new(FakeRepo::new(counters.clone()), Duration::from_secs(5));

        let outcome = committer.commit("update", files()).await.unwrap();

        assert_eq!(
            outcome,
            CommitOutcome::Committed {
                hash: "commit-1".to_string()
            }
        );
        assert_eq!(Counters::count(&counters.resets), 1);
        assert_eq!(Counters::count(&counters.commits), 1);
        assert_eq!(Counters::count(&counters.pushes), 1);
    }

    #[tokio::test]
    async fn clean_tree_never_pushes() {
        let counters = Counters::default();
        let mut repo = FakeRepo::new(counters.clone());
        repo.has_changes = false;
        let committer = GitCommitter::new(repo, Duration::from_secs(5));

        let outcome = committer.commit("update", files()).await.unwrap();

        assert_eq!(outcome, CommitOutcome::NoChanges);
        assert_eq!(Counters::count(&counters.resets), 1);
        assert_eq!(Counters::count(&counters.pushes), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_commits_run_serially() {
        let counters = Counters::default();
        let committer = Arc::new(GitCommitter::new(
            FakeRepo::new(counters.clone()),
            Duration::from_secs(5),
        ));

        let handles: Vec<_> = (0..3)
            .map(|i| {
                let committer = Arc::clone(&committer);
                tokio::spawn(async move {
                    committer
                        .commit(&format!("update {i}"), files())
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(Counters::count(&counters.overlaps), 0);
        assert_eq!(Counters::count(&counters.resets), 3);
        assert_eq!(Counters::count(&counters.pushes), 3);
    }

    #[tokio::test]
    async fn timed_out_step_releases_the_lock() {
        let counters = Counters::default();
        let repo = FakeRepo::new(counters.clone());
        repo.hang_push_once.store(true, Ordering::SeqCst);
        let committer = GitCommitter::new(repo, Duration::from_millis(200));

        let err = committer.commit("update", files()).await.unwrap_err();
        assert!(matches!(
            err,
            StateRepoError::Timeout {
                phase: CommitPhase::Pushing,
                ..
            }
        ));

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            committer.commit("update again", files()),
        )
        .await
        .expect("lock was not released")
        .unwrap();
        assert!(outcome.is_committed());
        assert_eq!(Counters::count(&counters.pushes), 1);
    }

    #[tokio::test]
    async fn timed_out_write_reports_the_writing_phase() {
        let counters = Counters::default();
        let repo = FakeRepo::new(counters.clone());
        repo.hang_write_once.store(true, Ordering::SeqCst);
        let committer = GitCommitter::new(repo, Duration::from_millis(200));

        let err = committer.commit("update", files()).await.unwrap_err();

        assert!(matches!(
            err,
            StateRepoError::Timeout {
                phase: CommitPhase::Writing,
                ..
            }
        ));
        assert_eq!(err.phase(), Some(CommitPhase::Writing));
        assert_eq!(Counters::count(&counters.commits), 0);
        assert_eq!(Counters::count(&counters.pushes), 0);
    }
}
