//! Exercises `GitRepo` and `GitCommitter` against a local bare remote.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use riser_state_repo::{
    CommitOutcome, Committer, GitCommitter, GitConfig, GitRepo, ResourceFile, StateRepo,
    StateRepoError,
};

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=test", "-c", "user.email=test@riser.dev"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A bare remote with one commit on `main`.
struct Remote {
    _dir: tempfile::TempDir,
    url: String,
    scratch: std::path::PathBuf,
}

impl Remote {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let bare = dir.path().join("state.git");
        let seed = dir.path().join("seed");
        std::fs::create_dir_all(&bare).unwrap();
        std::fs::create_dir_all(&seed).unwrap();

        git(&bare, &["init", "--bare", "--quiet"]);
        git(&seed, &["init", "--quiet"]);
        git(&seed, &["checkout", "-q", "-b", "main"]);
        std::fs::write(seed.join("README.md"), "state\n").unwrap();
        git(&seed, &["add", "--all"]);
        git(&seed, &["commit", "-q", "-m", "init"]);
        git(&seed, &["remote", "add", "origin", bare.to_str().unwrap()]);
        git(&seed, &["push", "-q", "origin", "main"]);

        Self {
            url: bare.to_str().unwrap().to_string(),
            scratch: dir.path().to_path_buf(),
            _dir: dir,
        }
    }

    fn working_copy(&self, name: &str) -> GitRepo {
        let mut config = GitConfig::new(&self.url, self.scratch.join(name));
        config.author_name = "riser-test".to_string();
        GitRepo::new(config)
    }

    fn head(&self) -> String {
        git(Path::new(&self.url), &["rev-parse", "main"])
    }

    fn show(&self, path: &str) -> String {
        let spec = format!("main:{path}");
        git(Path::new(&self.url), &["show", spec.as_str()])
    }

    fn last_message(&self) -> String {
        git(Path::new(&self.url), &["log", "-1", "--format=%s", "main"])
    }
}

#[tokio::test]
async fn commit_is_pushed_and_second_commit_is_a_noop() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let remote = Remote::new();
    let committer = GitCommitter::new(remote.working_copy("wc"), Duration::from_secs(30));
    let files = vec![ResourceFile::write("state/dev/myapp.json", "{\"rev\":1}")];

    let outcome = committer
        .commit("Updating resources for \"myapp\" in stage \"dev\"", files.clone())
        .await
        .unwrap();

    let hash = match outcome {
        CommitOutcome::Committed { hash } => hash,
        other => panic!("expected a commit, got {other:?}"),
    };
    assert_eq!(remote.head(), hash);
    assert_eq!(remote.show("state/dev/myapp.json"), "{\"rev\":1}");
    assert_eq!(
        remote.last_message(),
        "Updating resources for \"myapp\" in stage \"dev\""
    );

    let again = committer.commit("same again", files).await.unwrap();
    assert_eq!(again, CommitOutcome::NoChanges);
    assert_eq!(remote.head(), hash);
}

#[tokio::test]
async fn reset_discards_local_drift() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let remote = Remote::new();
    let mut repo = remote.working_copy("wc");
    repo.reset_hard_to_remote().await.unwrap();
    let wc = repo.config().local_path.clone();

    // An unpushed commit and uncommitted junk left behind by a failed attempt.
    std::fs::write(wc.join("stale.json"), "stale").unwrap();
    git(&wc, &["add", "--all"]);
    git(&wc, &["commit", "-q", "-m", "stale local commit"]);
    std::fs::write(wc.join("README.md"), "edited\n").unwrap();
    std::fs::write(wc.join("untracked.json"), "junk").unwrap();

    repo.reset_hard_to_remote().await.unwrap();

    assert!(!wc.join("stale.json").exists());
    assert!(!wc.join("untracked.json").exists());
    assert_eq!(std::fs::read_to_string(wc.join("README.md")).unwrap(), "state\n");
    assert_eq!(git(&wc, &["rev-parse", "HEAD"]), remote.head());
}

#[tokio::test]
async fn push_after_remote_advanced_is_rejected() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let remote = Remote::new();
    let mut ours = remote.working_copy("ours");
    let mut theirs = remote.working_copy("theirs");

    ours.reset_hard_to_remote().await.unwrap();

    // Someone else publishes between our reset and our push.
    theirs.reset_hard_to_remote().await.unwrap();
    theirs
        .write_and_commit("out of band", &[ResourceFile::write("theirs.json", "1")])
        .await
        .unwrap();
    theirs.push().await.unwrap();

    let outcome = ours
        .write_and_commit("ours", &[ResourceFile::write("ours.json", "1")])
        .await
        .unwrap();
    assert!(outcome.is_committed());

    let err = ours.push().await.unwrap_err();
    assert!(
        matches!(err, StateRepoError::PushRejected { .. }),
        "unexpected error: {err}"
    );
    assert!(err.is_conflict());

    // A fresh attempt through the committer resets onto their commit and wins.
    let committer = GitCommitter::new(ours, Duration::from_secs(30));
    let retried = committer
        .commit("ours", vec![ResourceFile::write("ours.json", "1")])
        .await
        .unwrap();
    assert!(retried.is_committed());
    assert_eq!(remote.show("theirs.json"), "1");
    assert_eq!(remote.show("ours.json"), "1");
}

#[tokio::test]
async fn delete_removes_directories() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let remote = Remote::new();
    let committer = GitCommitter::new(remote.working_copy("wc"), Duration::from_secs(30));

    committer
        .commit(
            "add",
            vec![
                ResourceFile::write("state/dev/app/a.json", "a"),
                ResourceFile::write("state/dev/app/b.json", "b"),
            ],
        )
        .await
        .unwrap();
    let outcome = committer
        .commit("remove", vec![ResourceFile::delete("state/dev/app")])
        .await
        .unwrap();

    assert!(outcome.is_committed());
    let listing = git(
        Path::new(&remote.url),
        &["ls-tree", "-r", "--name-only", "main"],
    );
    assert_eq!(listing, "README.md");
}

#[tokio::test]
async fn stale_lock_files_do_not_block_later_commits() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let remote = Remote::new();
    let wc = remote.scratch.join("wc");
    let committer = GitCommitter::new(remote.working_copy("wc"), Duration::from_secs(30));
    committer
        .commit("first", vec![ResourceFile::write("state/dev/myapp.json", "1")])
        .await
        .unwrap();

    // What a git process killed at its deadline leaves behind.
    std::fs::write(wc.join(".git/index.lock"), "").unwrap();
    std::fs::write(wc.join(".git/refs/heads/main.lock"), "").unwrap();

    let outcome = committer
        .commit("second", vec![ResourceFile::write("state/dev/myapp.json", "2")])
        .await
        .unwrap();

    assert!(outcome.is_committed());
    assert_eq!(remote.show("state/dev/myapp.json"), "2");
    assert!(!wc.join(".git/index.lock").exists());
    assert!(!wc.join(".git/refs/heads/main.lock").exists());
}

#[tokio::test]
async fn unfinished_clone_is_cloned_again() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let remote = Remote::new();
    let wc = remote.scratch.join("wc");

    // A clone killed before it fetched anything.
    std::fs::create_dir_all(wc.join(".git")).unwrap();
    std::fs::write(wc.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();

    let mut repo = remote.working_copy("wc");
    repo.reset_hard_to_remote().await.unwrap();

    assert_eq!(git(&wc, &["rev-parse", "HEAD"]), remote.head());
    assert_eq!(std::fs::read_to_string(wc.join("README.md")).unwrap(), "state\n");
}
