use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use riser_state_repo::GitConfig;

use crate::db::DbConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub database: DbConfig,
    pub state_repo: StateRepoConfig,
}

/// Where and how desired state is published.
#[derive(Debug, Clone)]
pub struct StateRepoConfig {
    pub git: GitConfig,

    /// Deadline for each git step of a commit.
    pub step_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("RISER_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8000".to_string())
            .parse()
            .context("RISER_LISTEN_ADDR must be a socket address")?;

        let log_level = std::env::var("RISER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("RISER_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let database = DbConfig::from_env();
        let state_repo = StateRepoConfig::from_env()?;

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            database,
            state_repo,
        })
    }
}

impl StateRepoConfig {
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("RISER_GIT_URL").context("RISER_GIT_URL must be set")?;

        let local_path = std::env::var("RISER_GIT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp/riser/state"));

        let mut git = GitConfig::new(url, local_path);
        if let Ok(branch) = std::env::var("RISER_GIT_BRANCH") {
            git = git.with_branch(branch);
        }
        if let Ok(name) = std::env::var("RISER_GIT_AUTHOR_NAME") {
            git.author_name = name;
        }
        if let Ok(email) = std::env::var("RISER_GIT_AUTHOR_EMAIL") {
            git.author_email = email;
        }

        let step_timeout = match std::env::var("RISER_GIT_TIMEOUT_SECS") {
            Ok(secs) => Duration::from_secs(
                secs.parse()
                    .context("RISER_GIT_TIMEOUT_SECS must be a whole number of seconds")?,
            ),
            Err(_) => Duration::from_secs(30),
        };

        Ok(Self { git, step_timeout })
    }
}
