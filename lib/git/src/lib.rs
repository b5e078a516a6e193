use std::{path::PathBuf, time::Duration};

use openstream_client::entities::{
  credential::GitCredential, update::Log,
};

mod clone;

pub use clone::clone_repo;

/// Clone failures the pipeline can act on. `Unreachable` and
/// `CloneTimeout` are transient and eligible for retry.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
  #[error("git remote unreachable | {0}")]
  Unreachable(String),
  #[error("authentication required for {0}")]
  AuthRequired(String),
  #[error("ref not found | {0}")]
  RefNotFound(String),
  #[error("clone timed out after {0}s")]
  CloneTimeout(u64),
  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

impl GitError {
  pub fn transient(&self) -> bool {
    matches!(
      self,
      GitError::Unreachable(_) | GitError::CloneTimeout(_)
    )
  }
}

#[derive(Debug, Clone, Default)]
pub struct GitRes {
  pub workspace: PathBuf,
  pub hash: String,
  pub logs: Vec<Log>,
}

#[derive(Debug, Clone)]
pub struct CloneArgs {
  pub url: String,
  pub branch: String,
  pub credential: Option<GitCredential>,
  pub timeout: Duration,
}

/// Removes a task workspace. Absence is fine, every pipeline exit
/// path calls this.
pub async fn cleanup_workspace(
  path: &std::path::Path,
) -> anyhow::Result<()> {
  match tokio::fs::remove_dir_all(path).await {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(anyhow::Error::new(e).context(format!(
      "failed to remove workspace at {}",
      path.display()
    ))),
  }
}
