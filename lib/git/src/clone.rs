use std::path::Path;

use anyhow::{Context, anyhow};
use command::{
  run_openstream_command, run_openstream_command_redacted,
};
use openstream_client::entities::credential::AuthKind;

use crate::{CloneArgs, GitError, GitRes};

/// Shallow clone of the named branch into `dest`, which is removed
/// first if it exists. Token credentials are spliced into the remote
/// url in memory and redacted from the recorded command; ssh keys are
/// written inside the workspace, which the task deletes on exit.
#[tracing::instrument(level = "debug", skip(args), fields(url = &args.url, branch = &args.branch))]
pub async fn clone_repo(
  args: &CloneArgs,
  dest: &Path,
) -> Result<GitRes, GitError> {
  let _ = tokio::fs::remove_dir_all(dest).await;
  if let Some(parent) = dest.parent() {
    tokio::fs::create_dir_all(parent).await.with_context(|| {
      format!("failed to create workspace at {}", parent.display())
    })?;
  }

  let mut replacers = Vec::new();
  let mut env_prefix = String::new();
  let url = match &args.credential {
    None => args.url.clone(),
    Some(credential) => match credential.auth_kind {
      AuthKind::Token => {
        replacers
          .push((credential.secret.clone(), String::from("<TOKEN>")));
        authed_url(&args.url, &credential.secret)?
      }
      AuthKind::SshKey => {
        let key_path = write_ssh_key(dest, &credential.secret)
          .await
          .context("failed to stage ssh key")?;
        env_prefix = format!(
          "GIT_SSH_COMMAND='ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new' ",
          key_path.display()
        );
        args.url.clone()
      }
    },
  };

  let command = format!(
    "{env_prefix}git clone --depth 1 --single-branch --branch {} {url} {}",
    args.branch,
    dest.display()
  );

  let clone_log = tokio::time::timeout(
    args.timeout,
    run_openstream_command_redacted(
      "Clone Repo",
      None,
      command,
      &replacers,
    ),
  )
  .await
  .map_err(|_| GitError::CloneTimeout(args.timeout.as_secs()))?;

  if !clone_log.success {
    let stderr = clone_log.stderr.clone();
    return Err(classify_clone_failure(
      &stderr,
      &args.url,
      &args.branch,
    ));
  }

  let mut logs = vec![clone_log];

  let hash_log = run_openstream_command(
    "Latest Commit",
    dest,
    "git rev-parse HEAD",
  )
  .await;
  if !hash_log.success {
    return Err(GitError::Other(anyhow!(
      "failed to read commit hash | {}",
      hash_log.stderr
    )));
  }
  let hash = hash_log.stdout.trim().to_string();
  logs.push(hash_log);

  tracing::debug!("cloned {} at {hash}", args.url);

  Ok(GitRes {
    workspace: dest.to_path_buf(),
    hash,
    logs,
  })
}

fn authed_url(url: &str, token: &str) -> anyhow::Result<String> {
  let (scheme, rest) = url
    .split_once("://")
    .context("git url has no scheme, expected https://...")?;
  if rest.contains('@') {
    return Ok(url.to_string());
  }
  Ok(format!("{scheme}://{token}@{rest}"))
}

async fn write_ssh_key(
  dest: &Path,
  key: &str,
) -> anyhow::Result<std::path::PathBuf> {
  let dir = dest
    .parent()
    .context("workspace path has no parent")?
    .to_path_buf();
  tokio::fs::create_dir_all(&dir).await?;
  let key_path = dir.join("id_openstream");
  tokio::fs::write(&key_path, key).await?;
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(
      &key_path,
      std::fs::Permissions::from_mode(0o600),
    )
    .await?;
  }
  Ok(key_path)
}

fn classify_clone_failure(
  stderr: &str,
  url: &str,
  branch: &str,
) -> GitError {
  let lower = stderr.to_lowercase();
  if lower.contains("authentication failed")
    || lower.contains("could not read username")
    || lower.contains("could not read password")
    || lower.contains("permission denied (publickey")
    || lower.contains("invalid username or")
  {
    return GitError::AuthRequired(url.to_string());
  }
  if (lower.contains("remote branch") && lower.contains("not found"))
    || lower.contains("not found in upstream")
    || (lower.contains("repository")
      && (lower.contains("not found")
        || lower.contains("does not exist")))
  {
    return GitError::RefNotFound(format!("{url}#{branch}"));
  }
  // Anything unclassified is treated as reachability, so a retry
  // gets a chance before the task goes terminal.
  let tail = stderr
    .lines()
    .rev()
    .find(|line| !line.trim().is_empty())
    .unwrap_or("git clone failed with empty stderr");
  GitError::Unreachable(tail.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn token_is_spliced_into_https_url() {
    let url =
      authed_url("https://github.com/acme/app.git", "tok123")
        .unwrap();
    assert_eq!(url, "https://tok123@github.com/acme/app.git");
  }

  #[test]
  fn url_with_userinfo_is_untouched() {
    let url =
      authed_url("https://user@github.com/acme/app.git", "tok123")
        .unwrap();
    assert_eq!(url, "https://user@github.com/acme/app.git");
  }

  #[test]
  fn classifies_auth_failures() {
    let err = classify_clone_failure(
      "fatal: Authentication failed for 'https://github.com/x/y.git/'",
      "https://github.com/x/y.git",
      "main",
    );
    assert!(matches!(err, GitError::AuthRequired(_)));
    assert!(!err.transient());
  }

  #[test]
  fn classifies_missing_branch() {
    let err = classify_clone_failure(
      "fatal: Remote branch nope not found in upstream origin",
      "https://github.com/x/y.git",
      "nope",
    );
    assert!(matches!(err, GitError::RefNotFound(_)));
  }

  #[test]
  fn unknown_failures_are_transient() {
    let err = classify_clone_failure(
      "fatal: unable to access 'https://example/': Could not resolve host",
      "https://example/z.git",
      "main",
    );
    assert!(err.transient());
  }
}
