use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use bollard::Docker;
use openstream_client::entities::{
  docker::{
    ContainerInspect, ContainerSummary, LABEL_APP_ID,
    StartContainerArgs,
  },
  update::Log,
};
use tokio::sync::mpsc;

mod containers;
mod images;
mod networks;

/// Errors surfaced by engine operations. `Transport` means the
/// daemon itself could not be reached and the operation is safe to
/// retry; everything else is terminal for the running task.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("container engine unreachable | {0}")]
  Transport(String),
  #[error("{0}")]
  Command(String),
  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

impl EngineError {
  pub fn transient(&self) -> bool {
    matches!(self, EngineError::Transport(_))
  }
}

#[derive(Debug, Clone)]
pub struct ImageBuildArgs {
  /// Build context directory (the cloned workspace).
  pub context: PathBuf,
  /// Dockerfile path relative to the context.
  pub dockerfile: String,
  pub tag: String,
  pub timeout: Duration,
}

/// Typed operations over images, containers and networks. One
/// implementation is injected at startup; tests swap in an in-memory
/// fake behind the same seam.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
  async fn ping(&self) -> bool;

  /// Builds the image, forwarding each output line through
  /// `on_line` as it is produced. A failed build still returns the
  /// partial log (as an unsuccessful [Log]); `Err` is reserved for
  /// the engine being unreachable.
  async fn build_image(
    &self,
    args: &ImageBuildArgs,
    on_line: mpsc::UnboundedSender<String>,
  ) -> Result<Log, EngineError>;

  /// Starts a container, replacing any existing container with the
  /// same name. Returns the new container id.
  async fn start_container(
    &self,
    args: &StartContainerArgs,
  ) -> Result<String, EngineError>;

  /// Graceful stop with force kill after `timeout_seconds`.
  /// Absence is fine.
  async fn stop_container(
    &self,
    name: &str,
    timeout_seconds: u64,
  ) -> Result<(), EngineError>;

  /// Absence is fine.
  async fn remove_container(
    &self,
    name: &str,
  ) -> Result<(), EngineError>;

  /// Absence is fine.
  async fn remove_image(&self, tag: &str)
  -> Result<(), EngineError>;

  async fn inspect_container(
    &self,
    name: &str,
  ) -> Result<Option<ContainerInspect>, EngineError>;

  /// Finite tail of the container log, restartable.
  async fn container_logs(
    &self,
    name: &str,
    tail: u64,
  ) -> Result<String, EngineError>;

  /// All containers carrying the platform ownership label.
  async fn list_app_containers(
    &self,
  ) -> Result<Vec<ContainerSummary>, EngineError>;

  async fn ensure_network(
    &self,
    name: &str,
  ) -> Result<(), EngineError>;
}

/// Removes platform labeled containers whose `platform.app_id` is
/// not in `active_ids`. Never touches a container of a live app.
/// Returns the removed container names.
pub async fn cleanup_orphans(
  engine: &dyn ContainerEngine,
  active_ids: &[String],
) -> Result<Vec<String>, EngineError> {
  let mut removed = Vec::new();
  for container in engine.list_app_containers().await? {
    let Some(app_id) = container.labels.get(LABEL_APP_ID) else {
      continue;
    };
    if active_ids.iter().any(|id| id == app_id) {
      continue;
    }
    info!(
      "removing orphan container {} (app {app_id})",
      container.name
    );
    engine.remove_container(&container.name).await?;
    removed.push(container.name);
  }
  Ok(removed)
}

/// Engine backed by the local docker daemon: bollard for queries,
/// the docker CLI for actions.
pub struct DockerEngine {
  docker: Docker,
}

impl DockerEngine {
  pub fn new(docker_host: &str) -> anyhow::Result<DockerEngine> {
    let docker = if docker_host.is_empty() {
      Docker::connect_with_defaults()
    } else if docker_host.starts_with("unix://") {
      Docker::connect_with_unix(
        docker_host,
        120,
        bollard::API_DEFAULT_VERSION,
      )
    } else {
      Docker::connect_with_http(
        docker_host,
        120,
        bollard::API_DEFAULT_VERSION,
      )
    }
    .context("failed to connect to docker daemon")?;
    Ok(DockerEngine { docker })
  }
}

/// The docker CLI prints this when the daemon socket is down.
const DAEMON_DOWN_MARKERS: [&str; 2] =
  ["Cannot connect to the Docker daemon", "error during connect"];

fn classify_cli_failure(stage: &str, log: &Log) -> EngineError {
  for marker in DAEMON_DOWN_MARKERS {
    if log.stderr.contains(marker) {
      return EngineError::Transport(
        log.stderr.trim().to_string(),
      );
    }
  }
  let tail = log
    .stderr
    .lines()
    .rev()
    .find(|line| !line.trim().is_empty())
    .unwrap_or("no output");
  EngineError::Command(format!("{stage} failed | {tail}"))
}

fn query_failure(e: bollard::errors::Error) -> EngineError {
  EngineError::Transport(e.to_string())
}

#[cfg(test)]
mod tests {
  use openstream_client::entities::{
    EnvironmentVar,
    docker::{LABEL_OWNED, LABEL_SUBDOMAIN},
  };

  use super::*;
  use crate::testing::FakeEngine;

  fn args(app_id: &str, subdomain: &str) -> StartContainerArgs {
    StartContainerArgs {
      image: format!("app-{subdomain}:abc"),
      name: format!("app-{subdomain}"),
      labels: vec![
        (LABEL_OWNED.to_string(), "true".to_string()),
        (LABEL_APP_ID.to_string(), app_id.to_string()),
        (LABEL_SUBDOMAIN.to_string(), subdomain.to_string()),
      ],
      env: vec![EnvironmentVar {
        variable: "MODE".to_string(),
        value: "prod".to_string(),
      }],
      network: "openstream".to_string(),
      restart: Default::default(),
    }
  }

  #[tokio::test]
  async fn orphan_cleanup_never_touches_active_apps() {
    let engine = FakeEngine::default();
    for (app_id, subdomain) in
      [("7", "zone-cleaner-7"), ("999", "dead-app-999")]
    {
      let args = args(app_id, subdomain);
      engine.images.insert(args.image.clone(), ());
      engine.start_container(&args).await.unwrap();
    }

    let removed =
      cleanup_orphans(&engine, &["7".to_string()]).await.unwrap();

    assert_eq!(removed, ["app-dead-app-999"]);
    assert!(engine.containers.contains_key("app-zone-cleaner-7"));
    assert!(!engine.containers.contains_key("app-dead-app-999"));

    // idempotent: a second pass finds nothing
    let removed =
      cleanup_orphans(&engine, &["7".to_string()]).await.unwrap();
    assert!(removed.is_empty());
  }

  #[tokio::test]
  async fn start_container_replaces_existing_name() {
    let engine = FakeEngine::default();
    let args = args("7", "zone-cleaner-7");
    engine.images.insert(args.image.clone(), ());
    let first = engine.start_container(&args).await.unwrap();
    let second = engine.start_container(&args).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(engine.containers.len(), 1);
    assert_eq!(
      engine
        .containers
        .get("app-zone-cleaner-7")
        .unwrap()
        .id,
      second
    );
  }

  #[test]
  fn daemon_down_stderr_classifies_as_transport() {
    let log = openstream_client::entities::update::Log::error(
      "Docker Run",
      String::from(
        "Cannot connect to the Docker daemon at unix:///var/run/docker.sock",
      ),
    );
    let err = classify_cli_failure("docker run", &log);
    assert!(err.transient());

    let log = openstream_client::entities::update::Log::error(
      "Docker Run",
      String::from("No such image: app-x:1"),
    );
    let err = classify_cli_failure("docker run", &log);
    assert!(!err.transient());
  }
}
