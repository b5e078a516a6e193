//! Shared fixtures for the unit tests: an in-memory container
//! engine behind the [ContainerEngine] seam, plus state / app
//! builders over the in-memory catalog.

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use async_trait::async_trait;
use command::run_openstream_command;
use dashmap::DashMap;
use openstream_client::entities::{
  app::{App, AppStatus, derive_subdomain},
  config::CoreConfig,
  docker::{
    ContainerInspect, ContainerStateStatus, ContainerSummary,
    LABEL_OWNED, StartContainerArgs,
  },
  openstream_timestamp,
  task::Task,
  update::Log,
};
use tokio::sync::mpsc;

use crate::{
  docker::{ContainerEngine, EngineError, ImageBuildArgs},
  dockerfile::{BaseDockerfiles, BaseVariant},
  proxy::NginxManager,
  state::CoreState,
  store::{CatalogStore, MemoryStore},
};

pub struct FakeContainer {
  pub id: String,
  pub args: StartContainerArgs,
  pub running: bool,
}

/// In-memory engine: containers and images are map entries, builds
/// emit canned lines and can be slowed down to test cancellation.
#[derive(Default)]
pub struct FakeEngine {
  pub containers: DashMap<String, FakeContainer>,
  pub images: DashMap<String, ()>,
  pub networks: DashMap<String, ()>,
  pub build_delay: Duration,
  pub build_started: AtomicBool,
  pub fail_build: bool,
  pub fail_start: bool,
}

#[async_trait]
impl ContainerEngine for FakeEngine {
  async fn ping(&self) -> bool {
    true
  }

  async fn build_image(
    &self,
    args: &ImageBuildArgs,
    on_line: mpsc::UnboundedSender<String>,
  ) -> Result<Log, EngineError> {
    self.build_started.store(true, Ordering::SeqCst);
    // partial layers exist as soon as the build starts
    self.images.insert(args.tag.clone(), ());
    for line in ["Step 1/5 : FROM base", "Step 5/5 : ENTRYPOINT"] {
      let _ = on_line.send(line.to_string());
    }
    tokio::time::sleep(self.build_delay).await;
    if self.fail_build {
      self.images.remove(&args.tag);
      return Ok(Log::error(
        "Docker Build",
        String::from("process \"pip install\" exited with code 1"),
      ));
    }
    Ok(Log::simple(
      "Docker Build",
      format!("Successfully tagged {}", args.tag),
    ))
  }

  async fn start_container(
    &self,
    args: &StartContainerArgs,
  ) -> Result<String, EngineError> {
    if self.fail_start {
      return Err(EngineError::Command(String::from(
        "docker run failed | simulated",
      )));
    }
    if !self.images.contains_key(&args.image) {
      return Err(EngineError::Command(format!(
        "docker run failed | No such image: {}",
        args.image
      )));
    }
    self.containers.remove(&args.name);
    let id = uuid::Uuid::new_v4().to_string();
    self.containers.insert(
      args.name.clone(),
      FakeContainer {
        id: id.clone(),
        args: args.clone(),
        running: true,
      },
    );
    Ok(id)
  }

  async fn stop_container(
    &self,
    name: &str,
    _timeout_seconds: u64,
  ) -> Result<(), EngineError> {
    if let Some(mut container) = self.containers.get_mut(name) {
      container.running = false;
    }
    Ok(())
  }

  async fn remove_container(
    &self,
    name: &str,
  ) -> Result<(), EngineError> {
    self.containers.remove(name);
    Ok(())
  }

  async fn remove_image(
    &self,
    tag: &str,
  ) -> Result<(), EngineError> {
    self.images.remove(tag);
    Ok(())
  }

  async fn inspect_container(
    &self,
    name: &str,
  ) -> Result<Option<ContainerInspect>, EngineError> {
    Ok(self.containers.get(name).map(|container| {
      ContainerInspect {
        id: Some(container.id.clone()),
        running: container.running,
        started_at: None,
        exit_code: (!container.running).then_some(0),
        health: Default::default(),
        networks: vec![container.args.network.clone()],
        labels: container
          .args
          .labels
          .iter()
          .cloned()
          .collect(),
      }
    }))
  }

  async fn container_logs(
    &self,
    name: &str,
    _tail: u64,
  ) -> Result<String, EngineError> {
    Ok(format!("logs for {name}"))
  }

  async fn list_app_containers(
    &self,
  ) -> Result<Vec<ContainerSummary>, EngineError> {
    Ok(
      self
        .containers
        .iter()
        .filter(|container| {
          container
            .args
            .labels
            .iter()
            .any(|(key, value)| {
              key == LABEL_OWNED && value == "true"
            })
        })
        .map(|container| ContainerSummary {
          id: Some(container.id.clone()),
          name: container.args.name.clone(),
          image: Some(container.args.image.clone()),
          state: if container.running {
            ContainerStateStatus::Running
          } else {
            ContainerStateStatus::Exited
          },
          status: None,
          networks: vec![container.args.network.clone()],
          labels: container.args.labels.iter().cloned().collect(),
        })
        .collect(),
    )
  }

  async fn ensure_network(
    &self,
    name: &str,
  ) -> Result<(), EngineError> {
    self.networks.insert(name.to_string(), ());
    Ok(())
  }
}

/// Unique scratch directory for one test.
pub fn temp_dir(prefix: &str) -> PathBuf {
  std::env::temp_dir()
    .join(format!("{prefix}-{}", uuid::Uuid::new_v4()))
}

pub fn test_config(tmp: &Path) -> CoreConfig {
  CoreConfig {
    base_dockerfile_dir: tmp.join("bases"),
    workspace_root: tmp.join("workspaces"),
    fragment_dir: tmp.join("fragments"),
    nginx_test_command: String::from("true"),
    nginx_reload_command: String::from("true"),
    worker_count: 2,
    ..Default::default()
  }
}

async fn write_base_fixtures(dir: &Path) {
  tokio::fs::create_dir_all(dir).await.unwrap();
  for variant in BaseVariant::all() {
    tokio::fs::write(
      dir.join(variant.file_name()),
      format!(
        "# {}\nFROM python:slim-{variant}\nWORKDIR /app\nRUN useradd --create-home appuser\nEXPOSE 8501\n",
        variant.description()
      ),
    )
    .await
    .unwrap();
  }
}

/// CoreState over the memory catalog and the given fake engine.
/// Returns the scratch dir so tests can clean it up.
pub async fn test_state(
  engine: Arc<FakeEngine>,
  config: Option<CoreConfig>,
) -> (Arc<CoreState>, PathBuf) {
  let (config, tmp) = match config {
    Some(config) => {
      let tmp = config
        .fragment_dir
        .parent()
        .map(|parent| parent.to_path_buf())
        .unwrap_or_else(|| temp_dir("openstream-test"));
      (config, tmp)
    }
    None => {
      let tmp = temp_dir("openstream-test");
      (test_config(&tmp), tmp)
    }
  };
  write_base_fixtures(&config.base_dockerfile_dir).await;
  let bases =
    BaseDockerfiles::load(&config.base_dockerfile_dir)
      .await
      .unwrap();
  let proxy = NginxManager::new(&config);
  let state = Arc::new(CoreState {
    config,
    store: Arc::new(MemoryStore::new()),
    engine,
    proxy,
    bases,
  });
  (state, tmp)
}

pub async fn seed_app(state: &Arc<CoreState>, name: &str) -> App {
  seed_app_with_url(state, name, "https://example/git/z").await
}

pub async fn seed_app_with_url(
  state: &Arc<CoreState>,
  name: &str,
  git_url: &str,
) -> App {
  let id = state.store.next_app_id().await.unwrap();
  let now = openstream_timestamp();
  let app = App {
    id: id.clone(),
    owner_id: String::from("owner-1"),
    name: name.to_string(),
    git_url: git_url.to_string(),
    branch: String::from("main"),
    entry_file: String::from("app.py"),
    subdomain: derive_subdomain(name, &id),
    status: AppStatus::Stopped,
    created_at: now,
    updated_at: now,
    ..Default::default()
  };
  state.store.create_app(app).await.unwrap()
}

/// Polls until the task reaches a terminal state.
pub async fn wait_for_task(
  store: &Arc<dyn CatalogStore>,
  task_id: &str,
) -> Task {
  for _ in 0..600 {
    let task = store.get_task(task_id).await.unwrap();
    if task.state.is_terminal() {
      return task;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
  panic!("task {task_id} never reached a terminal state");
}

/// Creates a single-commit git repo usable as a clone source.
/// Returns false when no git binary is around, so callers can skip.
pub async fn init_git_fixture(dir: &Path) -> bool {
  let probe =
    run_openstream_command("git probe", None, "git --version")
      .await;
  if !probe.success {
    return false;
  }
  tokio::fs::create_dir_all(dir).await.unwrap();
  tokio::fs::write(
    dir.join("app.py"),
    "import streamlit as st\nst.write(\"hello\")\n",
  )
  .await
  .unwrap();
  tokio::fs::write(
    dir.join("requirements.txt"),
    "streamlit==1.28.1\n",
  )
  .await
  .unwrap();
  let setup = run_openstream_command(
    "git fixture",
    dir,
    "git init -q && git checkout -q -b main \
     && git config user.email test@openstream.dev \
     && git config user.name openstream \
     && git add . && git commit -q -m init",
  )
  .await;
  setup.success
}
