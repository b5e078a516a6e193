use std::sync::Arc;

use async_trait::async_trait;
use openstream_client::entities::{
  deployment::{Deployment, DeploymentStatus, truncate_build_log},
  openstream_timestamp,
  update::Log,
};
use tokio_util::sync::CancellationToken;

use crate::{state::CoreState, tasks::ProgressHandle};

pub mod build;
pub mod deploy;
pub mod stop;

/// One unit of a pipeline. `run` must check its observable
/// precondition first so a pipeline can be re-run from any point;
/// `cleanup` fires on every exit path, in reverse order, for each
/// step whose `run` was entered.
#[async_trait]
pub trait Step<Cx: Send + Sync>: Send + Sync {
  fn name(&self) -> &'static str;
  async fn run(&self, cx: &mut Cx) -> anyhow::Result<()>;
  async fn cleanup(&self, _cx: &mut Cx, _failed: bool) {}
}

pub enum PipelineError {
  Cancelled,
  Failed(anyhow::Error),
}

/// How a task ended, with the stage logs collected along the way
/// (used for the deployment history on failure).
pub enum TaskOutcome {
  Complete,
  Cancelled,
  Failed {
    error: anyhow::Error,
    logs: Vec<Log>,
  },
}

/// The interpreter: runs steps in order with a cancellation check
/// and a coarse progress update between each, then unwinds cleanup
/// over every entered step regardless of how the run ended.
pub async fn run_pipeline<Cx: Send + Sync>(
  pipeline: &str,
  steps: &[Box<dyn Step<Cx>>],
  cx: &mut Cx,
  token: &CancellationToken,
  progress: &ProgressHandle,
) -> Result<(), PipelineError> {
  let total = steps.len() as u64;
  let mut entered = 0;
  let mut result = Ok(());

  for (i, step) in steps.iter().enumerate() {
    if token.is_cancelled() {
      result = Err(PipelineError::Cancelled);
      break;
    }
    progress.update(i as u64, total, step.name()).await;
    entered = i + 1;
    if let Err(error) = step.run(cx).await {
      result = if token.is_cancelled() {
        // a canceled blocking call surfaces as an error; the token
        // tells the two apart
        Err(PipelineError::Cancelled)
      } else {
        Err(PipelineError::Failed(
          error.context(step.name().to_string()),
        ))
      };
      break;
    }
  }

  let failed = result.is_err();
  for step in steps[..entered].iter().rev() {
    step.cleanup(cx, failed).await;
  }

  if result.is_ok() {
    progress.update(total, total, format!("{pipeline} complete")).await;
  }

  result
}

/// Failure path of the deployment history: any terminal build or
/// deploy failure leaves a `failed` row with the truncated log.
pub async fn record_failed_deployment(
  state: &Arc<CoreState>,
  app_id: &str,
  mut logs: Vec<Log>,
  error_message: &str,
) {
  truncate_build_log(&mut logs);
  let deployment = Deployment {
    app_id: app_id.to_string(),
    status: DeploymentStatus::Failed,
    build_log: logs,
    error_message: error_message.to_string(),
    deployed_at: openstream_timestamp(),
    ..Default::default()
  };
  if let Err(e) = state.store.create_deployment(deployment).await {
    warn!(
      "failed to record failed deployment for app {app_id} | {e:#}"
    );
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
  };

  use openstream_client::entities::{
    app::AppStatus,
    deployment::DeploymentStatus,
    docker::LABEL_SUBDOMAIN,
    task::{TaskKind, TaskParams, TaskState},
  };

  use crate::{
    reconcile,
    tasks::TaskEngine,
    testing::{
      FakeEngine, init_git_fixture, seed_app, seed_app_with_url,
      temp_dir, test_config, test_state, wait_for_task,
    },
  };

  #[tokio::test]
  async fn deploy_pipeline_starts_labeled_container_and_fragment() {
    let engine = Arc::new(FakeEngine::default());
    let (state, tmp) = test_state(engine.clone(), None).await;
    let tasks = TaskEngine::spawn(state.clone());

    let app = seed_app(&state, "Zone Cleaner").await;
    assert_eq!(app.subdomain, "zone-cleaner-1");
    let tag = String::from("app-zone-cleaner-1:abcdef123456");
    engine.images.insert(tag.clone(), ());
    state
      .store
      .mutate_app(
        &app.id,
        Box::new(move |app| app.image_tag = Some(tag)),
      )
      .await
      .unwrap();

    let task = tasks
      .enqueue(TaskKind::Deploy, &app.id, TaskParams::default())
      .await
      .unwrap();
    let task = wait_for_task(&state.store, &task.id).await;
    assert_eq!(task.state, TaskState::Success);

    let app = state.store.get_app(&app.id).await.unwrap();
    assert_eq!(app.status, AppStatus::Running);
    assert!(app.container_id.is_some());
    assert!(app.last_deployed_at.is_some());

    let container =
      engine.containers.get("app-zone-cleaner-1").unwrap();
    assert!(container.running);
    assert!(container.args.labels.iter().any(|(key, value)| {
      key == LABEL_SUBDOMAIN && value == "zone-cleaner-1"
    }));

    let fragment = state
      .proxy
      .read("zone-cleaner-1")
      .await
      .expect("fragment written");
    assert!(
      fragment
        .contains("proxy_pass http://app-zone-cleaner-1:8501/;")
    );

    let observed =
      reconcile::app_actual_status(&state, &app).await;
    assert_eq!(
      observed.actual_status,
      openstream_client::entities::app::ActualStatus::Running
    );

    let _ = tokio::fs::remove_dir_all(&tmp).await;
  }

  #[tokio::test]
  async fn build_chains_into_deploy_end_to_end() {
    let repo = temp_dir("openstream-repo");
    if !init_git_fixture(&repo).await {
      // no git binary around, nothing to exercise
      return;
    }
    let engine = Arc::new(FakeEngine::default());
    let (state, tmp) = test_state(engine.clone(), None).await;
    let tasks = TaskEngine::spawn(state.clone());

    let app = seed_app_with_url(
      &state,
      "Zone Cleaner",
      repo.to_str().unwrap(),
    )
    .await;

    let task = tasks
      .enqueue(TaskKind::Build, &app.id, TaskParams::default())
      .await
      .unwrap();
    let task = wait_for_task(&state.store, &task.id).await;
    assert_eq!(task.state, TaskState::Success, "{}", task.error_message);

    let app = state.store.get_app(&app.id).await.unwrap();
    assert_eq!(app.status, AppStatus::Running);
    let image_tag = app.image_tag.clone().unwrap();
    assert!(image_tag.starts_with("app-zone-cleaner-1:"));
    assert!(engine.images.contains_key(&image_tag));
    assert!(engine.containers.contains_key("app-zone-cleaner-1"));

    let deployment = state
      .store
      .latest_deployment(&app.id)
      .await
      .unwrap()
      .expect("deployment recorded");
    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert_eq!(deployment.commit_hash.len(), 40);
    assert_eq!(deployment.base_variant, "minimal");
    assert!(!deployment.build_log.is_empty());

    // the task workspace is gone in every outcome
    assert!(
      !state.config.workspace_root.join(&task.id).exists()
    );

    let _ = tokio::fs::remove_dir_all(&tmp).await;
    let _ = tokio::fs::remove_dir_all(&repo).await;
  }

  #[tokio::test]
  async fn deploy_rolls_back_when_proxy_reload_is_invalid() {
    let engine = Arc::new(FakeEngine::default());
    let tmp = temp_dir("openstream-test");
    let mut config = test_config(&tmp);
    config.nginx_test_command =
      "sh -c 'echo bad directive >&2; exit 1'".to_string();
    let (state, tmp) =
      test_state(engine.clone(), Some(config)).await;
    let tasks = TaskEngine::spawn(state.clone());

    let app = seed_app(&state, "Zone Cleaner").await;
    let tag = String::from("app-zone-cleaner-1:abcdef123456");
    engine.images.insert(tag.clone(), ());
    state
      .store
      .mutate_app(
        &app.id,
        Box::new(move |app| app.image_tag = Some(tag)),
      )
      .await
      .unwrap();

    let task = tasks
      .enqueue(TaskKind::Deploy, &app.id, TaskParams::default())
      .await
      .unwrap();
    let task = wait_for_task(&state.store, &task.id).await;
    assert_eq!(task.state, TaskState::Failure);
    assert!(task.error_message.contains("proxy reload invalid"));

    let app = state.store.get_app(&app.id).await.unwrap();
    assert_eq!(app.status, AppStatus::Error);
    // the new container is rolled back and the fragment removed
    assert!(!engine.containers.contains_key("app-zone-cleaner-1"));
    assert!(state.proxy.read("zone-cleaner-1").await.is_none());

    let deployment = state
      .store
      .latest_deployment(&app.id)
      .await
      .unwrap()
      .expect("failed deployment recorded");
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert!(
      deployment.error_message.contains("proxy reload invalid")
    );

    let _ = tokio::fs::remove_dir_all(&tmp).await;
  }

  #[tokio::test]
  async fn cancel_mid_build_revokes_and_cleans_up() {
    let repo = temp_dir("openstream-repo");
    if !init_git_fixture(&repo).await {
      return;
    }
    let engine = Arc::new(FakeEngine {
      build_delay: Duration::from_secs(10),
      ..Default::default()
    });
    let (state, tmp) = test_state(engine.clone(), None).await;
    let tasks = TaskEngine::spawn(state.clone());

    let app = seed_app_with_url(
      &state,
      "Zone Cleaner",
      repo.to_str().unwrap(),
    )
    .await;

    let task = tasks
      .enqueue(TaskKind::Build, &app.id, TaskParams::default())
      .await
      .unwrap();

    // let the pipeline reach the image build, then pull the plug
    for _ in 0..600 {
      if engine.build_started.load(Ordering::SeqCst) {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(engine.build_started.load(Ordering::SeqCst));
    tasks.cancel(&app.id, TaskKind::Build).await.unwrap();

    let task = wait_for_task(&state.store, &task.id).await;
    assert_eq!(task.state, TaskState::Revoked);

    let app = state.store.get_app(&app.id).await.unwrap();
    // back to where it started
    assert_eq!(app.status, AppStatus::Stopped);
    // partial image removed, workspace gone, no success row
    assert!(engine.images.is_empty());
    assert!(
      !state.config.workspace_root.join(&task.id).exists()
    );
    assert!(
      state
        .store
        .latest_deployment(&app.id)
        .await
        .unwrap()
        .is_none()
    );

    let _ = tokio::fs::remove_dir_all(&tmp).await;
    let _ = tokio::fs::remove_dir_all(&repo).await;
  }

  #[tokio::test]
  async fn second_build_enqueue_conflicts_while_first_runs() {
    let repo = temp_dir("openstream-repo");
    if !init_git_fixture(&repo).await {
      return;
    }
    let engine = Arc::new(FakeEngine {
      build_delay: Duration::from_secs(3),
      ..Default::default()
    });
    let (state, tmp) = test_state(engine.clone(), None).await;
    let tasks = TaskEngine::spawn(state.clone());

    let app = seed_app_with_url(
      &state,
      "Zone Cleaner",
      repo.to_str().unwrap(),
    )
    .await;

    let first = tasks
      .enqueue(TaskKind::Build, &app.id, TaskParams::default())
      .await
      .unwrap();
    let err = tasks
      .enqueue(TaskKind::Build, &app.id, TaskParams::default())
      .await
      .unwrap_err();
    assert!(err.to_string().contains("already in progress"));

    // the first task is unaffected by the rejected request
    let first = wait_for_task(&state.store, &first.id).await;
    assert_eq!(first.state, TaskState::Success);

    let _ = tokio::fs::remove_dir_all(&tmp).await;
    let _ = tokio::fs::remove_dir_all(&repo).await;
  }

  #[tokio::test]
  async fn stop_twice_is_idempotent() {
    let engine = Arc::new(FakeEngine::default());
    let (state, tmp) = test_state(engine.clone(), None).await;
    let tasks = TaskEngine::spawn(state.clone());

    let app = seed_app(&state, "Zone Cleaner").await;
    let tag = String::from("app-zone-cleaner-1:abcdef123456");
    engine.images.insert(tag.clone(), ());
    state
      .store
      .mutate_app(
        &app.id,
        Box::new(move |app| app.image_tag = Some(tag)),
      )
      .await
      .unwrap();
    let deploy = tasks
      .enqueue(TaskKind::Deploy, &app.id, TaskParams::default())
      .await
      .unwrap();
    wait_for_task(&state.store, &deploy.id).await;

    for _ in 0..2 {
      let stop = tasks
        .enqueue(TaskKind::Stop, &app.id, TaskParams::default())
        .await
        .unwrap();
      let stop = wait_for_task(&state.store, &stop.id).await;
      assert_eq!(stop.state, TaskState::Success);
    }

    let app = state.store.get_app(&app.id).await.unwrap();
    assert_eq!(app.status, AppStatus::Stopped);
    assert!(app.container_id.is_none());
    assert!(!engine.containers.contains_key("app-zone-cleaner-1"));
    assert!(state.proxy.read("zone-cleaner-1").await.is_none());

    let _ = tokio::fs::remove_dir_all(&tmp).await;
  }
}
