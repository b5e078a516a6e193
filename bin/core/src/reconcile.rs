use std::{sync::Arc, time::Duration};

use openstream_client::entities::{
  app::{ActualStatus, App, AppRealtimeStatus, AppStatus},
  task::TaskKind,
};

use crate::state::CoreState;

/// Joins declared status, task state, container inspect and proxy
/// validation into the observed status. Read only, first matching
/// rule wins; safe to call while pipelines run.
pub async fn app_actual_status(
  state: &CoreState,
  app: &App,
) -> AppRealtimeStatus {
  // 1. a live task wins over everything
  for kind in [TaskKind::Build, TaskKind::Deploy, TaskKind::Stop] {
    let Some(task_id) = app.task_id(kind) else {
      continue;
    };
    let Ok(task) = state.store.get_task(task_id).await else {
      continue;
    };
    if task.state.is_terminal() {
      continue;
    }
    let actual_status = match kind {
      TaskKind::Build => ActualStatus::Building,
      TaskKind::Deploy => ActualStatus::Deploying,
      TaskKind::Stop => ActualStatus::Stopping,
    };
    return AppRealtimeStatus {
      app_id: app.id.clone(),
      actual_status,
      message: (!task.progress.message.is_empty())
        .then(|| task.progress.message.clone()),
    };
  }

  // 2. declared error, with the latest deployment as diagnostic
  if app.status == AppStatus::Error {
    let message = state
      .store
      .latest_deployment(&app.id)
      .await
      .ok()
      .flatten()
      .map(|deployment| deployment.error_message)
      .filter(|message| !message.is_empty());
    return AppRealtimeStatus {
      app_id: app.id.clone(),
      actual_status: ActualStatus::Error,
      message,
    };
  }

  // 3. never deployed
  if app.container_id.is_none() {
    return AppRealtimeStatus {
      app_id: app.id.clone(),
      actual_status: ActualStatus::NotDeployed,
      message: None,
    };
  }

  // 4. container state
  let inspect = state
    .engine
    .inspect_container(&app.container_name())
    .await
    .ok()
    .flatten();
  let running =
    inspect.as_ref().map(|i| i.running).unwrap_or(false);
  if !running {
    let actual_status = if app.status == AppStatus::Stopped {
      ActualStatus::Stopped
    } else {
      ActualStatus::AppError
    };
    return AppRealtimeStatus {
      app_id: app.id.clone(),
      actual_status,
      message: inspect
        .and_then(|i| i.exit_code)
        .map(|code| format!("container exited with code {code}")),
    };
  }

  // 5. container is up but the route to it is broken
  let fragment = state
    .proxy
    .validate(app, state.engine.as_ref())
    .await;
  if !fragment.healthy() {
    return AppRealtimeStatus {
      app_id: app.id.clone(),
      actual_status: ActualStatus::ProxyError,
      message: Some(fragment.issues.join(" | ")),
    };
  }

  // 6. all signals agree
  AppRealtimeStatus {
    app_id: app.id.clone(),
    actual_status: ActualStatus::Running,
    message: None,
  }
}

/// Reconciler output for the requested apps, or every app when
/// `ids` is empty.
pub async fn realtime_status(
  state: &CoreState,
  ids: &[String],
) -> anyhow::Result<Vec<AppRealtimeStatus>> {
  let apps = state
    .store
    .list_apps()
    .await
    .map_err(anyhow::Error::from)?;
  let mut statuses = Vec::new();
  for app in apps {
    if !ids.is_empty() && !ids.contains(&app.id) {
      continue;
    }
    statuses.push(app_actual_status(state, &app).await);
  }
  Ok(statuses)
}

/// Periodic drift detection. Logs only, never mutates.
pub fn spawn_reconcile_loop(state: Arc<CoreState>) {
  let interval = state.config.reconcile_interval;
  if interval == 0 {
    return;
  }
  tokio::spawn(async move {
    let mut ticker =
      tokio::time::interval(Duration::from_secs(interval));
    ticker.set_missed_tick_behavior(
      tokio::time::MissedTickBehavior::Delay,
    );
    loop {
      ticker.tick().await;
      let apps = match state.store.list_apps().await {
        Ok(apps) => apps,
        Err(e) => {
          warn!("reconcile: failed to list apps | {e:#}");
          continue;
        }
      };
      for app in apps {
        let observed = app_actual_status(&state, &app).await;
        let drifted = match observed.actual_status {
          ActualStatus::AppError | ActualStatus::ProxyError => true,
          ActualStatus::Stopped => {
            app.status == AppStatus::Running
          }
          _ => false,
        };
        if drifted {
          warn!(
            "reconcile: app {} declared {} but observed {} {}",
            app.id,
            app.status,
            observed.actual_status,
            observed.message.as_deref().unwrap_or_default()
          );
        }
      }
    }
  });
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use openstream_client::entities::{
    deployment::{Deployment, DeploymentStatus},
    openstream_timestamp,
    task::{Task, TaskKind, TaskState},
  };

  use super::*;
  use crate::{
    docker::ContainerEngine,
    pipeline::deploy::container_args,
    testing::{FakeEngine, seed_app, test_state},
  };

  #[tokio::test]
  async fn app_without_container_is_not_deployed() {
    let engine = Arc::new(FakeEngine::default());
    let (state, tmp) = test_state(engine, None).await;
    let app = seed_app(&state, "Fresh App").await;
    let observed = app_actual_status(&state, &app).await;
    assert_eq!(observed.actual_status, ActualStatus::NotDeployed);
    let _ = tokio::fs::remove_dir_all(&tmp).await;
  }

  #[tokio::test]
  async fn live_task_wins_over_everything() {
    let engine = Arc::new(FakeEngine::default());
    let (state, tmp) = test_state(engine, None).await;
    let app = seed_app(&state, "Busy App").await;
    state
      .store
      .create_task(Task {
        id: String::from("t1"),
        kind: TaskKind::Build,
        app_id: app.id.clone(),
        state: TaskState::Running,
        ..Default::default()
      })
      .await
      .unwrap();
    let app = state
      .store
      .claim_task_slot(&app.id, TaskKind::Build, "t1")
      .await
      .unwrap();
    let observed = app_actual_status(&state, &app).await;
    assert_eq!(observed.actual_status, ActualStatus::Building);
    let _ = tokio::fs::remove_dir_all(&tmp).await;
  }

  #[tokio::test]
  async fn declared_error_carries_deployment_diagnostic() {
    let engine = Arc::new(FakeEngine::default());
    let (state, tmp) = test_state(engine, None).await;
    let app = seed_app(&state, "Broken App").await;
    state
      .store
      .create_deployment(Deployment {
        app_id: app.id.clone(),
        status: DeploymentStatus::Failed,
        error_message: String::from("image build failed"),
        deployed_at: openstream_timestamp(),
        ..Default::default()
      })
      .await
      .unwrap();
    let app = state
      .store
      .mutate_app(
        &app.id,
        Box::new(|app| app.status = AppStatus::Error),
      )
      .await
      .unwrap();
    let observed = app_actual_status(&state, &app).await;
    assert_eq!(observed.actual_status, ActualStatus::Error);
    assert_eq!(
      observed.message.as_deref(),
      Some("image build failed")
    );
    let _ = tokio::fs::remove_dir_all(&tmp).await;
  }

  #[tokio::test]
  async fn missing_container_is_stopped_or_app_error() {
    let engine = Arc::new(FakeEngine::default());
    let (state, tmp) = test_state(engine, None).await;
    let app = seed_app(&state, "Gone App").await;
    let app = state
      .store
      .mutate_app(
        &app.id,
        Box::new(|app| {
          app.container_id = Some(String::from("dangling"));
          app.status = AppStatus::Stopped;
        }),
      )
      .await
      .unwrap();
    let observed = app_actual_status(&state, &app).await;
    assert_eq!(observed.actual_status, ActualStatus::Stopped);

    let app = state
      .store
      .mutate_app(
        &app.id,
        Box::new(|app| app.status = AppStatus::Running),
      )
      .await
      .unwrap();
    let observed = app_actual_status(&state, &app).await;
    assert_eq!(observed.actual_status, ActualStatus::AppError);
    let _ = tokio::fs::remove_dir_all(&tmp).await;
  }

  #[tokio::test]
  async fn running_container_without_fragment_is_proxy_error() {
    let engine = Arc::new(FakeEngine::default());
    let (state, tmp) = test_state(engine.clone(), None).await;
    let app = seed_app(&state, "Routed App").await;
    let tag = String::from("app-routed-app-1:abc");
    engine.images.insert(tag.clone(), ());
    let app = state
      .store
      .mutate_app(
        &app.id,
        Box::new(move |app| {
          app.image_tag = Some(tag);
          app.status = AppStatus::Running;
        }),
      )
      .await
      .unwrap();
    let container_id = engine
      .start_container(&container_args(
        &app,
        &state.config.network_name,
      ))
      .await
      .unwrap();
    let app = state
      .store
      .mutate_app(
        &app.id,
        Box::new(move |app| {
          app.container_id = Some(container_id)
        }),
      )
      .await
      .unwrap();

    let observed = app_actual_status(&state, &app).await;
    assert_eq!(observed.actual_status, ActualStatus::ProxyError);

    // writing the fragment settles it
    state.proxy.write(&app).await.unwrap();
    let observed = app_actual_status(&state, &app).await;
    assert_eq!(observed.actual_status, ActualStatus::Running);
    let _ = tokio::fs::remove_dir_all(&tmp).await;
  }
}
