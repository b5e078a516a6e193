use std::{sync::Arc, time::Duration};

use anyhow::{Context, anyhow};
use dashmap::DashMap;
use openstream_client::entities::{
  openstream_timestamp,
  task::{Task, TaskKind, TaskParams, TaskState},
};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
  pipeline::{self, TaskOutcome},
  state::CoreState,
};

mod progress;

pub use progress::ProgressHandle;

/// Transient failures re-run the whole pipeline up to this many
/// attempts before the task goes terminal.
const MAX_ATTEMPTS: u32 = 3;

/// Fixed size worker pool over a single FIFO queue. Tasks across
/// apps run concurrently up to the pool size; per app serialization
/// comes from the store's task slot compare and set.
pub struct TaskEngine {
  state: Arc<CoreState>,
  tx: mpsc::UnboundedSender<String>,
  cancels: DashMap<String, CancellationToken>,
}

impl TaskEngine {
  pub fn spawn(state: Arc<CoreState>) -> Arc<TaskEngine> {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let engine = Arc::new(TaskEngine {
      state,
      tx,
      cancels: DashMap::new(),
    });
    let rx = Arc::new(Mutex::new(rx));
    for worker in 0..engine.state.config.worker_count.max(1) {
      tokio::spawn(worker_loop(engine.clone(), rx.clone(), worker));
    }
    engine
  }

  /// Claims the app's per kind task slot (conflict if a task of
  /// this kind is already non terminal), persists the record and
  /// queues it.
  pub async fn enqueue(
    &self,
    kind: TaskKind,
    app_id: &str,
    params: TaskParams,
  ) -> anyhow::Result<Task> {
    let task_id = Uuid::new_v4().to_string();
    self
      .state
      .store
      .claim_task_slot(app_id, kind, &task_id)
      .await
      .map_err(anyhow::Error::from)?;
    let task = Task {
      id: task_id.clone(),
      kind,
      app_id: app_id.to_string(),
      state: TaskState::Pending,
      params,
      ..Default::default()
    };
    let task = self
      .state
      .store
      .create_task(task)
      .await
      .map_err(anyhow::Error::from)?;
    self.cancels.insert(task_id.clone(), CancellationToken::new());
    self
      .tx
      .send(task_id)
      .map_err(|_| anyhow!("task queue is closed"))?;
    Ok(task)
  }

  /// Revokes a pending task immediately; a running task observes
  /// the cancel flag at its next checkpoint or blocking call. The
  /// pipeline's cleanup runs either way.
  pub async fn cancel(
    &self,
    app_id: &str,
    kind: TaskKind,
  ) -> anyhow::Result<Task> {
    let app = self
      .state
      .store
      .get_app(app_id)
      .await
      .map_err(anyhow::Error::from)?;
    let task_id = app
      .task_id(kind)
      .with_context(|| {
        format!("app {app_id} has no {kind} task")
      })?
      .to_string();
    let task = self
      .state
      .store
      .get_task(&task_id)
      .await
      .map_err(anyhow::Error::from)?;
    if task.state.is_terminal() {
      return Err(anyhow!(
        "{kind} task for app {app_id} already finished"
      ));
    }
    if let Some(token) = self.cancels.get(&task_id) {
      token.cancel();
    }
    let task = self
      .state
      .store
      .mutate_task(
        &task_id,
        Box::new(|task| {
          if task.state == TaskState::Pending {
            task.state = TaskState::Revoked;
            task.finished_at = Some(openstream_timestamp());
            task.error_message =
              String::from("canceled before starting");
          }
        }),
      )
      .await
      .map_err(anyhow::Error::from)?;
    Ok(task)
  }

  fn cancel_token(&self, task_id: &str) -> CancellationToken {
    self
      .cancels
      .get(task_id)
      .map(|token| token.clone())
      .unwrap_or_default()
  }
}

async fn worker_loop(
  engine: Arc<TaskEngine>,
  rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
  worker: usize,
) {
  loop {
    let task_id = { rx.lock().await.recv().await };
    let Some(task_id) = task_id else {
      break;
    };
    if let Err(e) = run_task(&engine, &task_id).await {
      error!("worker {worker} | task {task_id} | {e:#}");
    }
    engine.cancels.remove(&task_id);
  }
}

#[instrument(skip(engine))]
async fn run_task(
  engine: &Arc<TaskEngine>,
  task_id: &str,
) -> anyhow::Result<()> {
  let state = &engine.state;
  let store = &state.store;
  let task = store
    .get_task(task_id)
    .await
    .map_err(anyhow::Error::from)?;
  if task.state.is_terminal() {
    // revoked while still queued
    return Ok(());
  }
  let token = engine.cancel_token(task_id);
  let app = store
    .get_app(&task.app_id)
    .await
    .map_err(anyhow::Error::from)?;
  let prior_status = app.status;

  store
    .mutate_task(
      task_id,
      Box::new(|task| {
        task.state = TaskState::Running;
        task.started_at = Some(openstream_timestamp());
      }),
    )
    .await
    .map_err(anyhow::Error::from)?;

  let progress = ProgressHandle::new(
    store.clone(),
    task_id.to_string(),
    token.clone(),
  );

  let mut attempt = 1;
  let outcome = loop {
    let outcome = execute_kind(state, &task, &progress, &token).await;
    match &outcome {
      TaskOutcome::Failed { error, .. }
        if attempt < MAX_ATTEMPTS
          && is_transient(error)
          && !token.is_cancelled() =>
      {
        warn!(
          "task {task_id} attempt {attempt} hit transient failure, retrying | {error:#}"
        );
        store
          .mutate_task(
            task_id,
            Box::new(|task| task.state = TaskState::Retry),
          )
          .await
          .map_err(anyhow::Error::from)?;
        tokio::time::sleep(backoff(attempt)).await;
        store
          .mutate_task(
            task_id,
            Box::new(|task| task.state = TaskState::Running),
          )
          .await
          .map_err(anyhow::Error::from)?;
        attempt += 1;
      }
      _ => break outcome,
    }
  };

  finalize(state, &task, prior_status, outcome).await
}

async fn execute_kind(
  state: &Arc<CoreState>,
  task: &Task,
  progress: &ProgressHandle,
  token: &CancellationToken,
) -> TaskOutcome {
  match task.kind {
    TaskKind::Build => {
      let outcome =
        pipeline::build::run(state, task, progress, token).await;
      if matches!(outcome, TaskOutcome::Complete)
        && !task.params.build_only
      {
        // auto chain into the deploy pipeline under the same task
        pipeline::deploy::run(state, task, progress, token).await
      } else {
        outcome
      }
    }
    TaskKind::Deploy => {
      pipeline::deploy::run(state, task, progress, token).await
    }
    TaskKind::Stop => {
      pipeline::stop::run(state, task, progress, token).await
    }
  }
}

async fn finalize(
  state: &Arc<CoreState>,
  task: &Task,
  prior_status: openstream_client::entities::app::AppStatus,
  outcome: TaskOutcome,
) -> anyhow::Result<()> {
  let store = &state.store;
  match outcome {
    TaskOutcome::Complete => {
      if task.kind == TaskKind::Build && task.params.build_only {
        // a build without deploy leaves the app as it found it
        store
          .mutate_app(
            &task.app_id,
            Box::new(move |app| app.status = prior_status),
          )
          .await
          .map_err(anyhow::Error::from)?;
      }
      store
        .mutate_task(
          &task.id,
          Box::new(|task| {
            task.state = TaskState::Success;
            task.finished_at = Some(openstream_timestamp());
          }),
        )
        .await
        .map_err(anyhow::Error::from)?;
      Ok(())
    }
    TaskOutcome::Cancelled => {
      // a canceled task leaves the app as it found it
      store
        .mutate_app(
          &task.app_id,
          Box::new(move |app| app.status = prior_status),
        )
        .await
        .map_err(anyhow::Error::from)?;
      store
        .mutate_task(
          &task.id,
          Box::new(|task| {
            task.state = TaskState::Revoked;
            task.finished_at = Some(openstream_timestamp());
            task.error_message = String::from("canceled");
          }),
        )
        .await
        .map_err(anyhow::Error::from)?;
      Ok(())
    }
    TaskOutcome::Failed { error, logs } => {
      let message = format!("{error:#}");
      store
        .mutate_app(
          &task.app_id,
          Box::new(|app| {
            app.status =
              openstream_client::entities::app::AppStatus::Error
          }),
        )
        .await
        .map_err(anyhow::Error::from)?;
      if matches!(task.kind, TaskKind::Build | TaskKind::Deploy) {
        pipeline::record_failed_deployment(
          state,
          &task.app_id,
          logs,
          &message,
        )
        .await;
      }
      let task_message = message.clone();
      store
        .mutate_task(
          &task.id,
          Box::new(move |task| {
            task.state = TaskState::Failure;
            task.finished_at = Some(openstream_timestamp());
            task.error_message = task_message;
          }),
        )
        .await
        .map_err(anyhow::Error::from)?;
      warn!("task {} failed | {message}", task.id);
      Ok(())
    }
  }
}

fn backoff(attempt: u32) -> Duration {
  Duration::from_secs(1 << (attempt - 1))
}

/// Walks the error chain for the typed component errors that mark a
/// failure as worth retrying.
fn is_transient(error: &anyhow::Error) -> bool {
  for cause in error.chain() {
    if let Some(e) = cause.downcast_ref::<git::GitError>() {
      return e.transient();
    }
    if let Some(e) =
      cause.downcast_ref::<crate::docker::EngineError>()
    {
      return e.transient();
    }
  }
  false
}
