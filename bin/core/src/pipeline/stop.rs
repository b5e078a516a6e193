use std::sync::Arc;

use async_trait::async_trait;
use openstream_client::entities::{
  app::{App, AppStatus},
  task::Task,
  update::Log,
};
use tokio_util::sync::CancellationToken;

use super::{PipelineError, Step, TaskOutcome, run_pipeline};
use crate::{state::CoreState, tasks::ProgressHandle};

const STOP_TIMEOUT: u64 = 10;

pub struct StopCx {
  state: Arc<CoreState>,
  app: App,
  pub logs: Vec<Log>,
}

pub async fn run(
  state: &Arc<CoreState>,
  task: &Task,
  progress: &ProgressHandle,
  token: &CancellationToken,
) -> TaskOutcome {
  let app = match state.store.get_app(&task.app_id).await {
    Ok(app) => app,
    Err(e) => {
      return TaskOutcome::Failed {
        error: anyhow::Error::from(e),
        logs: Vec::new(),
      };
    }
  };
  let mut cx = StopCx {
    state: state.clone(),
    app,
    logs: Vec::new(),
  };

  let steps: Vec<Box<dyn Step<StopCx>>> = vec![
    Box::new(SetStopping),
    Box::new(RemoveFragment),
    Box::new(RemoveContainer),
    Box::new(Finalize),
  ];

  match run_pipeline("stop", &steps, &mut cx, token, progress).await
  {
    Ok(()) => TaskOutcome::Complete,
    Err(PipelineError::Cancelled) => TaskOutcome::Cancelled,
    Err(PipelineError::Failed(error)) => TaskOutcome::Failed {
      error,
      logs: cx.logs,
    },
  }
}

struct SetStopping;

#[async_trait]
impl Step<StopCx> for SetStopping {
  fn name(&self) -> &'static str {
    "Set Stopping"
  }

  async fn run(&self, cx: &mut StopCx) -> anyhow::Result<()> {
    cx.app = cx
      .state
      .store
      .mutate_app(
        &cx.app.id,
        Box::new(|app| app.status = AppStatus::Stopping),
      )
      .await
      .map_err(anyhow::Error::from)?;
    Ok(())
  }
}

struct RemoveFragment;

#[async_trait]
impl Step<StopCx> for RemoveFragment {
  fn name(&self) -> &'static str {
    "Remove Proxy Fragment"
  }

  async fn run(&self, cx: &mut StopCx) -> anyhow::Result<()> {
    let status = cx
      .state
      .proxy
      .remove(&cx.app.subdomain)
      .await
      .map_err(anyhow::Error::from)?;
    if !status.valid {
      // the fragment is gone either way, a stop should not fail on
      // an unrelated proxy config problem
      warn!(
        "proxy reload reported invalid while stopping {} | {}",
        cx.app.subdomain,
        status.errors.join(" | ")
      );
    }
    cx.logs.push(Log::simple(
      "Remove Proxy Fragment",
      format!("fragment {}.conf removed", cx.app.subdomain),
    ));
    Ok(())
  }
}

struct RemoveContainer;

#[async_trait]
impl Step<StopCx> for RemoveContainer {
  fn name(&self) -> &'static str {
    "Remove Container"
  }

  async fn run(&self, cx: &mut StopCx) -> anyhow::Result<()> {
    let name = cx.app.container_name();
    cx.state
      .engine
      .stop_container(&name, STOP_TIMEOUT)
      .await
      .map_err(anyhow::Error::from)?;
    cx.state
      .engine
      .remove_container(&name)
      .await
      .map_err(anyhow::Error::from)?;
    cx.logs.push(Log::simple(
      "Remove Container",
      format!("container {name} stopped and removed"),
    ));
    Ok(())
  }
}

struct Finalize;

#[async_trait]
impl Step<StopCx> for Finalize {
  fn name(&self) -> &'static str {
    "Finalize"
  }

  async fn run(&self, cx: &mut StopCx) -> anyhow::Result<()> {
    cx.app = cx
      .state
      .store
      .mutate_app(
        &cx.app.id,
        Box::new(|app| {
          app.container_id = None;
          app.status = AppStatus::Stopped;
        }),
      )
      .await
      .map_err(anyhow::Error::from)?;
    Ok(())
  }
}
