use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use async_trait::async_trait;
use openstream_client::entities::{
  app::{App, AppStatus},
  docker::{
    LABEL_APP_ID, LABEL_APP_NAME, LABEL_IMAGE, LABEL_OWNED,
    LABEL_SUBDOMAIN, StartContainerArgs,
  },
  openstream_timestamp,
  task::Task,
  update::Log,
};
use tokio_util::sync::CancellationToken;

use super::{PipelineError, Step, TaskOutcome, run_pipeline};
use crate::{state::CoreState, tasks::ProgressHandle};

/// Seconds between container health probes.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Graceful stop window for the container being replaced.
const REPLACE_STOP_TIMEOUT: u64 = 10;

pub struct DeployCx {
  state: Arc<CoreState>,
  app: App,
  token: CancellationToken,
  /// Backed up fragment contents, restored on rollback.
  previous_fragment: Option<String>,
  /// Image of the container being replaced, for rollback.
  previous_image: Option<String>,
  new_container_id: String,
  finalized: bool,
  pub logs: Vec<Log>,
}

/// The container run arguments for an app, including the discovery
/// label set.
pub fn container_args(app: &App, network: &str) -> StartContainerArgs {
  StartContainerArgs {
    image: app.image_tag.clone().unwrap_or_default(),
    name: app.container_name(),
    labels: vec![
      (LABEL_OWNED.to_string(), "true".to_string()),
      (LABEL_APP_ID.to_string(), app.id.clone()),
      (LABEL_APP_NAME.to_string(), app.name.clone()),
      (LABEL_SUBDOMAIN.to_string(), app.subdomain.clone()),
      (
        LABEL_IMAGE.to_string(),
        app.image_tag.clone().unwrap_or_default(),
      ),
    ],
    env: app.env_vars.clone(),
    network: network.to_string(),
    restart: Default::default(),
  }
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
  let mut cx = DeployCx {
    state: state.clone(),
    app,
    token: token.clone(),
    previous_fragment: None,
    previous_image: None,
    new_container_id: String::new(),
    finalized: false,
    logs: Vec::new(),
  };

  let steps: Vec<Box<dyn Step<DeployCx>>> = vec![
    Box::new(SetDeploying),
    Box::new(ReplaceContainer),
    Box::new(WaitHealthy),
    Box::new(WriteFragment),
    Box::new(Finalize),
  ];

  match run_pipeline("deploy", &steps, &mut cx, token, progress)
    .await
  {
    Ok(()) => TaskOutcome::Complete,
    Err(PipelineError::Cancelled) => TaskOutcome::Cancelled,
    Err(PipelineError::Failed(error)) => TaskOutcome::Failed {
      error,
      logs: cx.logs,
    },
  }
}

struct SetDeploying;

#[async_trait]
impl Step<DeployCx> for SetDeploying {
  fn name(&self) -> &'static str {
    "Set Deploying"
  }

  async fn run(&self, cx: &mut DeployCx) -> anyhow::Result<()> {
    if cx.app.image_tag.as_deref().unwrap_or_default().is_empty() {
      return Err(anyhow!(
        "no image has been built for app {}",
        cx.app.id
      ));
    }
    cx.app = cx
      .state
      .store
      .mutate_app(
        &cx.app.id,
        Box::new(|app| app.status = AppStatus::Deploying),
      )
      .await
      .map_err(anyhow::Error::from)?;
    Ok(())
  }
}

struct ReplaceContainer;

#[async_trait]
impl Step<DeployCx> for ReplaceContainer {
  fn name(&self) -> &'static str {
    "Replace Container"
  }

  async fn run(&self, cx: &mut DeployCx) -> anyhow::Result<()> {
    let name = cx.app.container_name();

    // remember what is being replaced, for rollback
    if let Ok(Some(existing)) =
      cx.state.engine.inspect_container(&name).await
    {
      cx.previous_image =
        existing.labels.get(LABEL_IMAGE).cloned();
      cx.state
        .engine
        .stop_container(&name, REPLACE_STOP_TIMEOUT)
        .await
        .map_err(anyhow::Error::from)?;
    }

    let args =
      container_args(&cx.app, &cx.state.config.network_name);
    let container_id = cx
      .state
      .engine
      .start_container(&args)
      .await
      .map_err(|e| {
        anyhow::Error::new(e).context("failed to start container")
      })?;
    cx.logs.push(Log::simple(
      "Start Container",
      format!("started container {name} ({container_id})"),
    ));
    cx.new_container_id = container_id;
    Ok(())
  }

  async fn cleanup(&self, cx: &mut DeployCx, failed: bool) {
    if !failed || cx.finalized {
      return;
    }
    let name = cx.app.container_name();
    if let Err(e) = cx.state.engine.remove_container(&name).await {
      warn!("rollback: failed to remove container {name} | {e:#}");
    }
    // bring the previous release back when there was one
    if let Some(previous_image) = cx.previous_image.clone() {
      let mut args =
        container_args(&cx.app, &cx.state.config.network_name);
      args.image = previous_image.clone();
      args.labels.retain(|(key, _)| key != LABEL_IMAGE);
      args
        .labels
        .push((LABEL_IMAGE.to_string(), previous_image));
      match cx.state.engine.start_container(&args).await {
        Ok(id) => {
          info!(
            "rollback: restored previous container for app {}",
            cx.app.id
          );
          cx.logs.push(Log::simple(
            "Rollback",
            format!("restored previous container ({id})"),
          ));
        }
        Err(e) => warn!(
          "rollback: failed to restore previous container for app {} | {e:#}",
          cx.app.id
        ),
      }
    }
  }
}

struct WaitHealthy;

#[async_trait]
impl Step<DeployCx> for WaitHealthy {
  fn name(&self) -> &'static str {
    "Wait Healthy"
  }

  async fn run(&self, cx: &mut DeployCx) -> anyhow::Result<()> {
    let name = cx.app.container_name();
    let deadline = tokio::time::Instant::now()
      + Duration::from_secs(
        cx.state.config.deploy_startup_timeout,
      );
    loop {
      if cx.token.is_cancelled() {
        return Err(anyhow!("canceled while waiting for health"));
      }
      match cx
        .state
        .engine
        .inspect_container(&name)
        .await
        .map_err(anyhow::Error::from)?
      {
        Some(inspect) if inspect.healthy() => {
          cx.logs.push(Log::simple(
            "Wait Healthy",
            format!("container {name} is healthy"),
          ));
          return Ok(());
        }
        Some(inspect)
          if !inspect.running && inspect.exit_code.is_some() =>
        {
          return Err(anyhow!(
            "container exited with code {}",
            inspect.exit_code.unwrap_or_default()
          ));
        }
        _ => {}
      }
      if tokio::time::Instant::now() >= deadline {
        return Err(anyhow!(
          "container failed to become healthy within {}s",
          cx.state.config.deploy_startup_timeout
        ));
      }
      tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
    }
  }
}

struct WriteFragment;

#[async_trait]
impl Step<DeployCx> for WriteFragment {
  fn name(&self) -> &'static str {
    "Write Proxy Fragment"
  }

  async fn run(&self, cx: &mut DeployCx) -> anyhow::Result<()> {
    cx.previous_fragment =
      cx.state.proxy.read(&cx.app.subdomain).await;
    let status = cx
      .state
      .proxy
      .write(&cx.app)
      .await
      .map_err(anyhow::Error::from)?;
    if !status.valid {
      return Err(anyhow!(
        "proxy reload invalid | {}",
        status.errors.join(" | ")
      ));
    }
    cx.logs.push(Log::simple(
      "Write Proxy Fragment",
      format!("fragment {}.conf reloaded", cx.app.subdomain),
    ));
    Ok(())
  }

  async fn cleanup(&self, cx: &mut DeployCx, failed: bool) {
    if !failed || cx.finalized {
      return;
    }
    let result = match cx.previous_fragment.clone() {
      Some(contents) => {
        cx.state
          .proxy
          .restore(&cx.app.subdomain, &contents)
          .await
      }
      None => cx.state.proxy.remove(&cx.app.subdomain).await,
    };
    if let Err(e) = result {
      warn!(
        "rollback: failed to restore fragment for {} | {e:#}",
        cx.app.subdomain
      );
    }
  }
}

struct Finalize;

#[async_trait]
impl Step<DeployCx> for Finalize {
  fn name(&self) -> &'static str {
    "Finalize"
  }

  async fn run(&self, cx: &mut DeployCx) -> anyhow::Result<()> {
    let container_id = cx.new_container_id.clone();
    cx.app = cx
      .state
      .store
      .mutate_app(
        &cx.app.id,
        Box::new(move |app| {
          app.container_id = Some(container_id);
          app.last_deployed_at = Some(openstream_timestamp());
          app.status = AppStatus::Running;
        }),
      )
      .await
      .map_err(anyhow::Error::from)?;
    cx.finalized = true;
    Ok(())
  }
}
