use anyhow::Context;
use openstream_client::{
  api::execute::{
    CancelTask, CleanupOrphans, CleanupOrphansResponse,
    EnqueuedTask, NginxCleanupAuto, NginxCleanupManual,
    NginxCleanupResponse, NginxReload, NginxRemove, RunBuild,
    RunDeploy, RunStop,
  },
  entities::{
    app::AppStatus,
    proxy::ReloadStatus,
    task::{Task, TaskKind, TaskParams},
  },
};
use resolver_api::Resolve;

use super::Args;
use crate::docker;

impl Resolve<Args> for RunBuild {
  #[instrument(name = "RunBuild", skip(args))]
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<EnqueuedTask> {
    // surface NotFound before touching the task queue
    args
      .state
      .store
      .get_app(&self.app)
      .await
      .map_err(anyhow::Error::from)?;
    let task = args
      .tasks
      .enqueue(
        TaskKind::Build,
        &self.app,
        TaskParams {
          build_only: self.build_only,
          force: self.force,
        },
      )
      .await?;
    Ok(EnqueuedTask { task_id: task.id })
  }
}

impl Resolve<Args> for RunDeploy {
  #[instrument(name = "RunDeploy", skip(args))]
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<EnqueuedTask> {
    let app = args
      .state
      .store
      .get_app(&self.app)
      .await
      .map_err(anyhow::Error::from)?;
    // no usable image yet: a build (which chains into deploy)
    // serves the request instead
    let task = if app
      .image_tag
      .as_deref()
      .unwrap_or_default()
      .is_empty()
    {
      args
        .tasks
        .enqueue(TaskKind::Build, &self.app, TaskParams::default())
        .await?
    } else {
      args
        .tasks
        .enqueue(TaskKind::Deploy, &self.app, TaskParams::default())
        .await?
    };
    Ok(EnqueuedTask { task_id: task.id })
  }
}

impl Resolve<Args> for RunStop {
  #[instrument(name = "RunStop", skip(args))]
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<EnqueuedTask> {
    args
      .state
      .store
      .get_app(&self.app)
      .await
      .map_err(anyhow::Error::from)?;
    let task = args
      .tasks
      .enqueue(TaskKind::Stop, &self.app, TaskParams::default())
      .await?;
    Ok(EnqueuedTask { task_id: task.id })
  }
}

impl Resolve<Args> for CancelTask {
  #[instrument(name = "CancelTask", skip(args))]
  async fn resolve(self, args: &Args) -> serror::Result<Task> {
    Ok(args.tasks.cancel(&self.app, self.kind).await?)
  }
}

impl Resolve<Args> for CleanupOrphans {
  #[instrument(name = "CleanupOrphans", skip(args))]
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<CleanupOrphansResponse> {
    let state = &args.state;
    let apps = state
      .store
      .list_apps()
      .await
      .map_err(anyhow::Error::from)?;
    let active_ids = apps
      .iter()
      .map(|app| app.id.clone())
      .collect::<Vec<_>>();
    let removed_containers =
      docker::cleanup_orphans(state.engine.as_ref(), &active_ids)
        .await
        .map_err(anyhow::Error::from)?;
    let active_subdomains = apps
      .into_iter()
      .map(|app| app.subdomain)
      .collect::<Vec<_>>();
    let removed_fragments = state
      .proxy
      .cleanup(&active_subdomains)
      .await
      .context("failed to clean up fragments")?;
    Ok(CleanupOrphansResponse {
      removed_containers,
      removed_fragments,
    })
  }
}

impl Resolve<Args> for NginxCleanupAuto {
  #[instrument(name = "NginxCleanupAuto", skip(args))]
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<NginxCleanupResponse> {
    let apps = args
      .state
      .store
      .list_apps()
      .await
      .map_err(anyhow::Error::from)?;
    let active = apps
      .into_iter()
      .filter(|app| app.status == AppStatus::Running)
      .map(|app| app.subdomain)
      .collect::<Vec<_>>();
    let removed = args
      .state
      .proxy
      .cleanup(&active)
      .await
      .context("failed to clean up fragments")?;
    Ok(NginxCleanupResponse { removed })
  }
}

impl Resolve<Args> for NginxCleanupManual {
  #[instrument(name = "NginxCleanupManual", skip(args))]
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<NginxCleanupResponse> {
    let removed = args
      .state
      .proxy
      .cleanup(&self.active)
      .await
      .context("failed to clean up fragments")?;
    Ok(NginxCleanupResponse { removed })
  }
}

impl Resolve<Args> for NginxRemove {
  #[instrument(name = "NginxRemove", skip(args))]
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<ReloadStatus> {
    Ok(
      args
        .state
        .proxy
        .remove(&self.subdomain)
        .await
        .context("failed to remove fragment")?,
    )
  }
}

impl Resolve<Args> for NginxReload {
  #[instrument(name = "NginxReload", skip(args))]
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<ReloadStatus> {
    Ok(
      args
        .state
        .proxy
        .reload()
        .await
        .map_err(anyhow::Error::from)?,
    )
  }
}
