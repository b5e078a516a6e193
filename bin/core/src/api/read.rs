use anyhow::Context;
use openstream_client::{
  api::read::{
    DockerRunning, DockerRunningResponse, GetApp, GetLogs,
    GetLogsResponse, GetTask, GetVersion, GetVersionResponse,
    ListApps, ListAppsResponse, ListBaseDockerfiles,
    ListBaseDockerfilesResponse, ListDeployments,
    ListDeploymentsResponse, NginxStatus, NginxStatusResponse,
    PreviewDockerfile, PreviewDockerfileResponse, RealtimeStatus,
    RealtimeStatusResponse,
  },
  entities::{
    app::{App, AppListItem},
    task::Task,
  },
};
use resolver_api::Resolve;

use super::Args;
use crate::{
  dockerfile::{self, ComposeInput, Requirements},
  reconcile,
};

impl Resolve<Args> for GetVersion {
  async fn resolve(
    self,
    _: &Args,
  ) -> serror::Result<GetVersionResponse> {
    Ok(GetVersionResponse {
      version: env!("CARGO_PKG_VERSION").to_string(),
    })
  }
}

impl Resolve<Args> for GetApp {
  #[instrument(name = "GetApp", skip(args))]
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<AppListItem> {
    let app = resolve_app(args, &self.app).await?;
    let status =
      reconcile::app_actual_status(&args.state, &app).await;
    Ok(AppListItem {
      app,
      actual_status: status.actual_status,
    })
  }
}

/// Apps resolve by id first, then by subdomain.
async fn resolve_app(
  args: &Args,
  app: &str,
) -> serror::Result<App> {
  match args.state.store.get_app(app).await {
    Ok(found) => Ok(found),
    Err(e) => Ok(
      args
        .state
        .store
        .find_app_by_subdomain(app)
        .await
        .map_err(anyhow::Error::from)?
        .ok_or(anyhow::Error::from(e))?,
    ),
  }
}

impl Resolve<Args> for ListApps {
  #[instrument(name = "ListApps", skip(args))]
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<ListAppsResponse> {
    let apps = match &self.owner {
      Some(owner) => {
        args.state.store.list_apps_by_owner(owner).await
      }
      None if self.public_only => {
        args.state.store.list_public_apps().await
      }
      None => args.state.store.list_apps().await,
    }
    .map_err(anyhow::Error::from)?;
    let mut items = Vec::with_capacity(apps.len());
    for app in apps {
      if self.public_only && !app.is_public {
        continue;
      }
      let status =
        reconcile::app_actual_status(&args.state, &app).await;
      items.push(AppListItem {
        app,
        actual_status: status.actual_status,
      });
    }
    Ok(items)
  }
}

impl Resolve<Args> for GetTask {
  async fn resolve(self, args: &Args) -> serror::Result<Task> {
    Ok(
      args
        .state
        .store
        .get_task(&self.task)
        .await
        .map_err(anyhow::Error::from)?,
    )
  }
}

impl Resolve<Args> for ListDeployments {
  #[instrument(name = "ListDeployments", skip(args))]
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<ListDeploymentsResponse> {
    let app = resolve_app(args, &self.app).await?;
    Ok(
      args
        .state
        .store
        .list_deployments(&app.id)
        .await
        .map_err(anyhow::Error::from)?,
    )
  }
}

impl Resolve<Args> for GetLogs {
  #[instrument(name = "GetLogs", skip(args))]
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<GetLogsResponse> {
    let app = resolve_app(args, &self.app).await?;
    let log = args
      .state
      .engine
      .container_logs(&app.container_name(), self.tail)
      .await
      .map_err(anyhow::Error::from)?;
    Ok(GetLogsResponse { log })
  }
}

impl Resolve<Args> for RealtimeStatus {
  #[instrument(name = "RealtimeStatus", skip(args))]
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<RealtimeStatusResponse> {
    Ok(reconcile::realtime_status(&args.state, &self.apps).await?)
  }
}

impl Resolve<Args> for ListBaseDockerfiles {
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<ListBaseDockerfilesResponse> {
    Ok(args.state.bases.list())
  }
}

impl Resolve<Args> for PreviewDockerfile {
  #[instrument(name = "PreviewDockerfile", skip(args))]
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<PreviewDockerfileResponse> {
    let requirements = self
      .requirements
      .as_deref()
      .map(dockerfile::requirements::classify_requirements_txt)
      .unwrap_or_else(Requirements::default);
    let input = ComposeInput {
      // previews are not bound to a created app
      app_id: String::from("preview"),
      entry_file: self.entry_file,
      base_image_choice: self.base_image_choice,
      custom_base_image: self.custom_base_image,
      custom_overlay: self.custom_overlay,
      requirements,
    };
    let composed = dockerfile::compose(&input, &args.state.bases)
      .context("failed to compose dockerfile")?;
    Ok(PreviewDockerfileResponse {
      dockerfile: composed.dockerfile,
      variant: composed.variant,
    })
  }
}

impl Resolve<Args> for NginxStatus {
  #[instrument(name = "NginxStatus", skip(args))]
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<NginxStatusResponse> {
    let apps = args
      .state
      .store
      .list_apps()
      .await
      .map_err(anyhow::Error::from)?;
    Ok(
      args
        .state
        .proxy
        .configs_status(&apps, args.state.engine.as_ref())
        .await,
    )
  }
}

impl Resolve<Args> for DockerRunning {
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<DockerRunningResponse> {
    Ok(DockerRunningResponse {
      running: args.state.engine.ping().await,
    })
  }
}
