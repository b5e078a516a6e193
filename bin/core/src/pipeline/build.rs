use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use openstream_client::entities::{
  app::App,
  deployment::{
    Deployment, DeploymentStatus, truncate_build_log,
  },
  openstream_timestamp,
  task::Task,
  update::Log,
};
use tokio_util::sync::CancellationToken;

use super::{PipelineError, Step, TaskOutcome, run_pipeline};
use crate::{
  docker::ImageBuildArgs,
  dockerfile::{self, ComposeInput, Requirements},
  state::CoreState,
  tasks::ProgressHandle,
};

/// Composed Dockerfiles get their own name inside the workspace so
/// a repo's own Dockerfile is left alone by `COPY . .`.
const DOCKERFILE_NAME: &str = "Dockerfile.openstream";

/// Image tags carry this much of the commit hash.
const SHORT_COMMIT_LEN: usize = 12;

pub struct BuildCx {
  state: Arc<CoreState>,
  app: App,
  task: Task,
  progress: ProgressHandle,
  token: CancellationToken,
  workspace: PathBuf,
  repo_dir: PathBuf,
  commit_hash: String,
  requirements: Requirements,
  variant: String,
  dockerfile_hash: String,
  image_tag: String,
  /// Once the image is recorded on the app, cleanup stops removing
  /// it on failure.
  image_recorded: bool,
  /// Set when the commit was already built and `force` is off.
  build_skipped: bool,
  pub logs: Vec<Log>,
}

pub fn image_tag(subdomain: &str, commit_hash: &str) -> String {
  let short = &commit_hash
    [..SHORT_COMMIT_LEN.min(commit_hash.len())];
  format!("app-{subdomain}:{short}")
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
  let workspace = state.config.workspace_root.join(&task.id);
  let mut cx = BuildCx {
    state: state.clone(),
    app,
    task: task.clone(),
    progress: progress.clone(),
    token: token.clone(),
    repo_dir: workspace.join("repo"),
    workspace,
    commit_hash: String::new(),
    requirements: Requirements::default(),
    variant: String::new(),
    dockerfile_hash: String::new(),
    image_tag: String::new(),
    image_recorded: false,
    build_skipped: false,
    logs: Vec::new(),
  };

  let steps: Vec<Box<dyn Step<BuildCx>>> = vec![
    Box::new(SetBuilding),
    Box::new(CloneRepo),
    Box::new(AnalyzeRequirements),
    Box::new(ComposeDockerfile),
    Box::new(BuildImage),
    Box::new(RecordDeployment),
  ];

  match run_pipeline("build", &steps, &mut cx, token, progress)
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

struct SetBuilding;

#[async_trait]
impl Step<BuildCx> for SetBuilding {
  fn name(&self) -> &'static str {
    "Set Building"
  }

  async fn run(&self, cx: &mut BuildCx) -> anyhow::Result<()> {
    cx.app = cx
      .state
      .store
      .mutate_app(
        &cx.app.id,
        Box::new(|app| {
          app.status =
            openstream_client::entities::app::AppStatus::Building
        }),
      )
      .await
      .map_err(anyhow::Error::from)?;
    Ok(())
  }
}

struct CloneRepo;

#[async_trait]
impl Step<BuildCx> for CloneRepo {
  fn name(&self) -> &'static str {
    "Clone Repo"
  }

  async fn run(&self, cx: &mut BuildCx) -> anyhow::Result<()> {
    let credential = match &cx.app.credential_id {
      Some(id) if !id.is_empty() => Some(
        cx.state
          .store
          .get_credential(id)
          .await
          .map_err(anyhow::Error::from)?,
      ),
      _ => None,
    };
    let args = git::CloneArgs {
      url: cx.app.git_url.clone(),
      branch: cx.app.branch.clone(),
      credential,
      timeout: Duration::from_secs(cx.state.config.clone_timeout),
    };
    let res = tokio::select! {
      res = git::clone_repo(&args, &cx.repo_dir) => res,
      _ = cx.token.cancelled() => {
        return Err(anyhow!("canceled during clone"));
      }
    };
    match res {
      Ok(res) => {
        cx.logs.extend(res.logs);
        cx.commit_hash = res.hash;
        Ok(())
      }
      Err(e) => {
        Err(anyhow::Error::new(e).context("failed to clone repo"))
      }
    }
  }

  async fn cleanup(&self, cx: &mut BuildCx, _failed: bool) {
    if let Err(e) = git::cleanup_workspace(&cx.workspace).await {
      warn!(
        "failed to remove workspace for task {} | {e:#}",
        cx.task.id
      );
    }
  }
}

struct AnalyzeRequirements;

#[async_trait]
impl Step<BuildCx> for AnalyzeRequirements {
  fn name(&self) -> &'static str {
    "Analyze Requirements"
  }

  async fn run(&self, cx: &mut BuildCx) -> anyhow::Result<()> {
    cx.requirements =
      dockerfile::requirements::analyze(&cx.repo_dir)
        .await
        .context("failed to analyze requirements")?;
    cx.logs.push(Log::simple(
      "Analyze Requirements",
      format!(
        "problematic: {:?} | datascience: {}",
        cx.requirements.problematic,
        cx.requirements.needs_datascience
      ),
    ));
    Ok(())
  }
}

struct ComposeDockerfile;

#[async_trait]
impl Step<BuildCx> for ComposeDockerfile {
  fn name(&self) -> &'static str {
    "Compose Dockerfile"
  }

  async fn run(&self, cx: &mut BuildCx) -> anyhow::Result<()> {
    let input = ComposeInput {
      app_id: cx.app.id.clone(),
      entry_file: cx.app.entry_file.clone(),
      base_image_choice: cx.app.base_image_choice,
      custom_base_image: cx.app.custom_base_image.clone(),
      custom_overlay: cx.app.custom_overlay.clone(),
      requirements: cx.requirements.clone(),
    };
    let composed = dockerfile::compose(&input, &cx.state.bases)?;
    tokio::fs::write(
      cx.repo_dir.join(DOCKERFILE_NAME),
      &composed.dockerfile,
    )
    .await
    .context("failed to write composed dockerfile")?;
    cx.logs.push(Log::simple(
      "Compose Dockerfile",
      format!(
        "variant: {} | sha256: {}",
        composed.variant, composed.hash
      ),
    ));
    cx.variant = composed.variant;
    cx.dockerfile_hash = composed.hash;
    Ok(())
  }
}

struct BuildImage;

#[async_trait]
impl Step<BuildCx> for BuildImage {
  fn name(&self) -> &'static str {
    "Build Image"
  }

  async fn run(&self, cx: &mut BuildCx) -> anyhow::Result<()> {
    let tag = image_tag(&cx.app.subdomain, &cx.commit_hash);
    cx.image_tag = tag.clone();

    if !cx.task.params.force
      && cx.app.image_tag.as_deref() == Some(tag.as_str())
    {
      cx.build_skipped = true;
      cx.image_recorded = true;
      cx.logs.push(Log::simple(
        "Docker Build",
        format!("image {tag} already built for this commit"),
      ));
      return Ok(());
    }

    let args = ImageBuildArgs {
      context: cx.repo_dir.clone(),
      dockerfile: DOCKERFILE_NAME.to_string(),
      tag,
      timeout: Duration::from_secs(cx.state.config.build_timeout),
    };

    let (line_tx, mut line_rx) =
      tokio::sync::mpsc::unbounded_channel::<String>();
    let progress = cx.progress.clone();
    let forwarder = tokio::spawn(async move {
      let mut lines = 0u64;
      while let Some(line) = line_rx.recv().await {
        lines += 1;
        progress.update(lines, 0, line).await;
      }
    });

    let result = tokio::select! {
      result = cx.state.engine.build_image(&args, line_tx) => result,
      _ = cx.token.cancelled() => {
        // dropping the build future kills the underlying process
        Err(crate::docker::EngineError::Command(
          String::from("build canceled"),
        ))
      }
    };
    let _ = forwarder.await;

    let log = result.map_err(|e| {
      anyhow::Error::new(e).context("image build failed")
    })?;
    let success = log.success;
    cx.logs.push(log);
    if !success {
      return Err(anyhow!("image build failed"));
    }
    Ok(())
  }

  async fn cleanup(&self, cx: &mut BuildCx, failed: bool) {
    if failed && !cx.image_recorded && !cx.image_tag.is_empty() {
      // partial images from failed or canceled builds are removed
      if let Err(e) =
        cx.state.engine.remove_image(&cx.image_tag).await
      {
        warn!(
          "failed to remove partial image {} | {e:#}",
          cx.image_tag
        );
      }
    }
  }
}

struct RecordDeployment;

#[async_trait]
impl Step<BuildCx> for RecordDeployment {
  fn name(&self) -> &'static str {
    "Record Deployment"
  }

  async fn run(&self, cx: &mut BuildCx) -> anyhow::Result<()> {
    let image_tag = cx.image_tag.clone();
    cx.app = cx
      .state
      .store
      .mutate_app(
        &cx.app.id,
        Box::new(move |app| app.image_tag = Some(image_tag)),
      )
      .await
      .map_err(anyhow::Error::from)?;
    cx.image_recorded = true;

    if cx.build_skipped {
      return Ok(());
    }

    let mut build_log = cx.logs.clone();
    truncate_build_log(&mut build_log);
    cx.state
      .store
      .create_deployment(Deployment {
        app_id: cx.app.id.clone(),
        commit_hash: cx.commit_hash.clone(),
        status: DeploymentStatus::Success,
        build_log,
        base_variant: cx.variant.clone(),
        dockerfile_hash: cx.dockerfile_hash.clone(),
        deployed_at: openstream_timestamp(),
        ..Default::default()
      })
      .await
      .map_err(anyhow::Error::from)?;
    Ok(())
  }
}
