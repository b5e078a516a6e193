use async_trait::async_trait;
use bollard::query_parameters::{
  InspectContainerOptions, ListContainersOptions,
};
use command::run_openstream_command;
use openstream_client::entities::docker::{
  ContainerInspect, ContainerStateStatus, ContainerSummary,
  HealthStatus, LABEL_OWNED, StartContainerArgs,
};
use shell_escape::escape;

use super::{
  ContainerEngine, DockerEngine, EngineError, classify_cli_failure,
  query_failure,
};

impl DockerEngine {
  pub(super) async fn list_app_containers_inner(
    &self,
  ) -> Result<Vec<ContainerSummary>, EngineError> {
    let containers = self
      .docker
      .list_containers(Some(ListContainersOptions {
        all: true,
        ..Default::default()
      }))
      .await
      .map_err(query_failure)?;
    let containers = containers
      .into_iter()
      .filter_map(|container| {
        let labels = container.labels.unwrap_or_default();
        if labels.get(LABEL_OWNED).map(String::as_str)
          != Some("true")
        {
          return None;
        }
        let name = container
          .names
          .unwrap_or_default()
          .pop()?
          .replace('/', "");
        Some(ContainerSummary {
          id: container.id,
          name,
          image: container.image,
          state: container
            .state
            .map(convert_summary_state)
            .unwrap_or_default(),
          status: container.status,
          networks: container
            .network_settings
            .and_then(|settings| {
              settings.networks.map(|networks| {
                let mut keys =
                  networks.into_keys().collect::<Vec<_>>();
                keys.sort();
                keys
              })
            })
            .unwrap_or_default(),
          labels,
        })
      })
      .collect();
    Ok(containers)
  }

  pub(super) async fn inspect_container_inner(
    &self,
    name: &str,
  ) -> Result<Option<ContainerInspect>, EngineError> {
    let container = match self
      .docker
      .inspect_container(
        name,
        InspectContainerOptions { size: false }.into(),
      )
      .await
    {
      Ok(container) => container,
      Err(bollard::errors::Error::DockerResponseServerError {
        status_code: 404,
        ..
      }) => return Ok(None),
      Err(e) => return Err(query_failure(e)),
    };
    let state = container.state;
    Ok(Some(ContainerInspect {
      id: container.id,
      running: state
        .as_ref()
        .and_then(|state| state.running)
        .unwrap_or(false),
      started_at: state
        .as_ref()
        .and_then(|state| state.started_at.clone()),
      exit_code: state.as_ref().and_then(|state| state.exit_code),
      health: state
        .as_ref()
        .and_then(|state| state.health.as_ref())
        .and_then(|health| health.status)
        .map(convert_health_status)
        .unwrap_or_default(),
      networks: container
        .network_settings
        .and_then(|settings| {
          settings.networks.map(|networks| {
            let mut keys =
              networks.into_keys().collect::<Vec<_>>();
            keys.sort();
            keys
          })
        })
        .unwrap_or_default(),
      labels: container
        .config
        .and_then(|config| config.labels)
        .unwrap_or_default(),
    }))
  }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
  async fn ping(&self) -> bool {
    self.docker.ping().await.is_ok()
  }

  async fn build_image(
    &self,
    args: &super::ImageBuildArgs,
    on_line: tokio::sync::mpsc::UnboundedSender<String>,
  ) -> Result<openstream_client::entities::update::Log, EngineError>
  {
    self.build_image_inner(args, on_line).await
  }

  async fn start_container(
    &self,
    args: &StartContainerArgs,
  ) -> Result<String, EngineError> {
    // Replace any holder of the name so the operation is idempotent.
    self.remove_container(&args.name).await?;

    let mut command = format!(
      "docker run -d --name {} --network {} --restart {}",
      args.name, args.network, args.restart
    );
    for (key, value) in &args.labels {
      command.push_str(&format!(
        " --label {}",
        escape(format!("{key}={value}").into())
      ));
    }
    for env in &args.env {
      command.push_str(&format!(
        " --env {}",
        escape(format!("{}={}", env.variable, env.value).into())
      ));
    }
    command.push(' ');
    command.push_str(&args.image);

    let log =
      run_openstream_command("Docker Run", None, command).await;
    if !log.success {
      return Err(classify_cli_failure("docker run", &log));
    }
    let container_id = log
      .stdout
      .trim()
      .lines()
      .next_back()
      .unwrap_or_default()
      .to_string();
    Ok(container_id)
  }

  async fn stop_container(
    &self,
    name: &str,
    timeout_seconds: u64,
  ) -> Result<(), EngineError> {
    let log = run_openstream_command(
      "Docker Stop",
      None,
      format!("docker stop --time {timeout_seconds} {name}"),
    )
    .await;
    if !log.success && !absent_container(&log.stderr) {
      return Err(classify_cli_failure("docker stop", &log));
    }
    Ok(())
  }

  async fn remove_container(
    &self,
    name: &str,
  ) -> Result<(), EngineError> {
    let log = run_openstream_command(
      "Docker Remove",
      None,
      format!("docker rm -f {name}"),
    )
    .await;
    if !log.success && !absent_container(&log.stderr) {
      return Err(classify_cli_failure("docker rm", &log));
    }
    Ok(())
  }

  async fn remove_image(
    &self,
    tag: &str,
  ) -> Result<(), EngineError> {
    let log = run_openstream_command(
      "Docker Remove Image",
      None,
      format!("docker rmi {tag}"),
    )
    .await;
    if !log.success
      && !log.stderr.contains("No such image")
      && !log.stderr.contains("image not known")
    {
      return Err(classify_cli_failure("docker rmi", &log));
    }
    Ok(())
  }

  async fn inspect_container(
    &self,
    name: &str,
  ) -> Result<Option<ContainerInspect>, EngineError> {
    self.inspect_container_inner(name).await
  }

  async fn container_logs(
    &self,
    name: &str,
    tail: u64,
  ) -> Result<String, EngineError> {
    let log = run_openstream_command(
      "Docker Logs",
      None,
      format!("docker logs --tail {tail} {name}"),
    )
    .await;
    if !log.success {
      return Err(classify_cli_failure("docker logs", &log));
    }
    Ok(log.combined())
  }

  async fn list_app_containers(
    &self,
  ) -> Result<Vec<ContainerSummary>, EngineError> {
    self.list_app_containers_inner().await
  }

  async fn ensure_network(
    &self,
    name: &str,
  ) -> Result<(), EngineError> {
    self.ensure_network_inner(name).await
  }
}

fn absent_container(stderr: &str) -> bool {
  stderr.contains("No such container")
    || stderr.contains("is not running")
}

fn convert_summary_state(
  state: bollard::secret::ContainerSummaryStateEnum,
) -> ContainerStateStatus {
  use bollard::secret::ContainerSummaryStateEnum::*;
  match state {
    EMPTY => ContainerStateStatus::Empty,
    CREATED => ContainerStateStatus::Created,
    RUNNING => ContainerStateStatus::Running,
    PAUSED => ContainerStateStatus::Paused,
    RESTARTING => ContainerStateStatus::Restarting,
    EXITED => ContainerStateStatus::Exited,
    REMOVING => ContainerStateStatus::Removing,
    DEAD => ContainerStateStatus::Dead,
  }
}

fn convert_health_status(
  status: bollard::secret::HealthStatusEnum,
) -> HealthStatus {
  use bollard::secret::HealthStatusEnum::*;
  match status {
    EMPTY | NONE => HealthStatus::None,
    STARTING => HealthStatus::Starting,
    HEALTHY => HealthStatus::Healthy,
    UNHEALTHY => HealthStatus::Unhealthy,
  }
}
