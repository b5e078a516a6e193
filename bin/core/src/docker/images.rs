use std::process::Stdio;

use anyhow::Context;
use openstream_client::entities::{
  openstream_timestamp, update::Log,
};
use tokio::{
  io::{AsyncBufReadExt, BufReader},
  sync::mpsc,
};

use super::{DockerEngine, EngineError, ImageBuildArgs};

impl DockerEngine {
  /// Runs `docker build` in the context directory, forwarding every
  /// output line as it arrives. The child is killed if the future is
  /// dropped, which is how task cancellation stops a running build.
  pub(super) async fn build_image_inner(
    &self,
    args: &ImageBuildArgs,
    on_line: mpsc::UnboundedSender<String>,
  ) -> Result<Log, EngineError> {
    let start_ts = openstream_timestamp();
    let command = format!(
      "docker build -t {} -f {} .",
      args.tag, args.dockerfile
    );

    let mut child = tokio::process::Command::new("docker")
      .args(["build", "-t", &args.tag, "-f", &args.dockerfile, "."])
      .current_dir(&args.context)
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
      .context("failed to spawn docker build")?;

    let stdout = child
      .stdout
      .take()
      .context("docker build stdout not piped")?;
    let stderr = child
      .stderr
      .take()
      .context("docker build stderr not piped")?;

    let stdout_lines = on_line.clone();
    let stdout_task = tokio::spawn(async move {
      let mut lines = BufReader::new(stdout).lines();
      let mut collected = String::new();
      while let Ok(Some(line)) = lines.next_line().await {
        let _ = stdout_lines.send(line.clone());
        collected.push_str(&line);
        collected.push('\n');
      }
      collected
    });
    let stderr_task = tokio::spawn(async move {
      let mut lines = BufReader::new(stderr).lines();
      let mut collected = String::new();
      while let Ok(Some(line)) = lines.next_line().await {
        let _ = on_line.send(line.clone());
        collected.push_str(&line);
        collected.push('\n');
      }
      collected
    });

    let status =
      match tokio::time::timeout(args.timeout, child.wait()).await
      {
        Ok(status) => {
          Some(status.context("failed to wait on docker build")?)
        }
        Err(_) => {
          let _ = child.kill().await;
          None
        }
      };

    let stdout = stdout_task.await.unwrap_or_default();
    let mut stderr = stderr_task.await.unwrap_or_default();

    if status.is_none() {
      stderr.push_str(&format!(
        "\nimage build timed out after {}s",
        args.timeout.as_secs()
      ));
    }

    for marker in super::DAEMON_DOWN_MARKERS {
      if stderr.contains(marker) {
        return Err(EngineError::Transport(
          stderr.trim().to_string(),
        ));
      }
    }

    Ok(Log {
      stage: String::from("Docker Build"),
      command,
      stdout,
      stderr,
      success: status.map(|s| s.success()).unwrap_or(false),
      start_ts,
      end_ts: openstream_timestamp(),
    })
  }
}
