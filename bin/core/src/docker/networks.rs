use command::run_openstream_command;

use super::{DockerEngine, EngineError, classify_cli_failure};

impl DockerEngine {
  /// Creates the shared app network when it does not exist yet.
  pub(super) async fn ensure_network_inner(
    &self,
    name: &str,
  ) -> Result<(), EngineError> {
    let log = run_openstream_command(
      "Docker Network",
      None,
      format!("docker network create {name}"),
    )
    .await;
    if log.success || log.stderr.contains("already exists") {
      Ok(())
    } else {
      Err(classify_cli_failure("docker network create", &log))
    }
  }
}
