use std::path::Path;

use openstream_client::entities::{
  openstream_timestamp, update::Log,
};
use run_command::{CommandOutput, async_run_command};

pub async fn run_openstream_command(
  stage: &str,
  path: impl Into<Option<&Path>>,
  command: impl AsRef<str>,
) -> Log {
  let command = if let Some(path) = path.into() {
    format!("cd {} && {}", path.display(), command.as_ref())
  } else {
    command.as_ref().to_string()
  };
  let start_ts = openstream_timestamp();
  let output = async_run_command(&command).await;
  output_into_log(stage, command, start_ts, output)
}

/// Executes the command, then replaces every `(secret, replacement)`
/// pair in the recorded command and output, so secrets never reach
/// logs or the catalog.
pub async fn run_openstream_command_redacted(
  stage: &str,
  path: impl Into<Option<&Path>>,
  command: impl AsRef<str>,
  replacers: &[(String, String)],
) -> Log {
  let mut log = run_openstream_command(stage, path, command).await;
  for (secret, replacement) in replacers {
    if secret.is_empty() {
      continue;
    }
    log.command = log.command.replace(secret, replacement);
    log.stdout = log.stdout.replace(secret, replacement);
    log.stderr = log.stderr.replace(secret, replacement);
  }
  log
}

pub fn output_into_log(
  stage: &str,
  command: String,
  start_ts: i64,
  output: CommandOutput,
) -> Log {
  let success = output.success();
  Log {
    stage: stage.to_string(),
    stdout: output.stdout,
    stderr: output.stderr,
    command,
    success,
    start_ts,
    end_ts: openstream_timestamp(),
  }
}
