use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::update::{Log, truncate_front};

/// Retained build logs are capped at this many bytes of combined
/// output per deployment.
pub const MAX_BUILD_LOG_BYTES: usize = 64 * 1024;

/// History record of one build + deploy attempt of an App.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
  pub id: String,
  pub app_id: String,
  #[serde(default)]
  pub commit_hash: String,
  #[serde(default)]
  pub status: DeploymentStatus,
  /// Possibly truncated, see [MAX_BUILD_LOG_BYTES].
  #[serde(default)]
  pub build_log: Vec<Log>,
  #[serde(default)]
  pub error_message: String,
  /// The base variant the composer selected, or the custom image.
  #[serde(default)]
  pub base_variant: String,
  /// sha256 of the rendered Dockerfile.
  #[serde(default)]
  pub dockerfile_hash: String,
  pub deployed_at: i64,
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeploymentStatus {
  #[default]
  InProgress,
  Success,
  Failed,
}

/// Caps the combined size of the logs, dropping oldest output first.
/// The tail of the last log always survives.
pub fn truncate_build_log(logs: &mut Vec<Log>) {
  let mut budget = MAX_BUILD_LOG_BYTES;
  for log in logs.iter_mut().rev() {
    let size = log.stdout.len() + log.stderr.len();
    if size <= budget {
      budget -= size;
      continue;
    }
    let stderr_budget = budget.min(log.stderr.len());
    log.stderr = truncate_front(&log.stderr, stderr_budget);
    log.stdout = truncate_front(&log.stdout, budget - stderr_budget);
    budget = 0;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn truncation_keeps_tail_of_latest_log() {
    let mut logs = vec![
      Log::simple("clone", "a".repeat(MAX_BUILD_LOG_BYTES)),
      Log::simple("build", format!("{}END", "b".repeat(100))),
    ];
    truncate_build_log(&mut logs);
    let total: usize = logs
      .iter()
      .map(|l| l.stdout.len() + l.stderr.len())
      .sum();
    assert!(total <= MAX_BUILD_LOG_BYTES);
    assert!(logs[1].stdout.ends_with("END"));
  }

  #[test]
  fn small_logs_untouched() {
    let mut logs = vec![Log::simple("build", "ok".to_string())];
    truncate_build_log(&mut logs);
    assert_eq!(logs[0].stdout, "ok");
  }
}
