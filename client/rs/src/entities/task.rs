use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// A queued unit of work against a single App.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub id: String,
  pub kind: TaskKind,
  pub app_id: String,
  #[serde(default)]
  pub state: TaskState,
  #[serde(default)]
  pub progress: TaskProgress,
  #[serde(default)]
  pub error_message: String,
  #[serde(default)]
  pub params: TaskParams,
  #[serde(default)]
  pub started_at: Option<i64>,
  #[serde(default)]
  pub finished_at: Option<i64>,
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskKind {
  #[default]
  Build,
  Deploy,
  Stop,
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
pub enum TaskState {
  #[default]
  Pending,
  Running,
  Success,
  Failure,
  Revoked,
  Retry,
}

impl TaskState {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      TaskState::Success | TaskState::Failure | TaskState::Revoked
    )
  }
}

/// Last observed progress of a task. `current` is monotonic within
/// a phase; a new phase may reset it to 0 with a new `total`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
  pub current: u64,
  pub total: u64,
  pub message: String,
}

/// Caller supplied knobs for an enqueued task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskParams {
  /// Skip the auto chained deploy after a successful build.
  #[serde(default)]
  pub build_only: bool,
  /// Rebuild even when a usable image already exists.
  #[serde(default)]
  pub force: bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn terminal_states() {
    assert!(!TaskState::Pending.is_terminal());
    assert!(!TaskState::Running.is_terminal());
    assert!(!TaskState::Retry.is_terminal());
    assert!(TaskState::Success.is_terminal());
    assert!(TaskState::Failure.is_terminal());
    assert!(TaskState::Revoked.is_terminal());
  }
}
