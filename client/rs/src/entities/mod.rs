use async_timing_util::unix_timestamp_ms;
use serde::{Deserialize, Serialize};

/// Subtypes of [App][app::App].
pub mod app;
/// [CoreConfig][config::CoreConfig] and its environment overrides.
pub mod config;
/// Subtypes of [GitCredential][credential::GitCredential].
pub mod credential;
/// Subtypes of [Deployment][deployment::Deployment].
pub mod deployment;
/// Container views and the platform label set.
pub mod docker;
/// Subtypes of [LogConfig][logger::LogConfig].
pub mod logger;
/// Proxy fragment status types.
pub mod proxy;
/// Subtypes of [Task][task::Task].
pub mod task;
/// Subtypes of [Log][update::Log].
pub mod update;

/// Unix timestamp in milliseconds.
pub fn openstream_timestamp() -> i64 {
  unix_timestamp_ms() as i64
}

#[derive(
  Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
pub struct EnvironmentVar {
  pub variable: String,
  pub value: String,
}

pub fn all_logs_success(logs: &[update::Log]) -> bool {
  for log in logs {
    if !log.success {
      return false;
    }
  }
  true
}

pub fn optional_string(string: impl Into<String>) -> Option<String> {
  let string = string.into();
  if string.is_empty() { None } else { Some(string) }
}
