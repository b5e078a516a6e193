use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::EnvironmentVar;

/// Marks containers owned by the platform. Discovery and orphan
/// cleanup filter on this label.
pub const LABEL_OWNED: &str = "platform.owned";
pub const LABEL_APP_ID: &str = "platform.app_id";
pub const LABEL_APP_NAME: &str = "platform.app_name";
pub const LABEL_SUBDOMAIN: &str = "platform.subdomain";
pub const LABEL_IMAGE: &str = "platform.image";

/// Streamlit serves on this port inside every app container.
pub const APP_PORT: u16 = 8501;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSummary {
  #[serde(default)]
  pub id: Option<String>,
  pub name: String,
  #[serde(default)]
  pub image: Option<String>,
  #[serde(default)]
  pub state: ContainerStateStatus,
  #[serde(default)]
  pub status: Option<String>,
  #[serde(default)]
  pub networks: Vec<String>,
  #[serde(default)]
  pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerInspect {
  #[serde(default)]
  pub id: Option<String>,
  pub running: bool,
  #[serde(default)]
  pub started_at: Option<String>,
  #[serde(default)]
  pub exit_code: Option<i64>,
  #[serde(default)]
  pub health: HealthStatus,
  #[serde(default)]
  pub networks: Vec<String>,
  #[serde(default)]
  pub labels: HashMap<String, String>,
}

impl ContainerInspect {
  /// Running, and healthy if a healthcheck is defined.
  pub fn healthy(&self) -> bool {
    self.running
      && matches!(
        self.health,
        HealthStatus::None | HealthStatus::Healthy
      )
  }
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
pub enum ContainerStateStatus {
  #[default]
  Empty,
  Created,
  Running,
  Paused,
  Restarting,
  Exited,
  Removing,
  Dead,
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
pub enum HealthStatus {
  /// No healthcheck defined.
  #[default]
  None,
  Starting,
  Healthy,
  Unhealthy,
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
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "snake_case")]
pub enum RestartMode {
  No,
  OnFailure,
  Always,
  #[default]
  UnlessStopped,
}

/// Everything needed to start an app container. Labels are ordered
/// so rendered commands are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartContainerArgs {
  pub image: String,
  pub name: String,
  #[serde(default)]
  pub labels: Vec<(String, String)>,
  #[serde(default)]
  pub env: Vec<EnvironmentVar>,
  pub network: String,
  #[serde(default)]
  pub restart: RestartMode,
}
