use resolver_api::Resolve;
use serde::{Deserialize, Serialize};

use crate::entities::{
  app::{AppListItem, AppRealtimeStatus, BaseImageChoice},
  proxy::FragmentStatus,
  task::Task,
};

#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(GetVersionResponse)]
#[error(serror::Error)]
pub struct GetVersion {}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GetVersionResponse {
  pub version: String,
}

//

/// Get a single App by id or subdomain, joined with its actual
/// status.
#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(AppListItem)]
#[error(serror::Error)]
pub struct GetApp {
  pub app: String,
}

//

/// List Apps, each joined with its actual status.
#[derive(Serialize, Deserialize, Debug, Clone, Default, Resolve)]
#[response(ListAppsResponse)]
#[error(serror::Error)]
pub struct ListApps {
  /// Only apps belonging to this owner.
  #[serde(default)]
  pub owner: Option<String>,
  /// Only apps with `is_public: true`.
  #[serde(default)]
  pub public_only: bool,
}

pub type ListAppsResponse = Vec<AppListItem>;

//

#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(Task)]
#[error(serror::Error)]
pub struct GetTask {
  pub task: String,
}

//

/// Deployment history for an app, oldest first.
#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(ListDeploymentsResponse)]
#[error(serror::Error)]
pub struct ListDeployments {
  pub app: String,
}

pub type ListDeploymentsResponse =
  Vec<crate::entities::deployment::Deployment>;

//

/// Tail of the app container's log.
#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(GetLogsResponse)]
#[error(serror::Error)]
pub struct GetLogs {
  pub app: String,
  #[serde(default = "default_tail")]
  pub tail: u64,
}

fn default_tail() -> u64 {
  200
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GetLogsResponse {
  pub log: String,
}

//

/// Reconciler output for the requested apps
/// (all apps when `apps` is empty).
#[derive(Serialize, Deserialize, Debug, Clone, Default, Resolve)]
#[response(RealtimeStatusResponse)]
#[error(serror::Error)]
pub struct RealtimeStatus {
  #[serde(default)]
  pub apps: Vec<String>,
}

pub type RealtimeStatusResponse = Vec<AppRealtimeStatus>;

//

#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(ListBaseDockerfilesResponse)]
#[error(serror::Error)]
pub struct ListBaseDockerfiles {}

pub type ListBaseDockerfilesResponse = Vec<BaseDockerfileInfo>;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BaseDockerfileInfo {
  #[serde(rename = "type")]
  pub variant: String,
  pub name: String,
  pub description: String,
}

//

/// Render the Dockerfile for the given composition params without
/// touching any app. Deterministic.
#[derive(Serialize, Deserialize, Debug, Clone, Default, Resolve)]
#[response(PreviewDockerfileResponse)]
#[error(serror::Error)]
pub struct PreviewDockerfile {
  #[serde(default)]
  pub base_image_choice: BaseImageChoice,
  #[serde(default)]
  pub custom_base_image: Option<String>,
  #[serde(default)]
  pub custom_overlay: Option<String>,
  #[serde(default = "crate::entities::app::default_entry_file")]
  pub entry_file: String,
  /// Raw requirements.txt contents to classify, if any.
  #[serde(default)]
  pub requirements: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PreviewDockerfileResponse {
  pub dockerfile: String,
  pub variant: String,
}

//

/// Fragment status for every app in the catalog.
#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(NginxStatusResponse)]
#[error(serror::Error)]
pub struct NginxStatus {}

pub type NginxStatusResponse = Vec<FragmentStatus>;

//

/// Whether the container engine responds to a ping.
#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(DockerRunningResponse)]
#[error(serror::Error)]
pub struct DockerRunning {}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DockerRunningResponse {
  pub running: bool,
}
