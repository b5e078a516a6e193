use resolver_api::Resolve;
use serde::{Deserialize, Serialize};

use crate::entities::{
  proxy::ReloadStatus,
  task::{Task, TaskKind},
};

/// Handle returned by every enqueueing request.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EnqueuedTask {
  pub task_id: String,
}

/// Enqueue a build of the app's image. Rejected with a conflict when
/// a build task for this app is already non terminal. Unless
/// `build_only` is set, a successful build chains into a deploy.
#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(EnqueuedTask)]
#[error(serror::Error)]
pub struct RunBuild {
  pub app: String,
  #[serde(default)]
  pub build_only: bool,
  #[serde(default)]
  pub force: bool,
}

//

/// Enqueue a deploy. Implies a build first when no usable image
/// exists for the app.
#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(EnqueuedTask)]
#[error(serror::Error)]
pub struct RunDeploy {
  pub app: String,
}

//

/// Enqueue a stop: remove the proxy fragment, then stop and remove
/// the container.
#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(EnqueuedTask)]
#[error(serror::Error)]
pub struct RunStop {
  pub app: String,
}

//

/// Cancel the app's non terminal task of the given kind. Pending
/// tasks revoke immediately; running tasks observe the cancel flag at
/// the next checkpoint. Cleanup always runs.
#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(Task)]
#[error(serror::Error)]
pub struct CancelTask {
  pub app: String,
  pub kind: TaskKind,
}

//

/// Remove platform labeled containers whose app no longer exists,
/// along with their fragments.
#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(CleanupOrphansResponse)]
#[error(serror::Error)]
pub struct CleanupOrphans {}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CleanupOrphansResponse {
  pub removed_containers: Vec<String>,
  pub removed_fragments: Vec<String>,
}

//

/// Delete fragments for apps which are not running, per the catalog.
#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(NginxCleanupResponse)]
#[error(serror::Error)]
pub struct NginxCleanupAuto {}

/// Delete fragments whose subdomain is not in `active`.
#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(NginxCleanupResponse)]
#[error(serror::Error)]
pub struct NginxCleanupManual {
  pub active: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NginxCleanupResponse {
  pub removed: Vec<String>,
}

//

/// Delete a single fragment and reload.
#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(ReloadStatus)]
#[error(serror::Error)]
pub struct NginxRemove {
  pub subdomain: String,
}

//

/// Test and reload the proxy configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(ReloadStatus)]
#[error(serror::Error)]
pub struct NginxReload {}
