use resolver_api::Resolve;
use serde::{Deserialize, Serialize};

use crate::entities::{
  EnvironmentVar,
  app::{App, BaseImageChoice, default_branch, default_entry_file},
  credential::{AuthKind, GitCredential},
};

/// Register an App. The subdomain is derived from name + id here and
/// never changes afterwards. Created in status `stopped`.
#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(App)]
#[error(serror::Error)]
pub struct CreateApp {
  pub name: String,
  pub owner_id: String,
  pub git_url: String,
  #[serde(default = "default_branch")]
  pub branch: String,
  #[serde(default = "default_entry_file")]
  pub entry_file: String,
  #[serde(default)]
  pub base_image_choice: BaseImageChoice,
  #[serde(default)]
  pub custom_base_image: Option<String>,
  #[serde(default)]
  pub custom_overlay: Option<String>,
  #[serde(default)]
  pub credential_id: Option<String>,
  #[serde(default)]
  pub env_vars: Vec<EnvironmentVar>,
  #[serde(default)]
  pub is_public: bool,
}

//

/// Partial update of an App's configuration. Only allowed while the
/// app is stopped or errored. Empty strings clear optional fields.
#[derive(Serialize, Deserialize, Debug, Clone, Default, Resolve)]
#[response(App)]
#[error(serror::Error)]
pub struct UpdateApp {
  pub id: String,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub git_url: Option<String>,
  #[serde(default)]
  pub branch: Option<String>,
  #[serde(default)]
  pub entry_file: Option<String>,
  #[serde(default)]
  pub base_image_choice: Option<BaseImageChoice>,
  #[serde(default)]
  pub custom_base_image: Option<String>,
  #[serde(default)]
  pub custom_overlay: Option<String>,
  #[serde(default)]
  pub credential_id: Option<String>,
  #[serde(default)]
  pub env_vars: Option<Vec<EnvironmentVar>>,
  #[serde(default)]
  pub is_public: Option<bool>,
}

//

/// Tear down the app's container and proxy fragment, then delete its
/// rows. Returns the deleted App.
#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(App)]
#[error(serror::Error)]
pub struct DeleteApp {
  pub id: String,
}

//

#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(GitCredential)]
#[error(serror::Error)]
pub struct CreateGitCredential {
  pub owner_id: String,
  pub name: String,
  #[serde(default = "crate::entities::credential::default_provider")]
  pub provider: String,
  #[serde(default)]
  pub auth_kind: AuthKind,
  pub secret: String,
}

//

#[derive(Serialize, Deserialize, Debug, Clone, Resolve)]
#[response(GitCredential)]
#[error(serror::Error)]
pub struct DeleteGitCredential {
  pub id: String,
}
