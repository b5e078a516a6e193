use serde::{Deserialize, Serialize};

/// Outcome of an nginx config test + reload cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReloadStatus {
  pub valid: bool,
  #[serde(default)]
  pub errors: Vec<String>,
}

/// Cross check of one app's proxy fragment against the live
/// container it should route to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FragmentStatus {
  pub subdomain: String,
  pub exists: bool,
  pub syntactically_valid: bool,
  pub upstream_container_exists: bool,
  pub upstream_running: bool,
  #[serde(default)]
  pub issues: Vec<String>,
}

impl FragmentStatus {
  pub fn healthy(&self) -> bool {
    self.exists
      && self.syntactically_valid
      && self.upstream_container_exists
      && self.upstream_running
  }
}
