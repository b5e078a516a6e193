use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::{EnvironmentVar, task::TaskKind};

/// Subdomains are path prefixes, container name suffixes, and
/// fragment file names, so they are bound by DNS label rules.
pub static SUBDOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new("^[a-z0-9][a-z0-9-]{0,62}$")
    .expect("invalid subdomain regex")
});

/// Maximum length of the slug part of a subdomain, leaving room
/// for the `-<id>` suffix within the 63 char bound.
const SLUG_MAX_LEN: usize = 50;

/// A user declared deployable unit: a git repository containing a
/// Streamlit app, plus the configuration needed to build and route it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct App {
  pub id: String,
  pub owner_id: String,
  pub name: String,
  pub git_url: String,
  #[serde(default = "default_branch")]
  pub branch: String,
  #[serde(default = "default_entry_file")]
  pub entry_file: String,
  #[serde(default)]
  pub base_image_choice: BaseImageChoice,
  /// When set, wins over `base_image_choice`.
  #[serde(default)]
  pub custom_base_image: Option<String>,
  /// Extra Dockerfile lines appended after the base. Must not
  /// contain `FROM`.
  #[serde(default)]
  pub custom_overlay: Option<String>,
  #[serde(default)]
  pub credential_id: Option<String>,
  #[serde(default)]
  pub env_vars: Vec<EnvironmentVar>,
  /// URL safe slug derived from `name` + `id` at create time,
  /// never mutated afterwards.
  pub subdomain: String,
  #[serde(default)]
  pub status: AppStatus,
  #[serde(default)]
  pub container_id: Option<String>,
  #[serde(default)]
  pub image_tag: Option<String>,
  #[serde(default)]
  pub build_task_id: Option<String>,
  #[serde(default)]
  pub deploy_task_id: Option<String>,
  #[serde(default)]
  pub stop_task_id: Option<String>,
  #[serde(default)]
  pub is_public: bool,
  #[serde(default)]
  pub last_deployed_at: Option<i64>,
  pub created_at: i64,
  pub updated_at: i64,
}

pub fn default_branch() -> String {
  String::from("main")
}

pub fn default_entry_file() -> String {
  String::from("app.py")
}

impl App {
  pub fn container_name(&self) -> String {
    container_name(&self.subdomain)
  }

  pub fn task_id(&self, kind: TaskKind) -> Option<&str> {
    match kind {
      TaskKind::Build => self.build_task_id.as_deref(),
      TaskKind::Deploy => self.deploy_task_id.as_deref(),
      TaskKind::Stop => self.stop_task_id.as_deref(),
    }
  }
}

/// The declared state machine of an App. `Error` behaves like
/// `Stopped` for retry purposes.
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
pub enum AppStatus {
  #[default]
  Stopped,
  Building,
  Deploying,
  Running,
  Stopping,
  Error,
}

impl AppStatus {
  /// States in which the app record may be edited.
  pub fn editable(&self) -> bool {
    matches!(self, AppStatus::Stopped | AppStatus::Error)
  }
}

/// Which bundled base Dockerfile to build from. `Auto` selects
/// based on the requirements classification.
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
pub enum BaseImageChoice {
  #[default]
  Auto,
  Minimal,
  Py39,
  Py310,
  Py311,
}

/// Observed runtime state, computed by joining declared status, task
/// state, container inspect and proxy validation.
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
pub enum ActualStatus {
  Running,
  Stopped,
  #[default]
  NotDeployed,
  ProxyError,
  AppError,
  Building,
  Deploying,
  Stopping,
  Error,
}

/// An App joined with its observed runtime status, as returned by
/// the read surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppListItem {
  #[serde(flatten)]
  pub app: App,
  pub actual_status: ActualStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppRealtimeStatus {
  pub app_id: String,
  pub actual_status: ActualStatus,
  /// Diagnostic for error states, from the latest deployment.
  #[serde(default)]
  pub message: Option<String>,
}

pub fn container_name(subdomain: &str) -> String {
  format!("app-{subdomain}")
}

pub fn valid_subdomain(subdomain: &str) -> bool {
  SUBDOMAIN_REGEX.is_match(subdomain)
}

/// `slug(name)` truncated to 50 chars, suffixed with `-<id>`.
pub fn derive_subdomain(name: &str, id: &str) -> String {
  let slug = slug(name);
  if slug.is_empty() {
    format!("app-{id}")
  } else {
    format!("{slug}-{id}")
  }
}

fn slug(name: &str) -> String {
  let mut out = String::with_capacity(name.len());
  for c in name.chars() {
    if c.is_ascii_alphanumeric() {
      out.push(c.to_ascii_lowercase());
    } else if !out.is_empty() && !out.ends_with('-') {
      out.push('-');
    }
  }
  out.truncate(SLUG_MAX_LEN);
  while out.ends_with('-') {
    out.pop();
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn derives_expected_subdomain() {
    assert_eq!(derive_subdomain("Zone Cleaner", "7"), "zone-cleaner-7");
    assert_eq!(derive_subdomain("My_App!!", "12"), "my-app-12");
    assert_eq!(derive_subdomain("---", "3"), "app-3");
  }

  #[test]
  fn subdomains_match_regex() {
    for (name, id) in [
      ("Zone Cleaner", "7"),
      ("über app", "1"),
      ("a", "99999"),
      ("x".repeat(200).as_str(), "42"),
    ] {
      let subdomain = derive_subdomain(name, id);
      assert!(
        valid_subdomain(&subdomain),
        "invalid subdomain {subdomain}"
      );
      assert!(subdomain.len() <= 63);
    }
  }

  #[test]
  fn slug_truncation_never_leaves_trailing_dash() {
    let name = format!("{} tail", "a".repeat(49));
    let subdomain = derive_subdomain(&name, "5");
    assert!(!subdomain.contains("--"));
    assert!(valid_subdomain(&subdomain));
  }
}
