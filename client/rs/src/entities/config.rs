use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::logger::LogConfig;

/// Core configuration, loaded from an optional TOML file with
/// `OPENSTREAM_*` environment overrides on top. The loaded value is
/// passed through component constructors; nothing reads the
/// environment after startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
  /// Connection string for the catalog backend. Empty selects the
  /// bundled in-memory catalog.
  #[serde(default)]
  pub database_address: String,

  /// Container engine endpoint (`unix://...` or `tcp://...`).
  /// Empty uses the local daemon defaults.
  #[serde(default)]
  pub docker_host: String,

  /// The shared network every app container joins.
  #[serde(default = "default_network_name")]
  pub network_name: String,

  /// Directory holding the bundled base Dockerfiles,
  /// read only at runtime.
  #[serde(default = "default_base_dockerfile_dir")]
  pub base_dockerfile_dir: PathBuf,

  /// Root under which per task clone workspaces are created.
  #[serde(default = "default_workspace_root")]
  pub workspace_root: PathBuf,

  /// Directory watched by nginx for per app fragment files.
  #[serde(default = "default_fragment_dir")]
  pub fragment_dir: PathBuf,

  /// Fragment file names which no cleanup may ever remove.
  #[serde(default)]
  pub system_fragments: Vec<String>,

  /// Public base URL apps are served under.
  #[serde(default = "default_host_url")]
  pub host_url: String,

  /// Number of task workers pulling from the queue.
  #[serde(default = "default_worker_count")]
  pub worker_count: usize,

  /// Shell command used to test the proxy configuration.
  #[serde(default = "default_nginx_test_command")]
  pub nginx_test_command: String,

  /// Shell command used to reload the proxy.
  #[serde(default = "default_nginx_reload_command")]
  pub nginx_reload_command: String,

  /// Seconds allowed for a repo clone.
  #[serde(default = "default_clone_timeout")]
  pub clone_timeout: u64,

  /// Seconds allowed for an image build.
  #[serde(default = "default_build_timeout")]
  pub build_timeout: u64,

  /// Seconds allowed for container start + health.
  #[serde(default = "default_deploy_startup_timeout")]
  pub deploy_startup_timeout: u64,

  /// Seconds allowed for a proxy test + reload.
  #[serde(default = "default_proxy_reload_timeout")]
  pub proxy_reload_timeout: u64,

  /// Seconds between periodic reconcile passes. 0 disables the loop.
  #[serde(default = "default_reconcile_interval")]
  pub reconcile_interval: u64,

  #[serde(default)]
  pub logging: LogConfig,
}

fn default_network_name() -> String {
  String::from("openstream")
}

fn default_base_dockerfile_dir() -> PathBuf {
  PathBuf::from("base_dockerfiles")
}

fn default_workspace_root() -> PathBuf {
  PathBuf::from("workspaces")
}

fn default_fragment_dir() -> PathBuf {
  PathBuf::from("proxy_fragments")
}

fn default_host_url() -> String {
  String::from("http://localhost")
}

fn default_worker_count() -> usize {
  2
}

fn default_nginx_test_command() -> String {
  String::from("nginx -t")
}

fn default_nginx_reload_command() -> String {
  String::from("nginx -s reload")
}

fn default_clone_timeout() -> u64 {
  120
}

fn default_build_timeout() -> u64 {
  1800
}

fn default_deploy_startup_timeout() -> u64 {
  60
}

fn default_proxy_reload_timeout() -> u64 {
  10
}

fn default_reconcile_interval() -> u64 {
  60
}

impl Default for CoreConfig {
  fn default() -> CoreConfig {
    CoreConfig {
      database_address: Default::default(),
      docker_host: Default::default(),
      network_name: default_network_name(),
      base_dockerfile_dir: default_base_dockerfile_dir(),
      workspace_root: default_workspace_root(),
      fragment_dir: default_fragment_dir(),
      system_fragments: Default::default(),
      host_url: default_host_url(),
      worker_count: default_worker_count(),
      nginx_test_command: default_nginx_test_command(),
      nginx_reload_command: default_nginx_reload_command(),
      clone_timeout: default_clone_timeout(),
      build_timeout: default_build_timeout(),
      deploy_startup_timeout: default_deploy_startup_timeout(),
      proxy_reload_timeout: default_proxy_reload_timeout(),
      reconcile_interval: default_reconcile_interval(),
      logging: Default::default(),
    }
  }
}

/// Environment overrides, parsed with envy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Env {
  pub openstream_config_path: Option<PathBuf>,
  pub openstream_database_address: Option<String>,
  pub openstream_docker_host: Option<String>,
  pub openstream_network_name: Option<String>,
  pub openstream_base_dockerfile_dir: Option<PathBuf>,
  pub openstream_workspace_root: Option<PathBuf>,
  pub openstream_fragment_dir: Option<PathBuf>,
  pub openstream_system_fragments: Option<Vec<String>>,
  pub openstream_host_url: Option<String>,
  pub openstream_worker_count: Option<usize>,
  pub openstream_nginx_test_command: Option<String>,
  pub openstream_nginx_reload_command: Option<String>,
  pub openstream_clone_timeout: Option<u64>,
  pub openstream_build_timeout: Option<u64>,
  pub openstream_deploy_startup_timeout: Option<u64>,
  pub openstream_proxy_reload_timeout: Option<u64>,
  pub openstream_reconcile_interval: Option<u64>,
  pub openstream_logging_level:
    Option<super::logger::LogLevel>,
  pub openstream_logging_stdio:
    Option<super::logger::StdioLogMode>,
  pub openstream_logging_pretty: Option<bool>,
}
