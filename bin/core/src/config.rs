use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use openstream_client::entities::{
  config::{CoreConfig, Env},
  logger::LogLevel,
};

#[derive(Parser, Debug)]
#[command(name = "core", about = "openstream core")]
pub struct CliArgs {
  /// Path to a TOML config file.
  #[arg(short, long)]
  pub config_path: Option<PathBuf>,

  /// Override the logging level.
  #[arg(long)]
  pub log_level: Option<LogLevel>,
}

/// File config (optional) with `OPENSTREAM_*` environment overrides
/// and CLI flags on top.
pub fn load() -> anyhow::Result<CoreConfig> {
  let env: Env = envy::from_env()
    .context("failed to parse environment overrides")?;
  let args = CliArgs::parse();
  load_with(env, args.config_path, args.log_level)
}

fn load_with(
  env: Env,
  cli_config_path: Option<PathBuf>,
  cli_log_level: Option<LogLevel>,
) -> anyhow::Result<CoreConfig> {
  let config_path =
    cli_config_path.or(env.openstream_config_path.clone());

  let mut config = match &config_path {
    Some(path) => {
      let contents = std::fs::read_to_string(path).with_context(
        || format!("failed to read config at {}", path.display()),
      )?;
      toml::from_str::<CoreConfig>(&contents).with_context(|| {
        format!("invalid config file at {}", path.display())
      })?
    }
    None => CoreConfig::default(),
  };

  if let Some(address) = env.openstream_database_address {
    config.database_address = address;
  }
  if let Some(host) = env.openstream_docker_host {
    config.docker_host = host;
  }
  if let Some(network) = env.openstream_network_name {
    config.network_name = network;
  }
  if let Some(dir) = env.openstream_base_dockerfile_dir {
    config.base_dockerfile_dir = dir;
  }
  if let Some(root) = env.openstream_workspace_root {
    config.workspace_root = root;
  }
  if let Some(dir) = env.openstream_fragment_dir {
    config.fragment_dir = dir;
  }
  if let Some(fragments) = env.openstream_system_fragments {
    config.system_fragments = fragments;
  }
  if let Some(url) = env.openstream_host_url {
    config.host_url = url;
  }
  if let Some(count) = env.openstream_worker_count {
    config.worker_count = count;
  }
  if let Some(command) = env.openstream_nginx_test_command {
    config.nginx_test_command = command;
  }
  if let Some(command) = env.openstream_nginx_reload_command {
    config.nginx_reload_command = command;
  }
  if let Some(timeout) = env.openstream_clone_timeout {
    config.clone_timeout = timeout;
  }
  if let Some(timeout) = env.openstream_build_timeout {
    config.build_timeout = timeout;
  }
  if let Some(timeout) = env.openstream_deploy_startup_timeout {
    config.deploy_startup_timeout = timeout;
  }
  if let Some(timeout) = env.openstream_proxy_reload_timeout {
    config.proxy_reload_timeout = timeout;
  }
  if let Some(interval) = env.openstream_reconcile_interval {
    config.reconcile_interval = interval;
  }
  if let Some(level) = env.openstream_logging_level {
    config.logging.level = level;
  }
  if let Some(stdio) = env.openstream_logging_stdio {
    config.logging.stdio = stdio;
  }
  if let Some(pretty) = env.openstream_logging_pretty {
    config.logging.pretty = pretty;
  }
  if let Some(level) = cli_log_level {
    config.logging.level = level;
  }

  Ok(config)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn env_overrides_beat_defaults() {
    let env = Env {
      openstream_worker_count: Some(5),
      openstream_network_name: Some("apps".to_string()),
      ..Default::default()
    };
    let config = load_with(env, None, None).unwrap();
    assert_eq!(config.worker_count, 5);
    assert_eq!(config.network_name, "apps");
    assert_eq!(config.clone_timeout, 120);
  }

  #[test]
  fn cli_log_level_beats_env() {
    let env = Env {
      openstream_logging_level: Some(LogLevel::Debug),
      ..Default::default()
    };
    let config =
      load_with(env, None, Some(LogLevel::Error)).unwrap();
    assert_eq!(config.logging.level, LogLevel::Error);
  }
}
