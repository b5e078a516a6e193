use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use command::run_openstream_command;
use openstream_client::entities::{
  app::App,
  config::CoreConfig,
  docker::LABEL_SUBDOMAIN,
  proxy::{FragmentStatus, ReloadStatus},
};
use tokio::sync::Mutex;

use crate::docker::ContainerEngine;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
  #[error("proxy reload invalid | {0}")]
  ReloadInvalid(String),
  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

/// Owns the watched fragment directory: one `<subdomain>.conf` per
/// running app, written atomically, plus the test + reload cycle.
/// System fragments on the allowlist are never touched.
pub struct NginxManager {
  fragment_dir: PathBuf,
  system_fragments: Vec<String>,
  test_command: String,
  reload_command: String,
  reload_timeout: Duration,
  /// Serializes test + reload cycles across tasks.
  reload_lock: Mutex<()>,
}

impl NginxManager {
  pub fn new(config: &CoreConfig) -> NginxManager {
    NginxManager {
      fragment_dir: config.fragment_dir.clone(),
      system_fragments: config.system_fragments.clone(),
      test_command: config.nginx_test_command.clone(),
      reload_command: config.nginx_reload_command.clone(),
      reload_timeout: Duration::from_secs(
        config.proxy_reload_timeout,
      ),
      reload_lock: Mutex::new(()),
    }
  }

  pub fn fragment_path(&self, subdomain: &str) -> PathBuf {
    self.fragment_dir.join(format!("{subdomain}.conf"))
  }

  /// Renders the fragment for an app: a path prefix location that
  /// strips the prefix and proxies to the app container, with
  /// websocket friendly headers and buffering off so streamlit
  /// streaming works.
  pub fn render_fragment(app: &App) -> String {
    let subdomain = &app.subdomain;
    let container = app.container_name();
    format!(
      r#"# managed by openstream, do not edit
location /{subdomain}/ {{
    proxy_pass http://{container}:8501/;
    proxy_http_version 1.1;
    proxy_set_header Upgrade $http_upgrade;
    proxy_set_header Connection "upgrade";
    proxy_set_header Host $host;
    proxy_set_header X-Real-IP $remote_addr;
    proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
    proxy_set_header X-Forwarded-Proto $scheme;
    proxy_connect_timeout 60s;
    proxy_send_timeout 300s;
    proxy_read_timeout 300s;
    proxy_buffering off;
}}
"#
    )
  }

  /// Atomic write (temp file + rename) of the app's fragment,
  /// followed by exactly one reload. A byte identical fragment is
  /// not rewritten, but the reload still happens.
  pub async fn write(
    &self,
    app: &App,
  ) -> Result<ReloadStatus, ProxyError> {
    let rendered = Self::render_fragment(app);
    let path = self.fragment_path(&app.subdomain);
    let current = tokio::fs::read_to_string(&path).await.ok();
    if current.as_deref() != Some(rendered.as_str()) {
      tokio::fs::create_dir_all(&self.fragment_dir)
        .await
        .context("failed to create fragment directory")?;
      let tmp = self
        .fragment_dir
        .join(format!("{}.conf.tmp", app.subdomain));
      tokio::fs::write(&tmp, &rendered)
        .await
        .context("failed to write fragment temp file")?;
      tokio::fs::rename(&tmp, &path)
        .await
        .context("failed to move fragment into place")?;
    }
    self.reload().await
  }

  /// Reads the current fragment contents, if present. Used to back
  /// up the previous fragment before a deploy replaces it.
  pub async fn read(&self, subdomain: &str) -> Option<String> {
    tokio::fs::read_to_string(self.fragment_path(subdomain))
      .await
      .ok()
  }

  /// Restores previously backed up contents verbatim, then reloads.
  pub async fn restore(
    &self,
    subdomain: &str,
    contents: &str,
  ) -> Result<ReloadStatus, ProxyError> {
    let path = self.fragment_path(subdomain);
    tokio::fs::create_dir_all(&self.fragment_dir)
      .await
      .context("failed to create fragment directory")?;
    tokio::fs::write(&path, contents)
      .await
      .context("failed to restore fragment")?;
    self.reload().await
  }

  /// Deletes the fragment (absence is fine), then reloads.
  pub async fn remove(
    &self,
    subdomain: &str,
  ) -> Result<ReloadStatus, ProxyError> {
    let path = self.fragment_path(subdomain);
    match tokio::fs::remove_file(&path).await {
      Ok(()) => {}
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => {
        return Err(ProxyError::Other(anyhow::Error::new(e)));
      }
    }
    self.reload().await
  }

  /// Test then reload, serialized process wide. An invalid config is
  /// reported in the returned status, not as an `Err`.
  pub async fn reload(&self) -> Result<ReloadStatus, ProxyError> {
    let _guard = self.reload_lock.lock().await;

    let test = tokio::time::timeout(
      self.reload_timeout,
      run_openstream_command("Nginx Test", None, &self.test_command),
    )
    .await
    .map_err(|_| {
      ProxyError::ReloadInvalid(format!(
        "config test timed out after {}s",
        self.reload_timeout.as_secs()
      ))
    })?;
    if !test.success {
      return Ok(ReloadStatus {
        valid: false,
        errors: error_lines(&test.stderr),
      });
    }

    let reload = tokio::time::timeout(
      self.reload_timeout,
      run_openstream_command(
        "Nginx Reload",
        None,
        &self.reload_command,
      ),
    )
    .await
    .map_err(|_| {
      ProxyError::ReloadInvalid(format!(
        "reload timed out after {}s",
        self.reload_timeout.as_secs()
      ))
    })?;
    if !reload.success {
      return Ok(ReloadStatus {
        valid: false,
        errors: error_lines(&reload.stderr),
      });
    }

    Ok(ReloadStatus {
      valid: true,
      errors: Vec::new(),
    })
  }

  /// Cross checks the fragment against the app's live container.
  pub async fn validate(
    &self,
    app: &App,
    engine: &dyn ContainerEngine,
  ) -> FragmentStatus {
    let mut status = FragmentStatus {
      subdomain: app.subdomain.clone(),
      ..Default::default()
    };

    let contents = self.read(&app.subdomain).await;
    status.exists = contents.is_some();
    if !status.exists {
      status.issues.push("fragment file missing".to_string());
    }
    status.syntactically_valid = contents
      .as_deref()
      .map(|contents| contents == Self::render_fragment(app))
      .unwrap_or(false);
    if status.exists && !status.syntactically_valid {
      status.issues.push(
        "fragment does not match the expected rendering"
          .to_string(),
      );
    }

    match engine.inspect_container(&app.container_name()).await {
      Ok(Some(inspect)) => {
        status.upstream_container_exists = true;
        status.upstream_running = inspect.running;
        if !inspect.running {
          status
            .issues
            .push("upstream container is not running".to_string());
        }
        let labeled = inspect
          .labels
          .get(LABEL_SUBDOMAIN)
          .map(String::as_str);
        if labeled != Some(app.subdomain.as_str()) {
          status.upstream_running = false;
          status.issues.push(format!(
            "upstream container subdomain label is {labeled:?}"
          ));
        }
      }
      Ok(None) => {
        status
          .issues
          .push("upstream container does not exist".to_string());
      }
      Err(e) => {
        status.issues.push(format!("engine unreachable | {e}"));
      }
    }

    status
  }

  pub async fn configs_status(
    &self,
    apps: &[App],
    engine: &dyn ContainerEngine,
  ) -> Vec<FragmentStatus> {
    let mut statuses = Vec::with_capacity(apps.len());
    for app in apps {
      statuses.push(self.validate(app, engine).await);
    }
    statuses
  }

  /// Deletes app fragments whose subdomain is not in `active`.
  /// Allowlisted system fragments survive every cleanup. Reloads
  /// once at the end when anything was removed.
  pub async fn cleanup(
    &self,
    active: &[String],
  ) -> Result<Vec<String>, ProxyError> {
    let mut entries =
      match tokio::fs::read_dir(&self.fragment_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
          return Ok(Vec::new());
        }
        Err(e) => {
          return Err(ProxyError::Other(anyhow::Error::new(e)));
        }
      };

    let mut removed = Vec::new();
    while let Some(entry) = entries
      .next_entry()
      .await
      .context("failed to read fragment directory")?
    {
      let file_name = entry.file_name();
      let Some(file_name) = file_name.to_str() else {
        continue;
      };
      let Some(subdomain) = file_name.strip_suffix(".conf") else {
        continue;
      };
      if self
        .system_fragments
        .iter()
        .any(|system| system == file_name || system == subdomain)
      {
        continue;
      }
      if active.iter().any(|active| active == subdomain) {
        continue;
      }
      tokio::fs::remove_file(entry.path())
        .await
        .with_context(|| {
          format!("failed to remove fragment {file_name}")
        })?;
      info!("removed stale fragment {file_name}");
      removed.push(subdomain.to_string());
    }

    if !removed.is_empty() {
      self.reload().await?;
    }

    Ok(removed)
  }
}

fn error_lines(stderr: &str) -> Vec<String> {
  stderr
    .lines()
    .filter(|line| !line.trim().is_empty())
    .map(|line| line.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
  use openstream_client::entities::app::derive_subdomain;

  use super::*;

  fn manager(dir: &std::path::Path) -> NginxManager {
    let config = CoreConfig {
      fragment_dir: dir.to_path_buf(),
      system_fragments: vec!["default.conf".to_string()],
      nginx_test_command: "true".to_string(),
      nginx_reload_command: "true".to_string(),
      ..Default::default()
    };
    NginxManager::new(&config)
  }

  fn app(name: &str, id: &str) -> App {
    App {
      id: id.to_string(),
      name: name.to_string(),
      subdomain: derive_subdomain(name, id),
      ..Default::default()
    }
  }

  fn temp_dir() -> PathBuf {
    std::env::temp_dir()
      .join(format!("os-proxy-{}", uuid::Uuid::new_v4()))
  }

  #[test]
  fn fragment_has_streaming_friendly_settings() {
    let fragment =
      NginxManager::render_fragment(&app("Zone Cleaner", "7"));
    assert!(fragment.contains("location /zone-cleaner-7/ {"));
    assert!(fragment.contains(
      "proxy_pass http://app-zone-cleaner-7:8501/;"
    ));
    assert!(fragment.contains("proxy_http_version 1.1;"));
    assert!(
      fragment.contains("proxy_set_header Upgrade $http_upgrade;")
    );
    assert!(fragment.contains("proxy_buffering off;"));
    assert!(fragment.contains("proxy_read_timeout 300s;"));
    assert!(
      fragment
        .contains("proxy_set_header X-Forwarded-Proto $scheme;")
    );
  }

  #[tokio::test]
  async fn write_is_idempotent_but_always_reloads() {
    let dir = temp_dir();
    let mut manager = manager(&dir);
    let marker = dir.join("reloads");
    manager.reload_command =
      format!("echo reload >> {}", marker.display());
    tokio::fs::create_dir_all(&dir).await.unwrap();

    let app = app("Zone Cleaner", "7");
    let status = manager.write(&app).await.unwrap();
    assert!(status.valid);
    let first =
      tokio::fs::read(manager.fragment_path(&app.subdomain))
        .await
        .unwrap();

    manager.write(&app).await.unwrap();
    let second =
      tokio::fs::read(manager.fragment_path(&app.subdomain))
        .await
        .unwrap();
    assert_eq!(first, second);

    let reloads =
      tokio::fs::read_to_string(&marker).await.unwrap();
    assert_eq!(reloads.lines().count(), 2);

    tokio::fs::remove_dir_all(&dir).await.unwrap();
  }

  #[tokio::test]
  async fn failed_test_reports_invalid_without_reloading() {
    let dir = temp_dir();
    let mut manager = manager(&dir);
    manager.test_command =
      "sh -c 'echo broken directive >&2; exit 1'".to_string();
    let status = manager.reload().await.unwrap();
    assert!(!status.valid);
    assert_eq!(status.errors, ["broken directive"]);
  }

  #[tokio::test]
  async fn cleanup_spares_system_fragments_and_active_apps() {
    let dir = temp_dir();
    let manager = manager(&dir);
    tokio::fs::create_dir_all(&dir).await.unwrap();
    for name in
      ["default.conf", "zone-cleaner-7.conf", "old-app-3.conf"]
    {
      tokio::fs::write(dir.join(name), "x").await.unwrap();
    }

    let removed = manager
      .cleanup(&["zone-cleaner-7".to_string()])
      .await
      .unwrap();
    assert_eq!(removed, ["old-app-3"]);
    assert!(dir.join("default.conf").exists());
    assert!(dir.join("zone-cleaner-7.conf").exists());
    assert!(!dir.join("old-app-3.conf").exists());

    tokio::fs::remove_dir_all(&dir).await.unwrap();
  }

  #[tokio::test]
  async fn remove_is_idempotent() {
    let dir = temp_dir();
    let manager = manager(&dir);
    let status = manager.remove("never-existed-1").await.unwrap();
    assert!(status.valid);
  }
}
