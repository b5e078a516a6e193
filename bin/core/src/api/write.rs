use anyhow::{Context, anyhow};
use openstream_client::{
  api::write::{
    CreateApp, CreateGitCredential, DeleteApp, DeleteGitCredential,
    UpdateApp,
  },
  entities::{
    app::{App, AppStatus, derive_subdomain, valid_subdomain},
    credential::GitCredential,
    openstream_timestamp, optional_string,
  },
};
use resolver_api::Resolve;

use super::Args;

impl Resolve<Args> for CreateApp {
  #[instrument(name = "CreateApp", skip(args))]
  async fn resolve(self, args: &Args) -> serror::Result<App> {
    if self.name.trim().is_empty() {
      return Err(anyhow!("app name must not be empty").into());
    }
    if self.git_url.trim().is_empty() {
      return Err(anyhow!("git_url must not be empty").into());
    }
    if self.entry_file.trim().is_empty() {
      return Err(anyhow!("entry_file must not be empty").into());
    }

    let store = &args.state.store;
    let id =
      store.next_app_id().await.map_err(anyhow::Error::from)?;
    let subdomain = derive_subdomain(&self.name, &id);
    if !valid_subdomain(&subdomain) {
      return Err(
        anyhow!("derived subdomain {subdomain} is not url safe")
          .into(),
      );
    }

    let now = openstream_timestamp();
    let app = App {
      id,
      owner_id: self.owner_id,
      name: self.name,
      git_url: self.git_url,
      branch: self.branch,
      entry_file: self.entry_file,
      base_image_choice: self.base_image_choice,
      custom_base_image: self
        .custom_base_image
        .and_then(optional_string),
      custom_overlay: self.custom_overlay.and_then(optional_string),
      credential_id: self.credential_id.and_then(optional_string),
      env_vars: self.env_vars,
      subdomain,
      status: AppStatus::Stopped,
      is_public: self.is_public,
      created_at: now,
      updated_at: now,
      ..Default::default()
    };
    Ok(store.create_app(app).await.map_err(anyhow::Error::from)?)
  }
}

impl Resolve<Args> for UpdateApp {
  #[instrument(name = "UpdateApp", skip(args))]
  async fn resolve(self, args: &Args) -> serror::Result<App> {
    let store = &args.state.store;
    let mut app = store
      .get_app(&self.id)
      .await
      .map_err(anyhow::Error::from)?;
    if !app.status.editable() {
      return Err(
        anyhow!(
          "app {} is {}, only stopped or errored apps can be edited",
          app.id,
          app.status
        )
        .into(),
      );
    }

    if let Some(name) = self.name {
      // the subdomain was derived at create time and stays put
      app.name = name;
    }
    if let Some(git_url) = self.git_url {
      app.git_url = git_url;
    }
    if let Some(branch) = self.branch {
      app.branch = branch;
    }
    if let Some(entry_file) = self.entry_file {
      app.entry_file = entry_file;
    }
    if let Some(choice) = self.base_image_choice {
      app.base_image_choice = choice;
    }
    if let Some(image) = self.custom_base_image {
      app.custom_base_image = optional_string(image);
    }
    if let Some(overlay) = self.custom_overlay {
      app.custom_overlay = optional_string(overlay);
    }
    if let Some(credential) = self.credential_id {
      app.credential_id = optional_string(credential);
    }
    if let Some(env_vars) = self.env_vars {
      app.env_vars = env_vars;
    }
    if let Some(is_public) = self.is_public {
      app.is_public = is_public;
    }

    Ok(store.update_app(app).await.map_err(anyhow::Error::from)?)
  }
}

impl Resolve<Args> for DeleteApp {
  #[instrument(name = "DeleteApp", skip(args))]
  async fn resolve(self, args: &Args) -> serror::Result<App> {
    let state = &args.state;
    let app = state
      .store
      .get_app(&self.id)
      .await
      .map_err(anyhow::Error::from)?;

    for kind in [
      openstream_client::entities::task::TaskKind::Build,
      openstream_client::entities::task::TaskKind::Deploy,
      openstream_client::entities::task::TaskKind::Stop,
    ] {
      if let Some(task_id) = app.task_id(kind)
        && let Ok(task) = state.store.get_task(task_id).await
        && !task.state.is_terminal()
      {
        return Err(
          anyhow!(
            "app {} has a {kind} task in progress, cancel it first",
            app.id
          )
          .into(),
        );
      }
    }

    let name = app.container_name();
    state
      .engine
      .stop_container(&name, 10)
      .await
      .map_err(anyhow::Error::from)?;
    state
      .engine
      .remove_container(&name)
      .await
      .map_err(anyhow::Error::from)?;
    if let Some(tag) = &app.image_tag {
      if let Err(e) = state.engine.remove_image(tag).await {
        warn!("failed to remove image {tag} | {e:#}");
      }
    }
    state
      .proxy
      .remove(&app.subdomain)
      .await
      .context("failed to remove proxy fragment")?;

    let app = state
      .store
      .delete_app(&self.id)
      .await
      .map_err(anyhow::Error::from)?;
    info!("deleted app {} ({})", app.name, app.id);
    Ok(app)
  }
}

impl Resolve<Args> for CreateGitCredential {
  #[instrument(name = "CreateGitCredential", skip(args, self))]
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<GitCredential> {
    if self.secret.is_empty() {
      return Err(anyhow!("secret must not be empty").into());
    }
    let credential = GitCredential {
      id: String::new(),
      owner_id: self.owner_id,
      name: self.name,
      provider: self.provider,
      auth_kind: self.auth_kind,
      secret: self.secret,
    };
    Ok(
      args
        .state
        .store
        .create_credential(credential)
        .await
        .map_err(anyhow::Error::from)?,
    )
  }
}

impl Resolve<Args> for DeleteGitCredential {
  #[instrument(name = "DeleteGitCredential", skip(args))]
  async fn resolve(
    self,
    args: &Args,
  ) -> serror::Result<GitCredential> {
    Ok(
      args
        .state
        .store
        .delete_credential(&self.id)
        .await
        .map_err(anyhow::Error::from)?,
    )
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use openstream_client::api::write::{CreateApp, UpdateApp};

  use super::*;
  use crate::{
    tasks::TaskEngine,
    testing::{FakeEngine, test_state},
  };

  async fn test_args() -> (Args, std::path::PathBuf) {
    let engine = Arc::new(FakeEngine::default());
    let (state, tmp) = test_state(engine, None).await;
    let tasks = TaskEngine::spawn(state.clone());
    (Args { state, tasks }, tmp)
  }

  fn create_request(name: &str) -> CreateApp {
    CreateApp {
      name: name.to_string(),
      owner_id: String::from("owner-1"),
      git_url: String::from("https://example/git/z"),
      branch: String::from("main"),
      entry_file: String::from("app.py"),
      base_image_choice: Default::default(),
      custom_base_image: None,
      custom_overlay: None,
      credential_id: None,
      env_vars: Vec::new(),
      is_public: false,
    }
  }

  #[tokio::test]
  async fn create_app_derives_subdomain_and_starts_stopped() {
    let (args, tmp) = test_args().await;
    let app =
      create_request("Zone Cleaner").resolve(&args).await.unwrap();
    assert_eq!(app.subdomain, "zone-cleaner-1");
    assert_eq!(app.status, AppStatus::Stopped);
    assert!(app.container_id.is_none());

    // same name gets a distinct subdomain via the id suffix
    let second =
      create_request("Zone Cleaner").resolve(&args).await.unwrap();
    assert_eq!(second.subdomain, "zone-cleaner-2");
    let _ = tokio::fs::remove_dir_all(&tmp).await;
  }

  #[tokio::test]
  async fn update_rejected_unless_stopped_or_errored() {
    let (args, tmp) = test_args().await;
    let app =
      create_request("Zone Cleaner").resolve(&args).await.unwrap();
    args
      .state
      .store
      .mutate_app(
        &app.id,
        Box::new(|app| app.status = AppStatus::Running),
      )
      .await
      .unwrap();

    UpdateApp {
      id: app.id.clone(),
      branch: Some(String::from("develop")),
      ..Default::default()
    }
    .resolve(&args)
    .await
    .unwrap_err();
    // and the row is untouched
    let unchanged =
      args.state.store.get_app(&app.id).await.unwrap();
    assert_eq!(unchanged.branch, "main");

    args
      .state
      .store
      .mutate_app(
        &app.id,
        Box::new(|app| app.status = AppStatus::Error),
      )
      .await
      .unwrap();
    let updated = UpdateApp {
      id: app.id.clone(),
      branch: Some(String::from("develop")),
      name: Some(String::from("Renamed")),
      ..Default::default()
    }
    .resolve(&args)
    .await
    .unwrap();
    assert_eq!(updated.branch, "develop");
    // the subdomain never moves
    assert_eq!(updated.subdomain, "zone-cleaner-1");
    let _ = tokio::fs::remove_dir_all(&tmp).await;
  }

  #[tokio::test]
  async fn delete_app_removes_container_and_fragment() {
    let (args, tmp) = test_args().await;
    let app =
      create_request("Zone Cleaner").resolve(&args).await.unwrap();
    args.state.proxy.write(&app).await.unwrap();
    assert!(
      args.state.proxy.read(&app.subdomain).await.is_some()
    );

    DeleteApp { id: app.id.clone() }
      .resolve(&args)
      .await
      .unwrap();
    assert!(
      args.state.proxy.read(&app.subdomain).await.is_none()
    );
    assert!(
      args.state.store.get_app(&app.id).await.is_err()
    );
    let _ = tokio::fs::remove_dir_all(&tmp).await;
  }
}
