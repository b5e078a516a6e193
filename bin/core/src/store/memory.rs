use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use openstream_client::entities::{
  app::App,
  credential::GitCredential,
  deployment::Deployment,
  openstream_timestamp,
  task::{Task, TaskKind},
};

use super::{CatalogStore, StoreError};

/// The bundled catalog backend. Row locks come from dashmap shard
/// entries; the subdomain index makes uniqueness checks atomic with
/// the reservation.
#[derive(Default)]
pub struct MemoryStore {
  app_id_counter: AtomicI64,
  apps: DashMap<String, App>,
  subdomains: DashMap<String, String>,
  tasks: DashMap<String, Task>,
  deployments: DashMap<String, Vec<Deployment>>,
  credentials: DashMap<String, GitCredential>,
}

impl MemoryStore {
  pub fn new() -> MemoryStore {
    MemoryStore {
      app_id_counter: AtomicI64::new(1),
      ..Default::default()
    }
  }
}

#[async_trait]
impl CatalogStore for MemoryStore {
  async fn next_app_id(&self) -> Result<String, StoreError> {
    Ok(
      self
        .app_id_counter
        .fetch_add(1, Ordering::SeqCst)
        .to_string(),
    )
  }

  async fn create_app(&self, app: App) -> Result<App, StoreError> {
    match self.subdomains.entry(app.subdomain.clone()) {
      Entry::Occupied(_) => {
        return Err(StoreError::Conflict(format!(
          "subdomain {} is already taken",
          app.subdomain
        )));
      }
      Entry::Vacant(entry) => {
        entry.insert(app.id.clone());
      }
    }
    self.apps.insert(app.id.clone(), app.clone());
    Ok(app)
  }

  async fn get_app(&self, id: &str) -> Result<App, StoreError> {
    self
      .apps
      .get(id)
      .map(|app| app.value().clone())
      .ok_or_else(|| StoreError::NotFound(format!("app {id}")))
  }

  async fn update_app(&self, app: App) -> Result<App, StoreError> {
    let mut entry = self
      .apps
      .get_mut(&app.id)
      .ok_or_else(|| StoreError::NotFound(format!("app {}", app.id)))?;
    let mut app = app;
    app.updated_at = openstream_timestamp();
    *entry = app.clone();
    Ok(app)
  }

  async fn mutate_app(
    &self,
    id: &str,
    mutate: Box<dyn for<'a> FnOnce(&'a mut App) + Send>,
  ) -> Result<App, StoreError> {
    let mut entry = self
      .apps
      .get_mut(id)
      .ok_or_else(|| StoreError::NotFound(format!("app {id}")))?;
    mutate(&mut entry);
    entry.updated_at = openstream_timestamp();
    Ok(entry.clone())
  }

  async fn delete_app(&self, id: &str) -> Result<App, StoreError> {
    let (_, app) = self
      .apps
      .remove(id)
      .ok_or_else(|| StoreError::NotFound(format!("app {id}")))?;
    self.subdomains.remove(&app.subdomain);
    self.deployments.remove(id);
    Ok(app)
  }

  async fn list_apps(&self) -> Result<Vec<App>, StoreError> {
    let mut apps = self
      .apps
      .iter()
      .map(|app| app.value().clone())
      .collect::<Vec<_>>();
    apps.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(apps)
  }

  async fn list_apps_by_owner(
    &self,
    owner_id: &str,
  ) -> Result<Vec<App>, StoreError> {
    let mut apps = self.list_apps().await?;
    apps.retain(|app| app.owner_id == owner_id);
    Ok(apps)
  }

  async fn list_public_apps(&self) -> Result<Vec<App>, StoreError> {
    let mut apps = self.list_apps().await?;
    apps.retain(|app| app.is_public);
    Ok(apps)
  }

  async fn find_app_by_subdomain(
    &self,
    subdomain: &str,
  ) -> Result<Option<App>, StoreError> {
    let Some(id) = self.subdomains.get(subdomain) else {
      return Ok(None);
    };
    Ok(self.apps.get(id.value()).map(|app| app.value().clone()))
  }

  async fn claim_task_slot(
    &self,
    app_id: &str,
    kind: TaskKind,
    task_id: &str,
  ) -> Result<App, StoreError> {
    let mut entry = self.apps.get_mut(app_id).ok_or_else(|| {
      StoreError::NotFound(format!("app {app_id}"))
    })?;
    if let Some(current) = entry.task_id(kind) {
      let running = self
        .tasks
        .get(current)
        .map(|task| !task.state.is_terminal())
        .unwrap_or(false);
      if running {
        return Err(StoreError::Conflict(format!(
          "a {kind} task for app {app_id} is already in progress"
        )));
      }
    }
    match kind {
      TaskKind::Build => {
        entry.build_task_id = Some(task_id.to_string())
      }
      TaskKind::Deploy => {
        entry.deploy_task_id = Some(task_id.to_string())
      }
      TaskKind::Stop => {
        entry.stop_task_id = Some(task_id.to_string())
      }
    }
    entry.updated_at = openstream_timestamp();
    Ok(entry.clone())
  }

  async fn create_task(
    &self,
    task: Task,
  ) -> Result<Task, StoreError> {
    self.tasks.insert(task.id.clone(), task.clone());
    Ok(task)
  }

  async fn get_task(&self, id: &str) -> Result<Task, StoreError> {
    self
      .tasks
      .get(id)
      .map(|task| task.value().clone())
      .ok_or_else(|| StoreError::NotFound(format!("task {id}")))
  }

  async fn mutate_task(
    &self,
    id: &str,
    mutate: Box<dyn for<'a> FnOnce(&'a mut Task) + Send>,
  ) -> Result<Task, StoreError> {
    let mut entry = self
      .tasks
      .get_mut(id)
      .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
    mutate(&mut entry);
    Ok(entry.clone())
  }

  async fn create_deployment(
    &self,
    deployment: Deployment,
  ) -> Result<Deployment, StoreError> {
    let mut deployment = deployment;
    if deployment.id.is_empty() {
      deployment.id = uuid::Uuid::new_v4().to_string();
    }
    self
      .deployments
      .entry(deployment.app_id.clone())
      .or_default()
      .push(deployment.clone());
    Ok(deployment)
  }

  async fn latest_deployment(
    &self,
    app_id: &str,
  ) -> Result<Option<Deployment>, StoreError> {
    Ok(
      self
        .deployments
        .get(app_id)
        .and_then(|rows| rows.last().cloned()),
    )
  }

  async fn list_deployments(
    &self,
    app_id: &str,
  ) -> Result<Vec<Deployment>, StoreError> {
    Ok(
      self
        .deployments
        .get(app_id)
        .map(|rows| rows.value().clone())
        .unwrap_or_default(),
    )
  }

  async fn create_credential(
    &self,
    credential: GitCredential,
  ) -> Result<GitCredential, StoreError> {
    let mut credential = credential;
    if credential.id.is_empty() {
      credential.id = uuid::Uuid::new_v4().to_string();
    }
    self
      .credentials
      .insert(credential.id.clone(), credential.clone());
    Ok(credential)
  }

  async fn get_credential(
    &self,
    id: &str,
  ) -> Result<GitCredential, StoreError> {
    self
      .credentials
      .get(id)
      .map(|credential| credential.value().clone())
      .ok_or_else(|| {
        StoreError::NotFound(format!("credential {id}"))
      })
  }

  async fn delete_credential(
    &self,
    id: &str,
  ) -> Result<GitCredential, StoreError> {
    self
      .credentials
      .remove(id)
      .map(|(_, credential)| credential)
      .ok_or_else(|| {
        StoreError::NotFound(format!("credential {id}"))
      })
  }
}

#[cfg(test)]
mod tests {
  use openstream_client::entities::{
    app::derive_subdomain, task::TaskState,
  };

  use super::*;

  async fn seeded_app(store: &MemoryStore, name: &str) -> App {
    let id = store.next_app_id().await.unwrap();
    let app = App {
      id: id.clone(),
      name: name.to_string(),
      subdomain: derive_subdomain(name, &id),
      created_at: openstream_timestamp(),
      updated_at: openstream_timestamp(),
      ..Default::default()
    };
    store.create_app(app).await.unwrap()
  }

  #[tokio::test]
  async fn duplicate_subdomain_conflicts() {
    let store = MemoryStore::new();
    let app = seeded_app(&store, "My App").await;
    let clash = App {
      id: "999".to_string(),
      subdomain: app.subdomain.clone(),
      ..Default::default()
    };
    let err = store.create_app(clash).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
  }

  #[tokio::test]
  async fn claim_task_slot_rejects_second_claim() {
    let store = MemoryStore::new();
    let app = seeded_app(&store, "Zone Cleaner").await;
    store
      .create_task(Task {
        id: "t1".to_string(),
        kind: TaskKind::Build,
        app_id: app.id.clone(),
        state: TaskState::Running,
        ..Default::default()
      })
      .await
      .unwrap();
    store
      .claim_task_slot(&app.id, TaskKind::Build, "t1")
      .await
      .unwrap();
    let err = store
      .claim_task_slot(&app.id, TaskKind::Build, "t2")
      .await
      .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    // a different kind is fine
    store
      .claim_task_slot(&app.id, TaskKind::Stop, "t3")
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn claim_task_slot_allows_after_terminal() {
    let store = MemoryStore::new();
    let app = seeded_app(&store, "Zone Cleaner").await;
    store
      .create_task(Task {
        id: "t1".to_string(),
        kind: TaskKind::Build,
        app_id: app.id.clone(),
        state: TaskState::Success,
        ..Default::default()
      })
      .await
      .unwrap();
    store
      .claim_task_slot(&app.id, TaskKind::Build, "t1")
      .await
      .unwrap();
    store
      .claim_task_slot(&app.id, TaskKind::Build, "t2")
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn delete_app_drops_subdomain_and_history() {
    let store = MemoryStore::new();
    let app = seeded_app(&store, "Gone Soon").await;
    store
      .create_deployment(Deployment {
        app_id: app.id.clone(),
        deployed_at: openstream_timestamp(),
        ..Default::default()
      })
      .await
      .unwrap();
    store.delete_app(&app.id).await.unwrap();
    assert!(
      store
        .find_app_by_subdomain(&app.subdomain)
        .await
        .unwrap()
        .is_none()
    );
    assert!(
      store.list_deployments(&app.id).await.unwrap().is_empty()
    );
  }
}
