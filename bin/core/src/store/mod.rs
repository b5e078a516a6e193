use async_trait::async_trait;
use openstream_client::entities::{
  app::App,
  credential::GitCredential,
  deployment::Deployment,
  task::{Task, TaskKind},
};

mod memory;

pub use memory::MemoryStore;

/// Row level failures surfaced to the request layer. `Conflict`
/// carries invariant violations (duplicate subdomain, concurrent
/// task of the same kind), which must leave no state change behind.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("{0} not found")]
  NotFound(String),
  #[error("{0}")]
  Conflict(String),
  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

/// Narrow interface over the catalog backend. The bundled
/// implementation is [MemoryStore]; a relational backend plugs in
/// behind the same trait via `database_address`.
#[async_trait]
pub trait CatalogStore: Send + Sync {
  // ids
  async fn next_app_id(&self) -> Result<String, StoreError>;

  // apps
  async fn create_app(&self, app: App) -> Result<App, StoreError>;
  async fn get_app(&self, id: &str) -> Result<App, StoreError>;
  /// Full row replace for quiescent edits. Concurrency sensitive
  /// transitions go through [mutate_app][CatalogStore::mutate_app].
  async fn update_app(&self, app: App) -> Result<App, StoreError>;
  /// Applies `mutate` under the row lock and returns the result.
  async fn mutate_app(
    &self,
    id: &str,
    mutate: Box<dyn for<'a> FnOnce(&'a mut App) + Send>,
  ) -> Result<App, StoreError>;
  /// Deletes the app row and its deployment history.
  async fn delete_app(&self, id: &str) -> Result<App, StoreError>;
  async fn list_apps(&self) -> Result<Vec<App>, StoreError>;
  async fn list_apps_by_owner(
    &self,
    owner_id: &str,
  ) -> Result<Vec<App>, StoreError>;
  async fn list_public_apps(&self) -> Result<Vec<App>, StoreError>;
  async fn find_app_by_subdomain(
    &self,
    subdomain: &str,
  ) -> Result<Option<App>, StoreError>;

  /// Compare and set of the app's per kind task slot: succeeds only
  /// when the slot is empty or holds a terminal task, so at most one
  /// non terminal task of each kind exists per app.
  async fn claim_task_slot(
    &self,
    app_id: &str,
    kind: TaskKind,
    task_id: &str,
  ) -> Result<App, StoreError>;

  // tasks
  async fn create_task(&self, task: Task)
  -> Result<Task, StoreError>;
  async fn get_task(&self, id: &str) -> Result<Task, StoreError>;
  async fn mutate_task(
    &self,
    id: &str,
    mutate: Box<dyn for<'a> FnOnce(&'a mut Task) + Send>,
  ) -> Result<Task, StoreError>;

  // deployments
  async fn create_deployment(
    &self,
    deployment: Deployment,
  ) -> Result<Deployment, StoreError>;
  async fn latest_deployment(
    &self,
    app_id: &str,
  ) -> Result<Option<Deployment>, StoreError>;
  async fn list_deployments(
    &self,
    app_id: &str,
  ) -> Result<Vec<Deployment>, StoreError>;

  // credentials
  async fn create_credential(
    &self,
    credential: GitCredential,
  ) -> Result<GitCredential, StoreError>;
  async fn get_credential(
    &self,
    id: &str,
  ) -> Result<GitCredential, StoreError>;
  async fn delete_credential(
    &self,
    id: &str,
  ) -> Result<GitCredential, StoreError>;
}
