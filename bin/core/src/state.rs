use std::sync::Arc;

use anyhow::Context;
use openstream_client::entities::config::CoreConfig;

use crate::{
  docker::{ContainerEngine, DockerEngine},
  dockerfile::BaseDockerfiles,
  proxy::NginxManager,
  store::{CatalogStore, MemoryStore},
};

/// Everything the pipelines and the request surface need, built once
/// at startup and passed by Arc. Components never read the
/// environment themselves.
pub struct CoreState {
  pub config: CoreConfig,
  pub store: Arc<dyn CatalogStore>,
  pub engine: Arc<dyn ContainerEngine>,
  pub proxy: NginxManager,
  pub bases: BaseDockerfiles,
}

impl CoreState {
  pub async fn load(
    config: CoreConfig,
  ) -> anyhow::Result<Arc<CoreState>> {
    if !config.database_address.is_empty() {
      anyhow::bail!(
        "no catalog backend is bundled for database_address {} | leave it empty to use the in-memory catalog",
        config.database_address
      );
    }
    let store: Arc<dyn CatalogStore> = Arc::new(MemoryStore::new());
    let engine: Arc<dyn ContainerEngine> = Arc::new(
      DockerEngine::new(&config.docker_host)
        .context("failed to initialize container engine")?,
    );
    let proxy = NginxManager::new(&config);
    let bases = BaseDockerfiles::load(&config.base_dockerfile_dir)
      .await
      .context("failed to load base dockerfiles")?;
    Ok(Arc::new(CoreState {
      config,
      store,
      engine,
      proxy,
      bases,
    }))
  }
}
