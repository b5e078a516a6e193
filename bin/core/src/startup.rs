use std::sync::Arc;

use openstream_client::entities::app::AppStatus;

use crate::{docker, state::CoreState};

/// Startup reconciliation: statuses stranded mid pipeline by a
/// previous process move to error, the shared network is ensured,
/// and leftover containers / fragments are swept against the
/// catalog.
pub async fn on_startup(state: &Arc<CoreState>) {
  let apps = match state.store.list_apps().await {
    Ok(apps) => apps,
    Err(e) => {
      error!("startup: failed to list apps | {e:#}");
      return;
    }
  };

  for app in &apps {
    if matches!(
      app.status,
      AppStatus::Building | AppStatus::Deploying | AppStatus::Stopping
    ) {
      warn!(
        "startup: app {} was left {} by a previous run, marking error",
        app.id, app.status
      );
      let result = state
        .store
        .mutate_app(
          &app.id,
          Box::new(|app| app.status = AppStatus::Error),
        )
        .await;
      if let Err(e) = result {
        error!("startup: failed to mark app {} | {e:#}", app.id);
      }
    }
  }

  if !state.engine.ping().await {
    warn!(
      "startup: container engine is unreachable, skipping network and orphan checks"
    );
    return;
  }

  if let Err(e) =
    state.engine.ensure_network(&state.config.network_name).await
  {
    error!(
      "startup: failed to ensure network {} | {e:#}",
      state.config.network_name
    );
  }

  if apps.is_empty() {
    // a cold catalog has nothing to reconcile against; sweeping now
    // would remove every platform container
    debug!("startup: catalog is empty, skipping orphan sweep");
    return;
  }

  let active_ids =
    apps.iter().map(|app| app.id.clone()).collect::<Vec<_>>();
  match docker::cleanup_orphans(state.engine.as_ref(), &active_ids)
    .await
  {
    Ok(removed) if !removed.is_empty() => {
      info!("startup: removed orphan containers {removed:?}");
    }
    Ok(_) => {}
    Err(e) => {
      error!("startup: orphan container sweep failed | {e:#}");
    }
  }

  let active_subdomains = apps
    .iter()
    .filter(|app| app.status == AppStatus::Running)
    .map(|app| app.subdomain.clone())
    .collect::<Vec<_>>();
  match state.proxy.cleanup(&active_subdomains).await {
    Ok(removed) if !removed.is_empty() => {
      info!("startup: removed stale fragments {removed:?}");
    }
    Ok(_) => {}
    Err(e) => {
      error!("startup: fragment sweep failed | {e:#}");
    }
  }
}
