#[macro_use]
extern crate tracing;

use openstream_core::{
  config, reconcile, startup, state::CoreState, tasks::TaskEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();

  let config = config::load()?;
  logger::init(&config.logging)?;

  info!(
    "Openstream Core version: v{}",
    env!("CARGO_PKG_VERSION")
  );
  info!("{config:?}");

  let state = CoreState::load(config).await?;

  startup::on_startup(&state).await;

  let _tasks = TaskEngine::spawn(state.clone());
  reconcile::spawn_reconcile_loop(state.clone());

  info!("openstream core is up");

  tokio::signal::ctrl_c().await?;
  info!("shutting down");

  Ok(())
}
