use anyhow::Context;
use openstream_client::entities::logger::{
  LogConfig, LogLevel, StdioLogMode,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
  Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

pub fn init(config: &LogConfig) -> anyhow::Result<()> {
  let log_level = tracing_level(config.level);

  let registry =
    Registry::default().with(LevelFilter::from(log_level));

  match (config.stdio, config.pretty) {
    (StdioLogMode::Standard, true) => registry
      .with(
        tracing_subscriber::fmt::layer()
          .pretty()
          .with_file(false)
          .with_line_number(false),
      )
      .try_init(),
    (StdioLogMode::Standard, false) => registry
      .with(
        tracing_subscriber::fmt::layer()
          .with_file(false)
          .with_line_number(false),
      )
      .try_init(),
    (StdioLogMode::Json, _) => registry
      .with(tracing_subscriber::fmt::layer().json())
      .try_init(),
    (StdioLogMode::None, _) => Ok(()),
  }
  .context("failed to init logger")
}

pub fn tracing_level(level: LogLevel) -> tracing::Level {
  match level {
    LogLevel::Trace => tracing::Level::TRACE,
    LogLevel::Debug => tracing::Level::DEBUG,
    LogLevel::Info => tracing::Level::INFO,
    LogLevel::Warn => tracing::Level::WARN,
    LogLevel::Error => tracing::Level::ERROR,
  }
}
