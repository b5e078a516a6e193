use std::sync::Arc;

use openstream_client::entities::task::TaskProgress;
use tokio_util::sync::CancellationToken;

use crate::store::CatalogStore;

/// Writer half of a task's progress: persists the last observed
/// `{current, total, message}` and doubles as the cancellation
/// checkpoint pipelines poll between units of work.
#[derive(Clone)]
pub struct ProgressHandle {
  store: Arc<dyn CatalogStore>,
  task_id: String,
  token: CancellationToken,
}

impl ProgressHandle {
  pub fn new(
    store: Arc<dyn CatalogStore>,
    task_id: String,
    token: CancellationToken,
  ) -> ProgressHandle {
    ProgressHandle {
      store,
      task_id,
      token,
    }
  }

  /// Persists a progress update. `current` is monotonic within a
  /// phase; starting a new phase resets it with a new `total`.
  /// Store failures only log, progress is best effort.
  pub async fn update(
    &self,
    current: u64,
    total: u64,
    message: impl Into<String>,
  ) {
    let message = message.into();
    debug!(
      "task {} progress {current}/{total} | {message}",
      self.task_id
    );
    let result = self
      .store
      .mutate_task(
        &self.task_id,
        Box::new(move |task| {
          task.progress = TaskProgress {
            current,
            total,
            message,
          };
        }),
      )
      .await;
    if let Err(e) = result {
      warn!(
        "failed to persist progress for task {} | {e:#}",
        self.task_id
      );
    }
  }

  pub fn cancelled(&self) -> bool {
    self.token.is_cancelled()
  }
}
