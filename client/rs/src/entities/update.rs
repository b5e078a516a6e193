use serde::{Deserialize, Serialize};

use super::openstream_timestamp;

/// The result of a single stage of work (usually one shell command),
/// as stored on tasks and deployments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Log {
  pub stage: String,
  pub command: String,
  pub stdout: String,
  pub stderr: String,
  pub success: bool,
  pub start_ts: i64,
  pub end_ts: i64,
}

impl Log {
  pub fn simple(stage: &str, msg: String) -> Log {
    let ts = openstream_timestamp();
    Log {
      stage: stage.to_string(),
      stdout: msg,
      success: true,
      start_ts: ts,
      end_ts: ts,
      ..Default::default()
    }
  }

  pub fn error(stage: &str, msg: String) -> Log {
    let ts = openstream_timestamp();
    Log {
      stage: stage.to_string(),
      stderr: msg,
      success: false,
      start_ts: ts,
      end_ts: ts,
      ..Default::default()
    }
  }

  /// stdout and stderr joined, stdout first.
  pub fn combined(&self) -> String {
    match (self.stdout.is_empty(), self.stderr.is_empty()) {
      (true, true) => String::new(),
      (false, true) => self.stdout.clone(),
      (true, false) => self.stderr.clone(),
      (false, false) => {
        format!("{}\n\n{}", self.stdout, self.stderr)
      }
    }
  }
}

/// Keeps the tail of `text`, respecting char boundaries.
pub fn truncate_front(text: &str, max_bytes: usize) -> String {
  if text.len() <= max_bytes {
    return text.to_string();
  }
  let mut start = text.len() - max_bytes;
  while !text.is_char_boundary(start) {
    start += 1;
  }
  text[start..].to_string()
}
