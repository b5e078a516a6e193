use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Credential used to clone private repositories. The catalog layer
/// owns encryption at rest; the core only ever sees the decrypted
/// secret, and redacts it from all logs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitCredential {
  pub id: String,
  pub owner_id: String,
  pub name: String,
  /// Git provider domain, eg `github.com`.
  #[serde(default = "default_provider")]
  pub provider: String,
  #[serde(default)]
  pub auth_kind: AuthKind,
  pub secret: String,
}

pub fn default_provider() -> String {
  String::from("github.com")
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuthKind {
  #[default]
  Token,
  SshKey,
}
