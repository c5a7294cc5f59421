use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::scope::ScopeRef;
use crate::value::Value;

use super::crypto::{CryptoError, Passphrase};

/// Errors raised while converting between live values and persisted JSON.
#[derive(Debug, Error)]
pub enum CodecError {
  /// A secret was serialized but the scope has no passphrase configured.
  #[error("cannot serialize secret '{0}' without a passphrase")]
  MissingPassphrase(String),

  /// A persisted secret was read but no passphrase is available to decrypt it.
  #[error("cannot decrypt secret '{0}' without a passphrase")]
  MissingDecryptionPassphrase(String),

  #[error("secret '{name}': {source}")]
  Crypto {
    name: String,
    #[source]
    source: CryptoError,
  },

  /// An output handle was serialized before it resolved.
  #[error("cannot serialize unresolved output {0}")]
  Unresolved(String),

  /// An output handle failed; its value can never be serialized.
  #[error("cannot serialize failed output {0}")]
  FailedOutput(String),

  /// A `@scope` reference was read without a live scope to bind it to.
  #[error("scope reference found but no scope is available for deserialization")]
  NoScope,

  /// A tagged node does not have the expected shape.
  #[error("malformed {tag} value: {message}")]
  Malformed { tag: &'static str, message: String },

  /// The transform hook rejected a node.
  #[error("transform failed: {0}")]
  Transform(String),
}

/// How secrets are written by the serializer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecretMode {
  /// Encrypt with the configured passphrase (persisted form).
  #[default]
  Encrypt,
  /// Replace the payload with a SHA-256 fingerprint. Only used to compare
  /// values; the result must never be persisted.
  Fingerprint,
}

/// Options for [`serialize`](super::serialize).
#[derive(Debug, Clone, Default)]
pub struct SerializeOptions {
  pub passphrase: Option<Passphrase>,
  pub secrets: SecretMode,
  /// scrypt work factor (log2 N) for new ciphertexts; `None` calibrates.
  pub work_factor: Option<u8>,
}

impl SerializeOptions {
  pub fn fingerprint() -> Self {
    Self {
      secrets: SecretMode::Fingerprint,
      ..Self::default()
    }
  }
}

/// Per-node hook consulted before the default deserialization.
///
/// Returning `Ok(Some(value))` replaces the node (and its whole subtree),
/// `Ok(None)` falls through to the default handling.
pub type Transform = Arc<dyn Fn(&JsonValue) -> Result<Option<Value>, CodecError> + Send + Sync>;

/// Options for [`deserialize`](super::deserialize).
#[derive(Clone, Default)]
pub struct DeserializeOptions {
  pub passphrase: Option<Passphrase>,
  /// Live scope that `@scope` references resolve to.
  pub scope: Option<ScopeRef>,
  pub transform: Option<Transform>,
}

impl fmt::Debug for DeserializeOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DeserializeOptions")
      .field("passphrase", &self.passphrase)
      .field("scope", &self.scope)
      .field("transform", &self.transform.as_ref().map(|_| "<fn>"))
      .finish()
  }
}
