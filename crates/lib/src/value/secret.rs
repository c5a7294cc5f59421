//! Secrets: named plaintext payloads that are never persisted unencrypted.
//!
//! A [`Secret`] wraps its payload in [`SecretString`] so it is redacted from
//! `Debug` output. Secrets are registered by name in a [`SecretRegistry`]
//! owned by the root scope, which lets sandboxed code look them up later.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use age::secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::debug;

use crate::consts::SECRET_ENV_PREFIX;

/// Errors raised by secret creation and registration.
#[derive(Debug, Error)]
pub enum SecretError {
  /// A secret with this name is already registered.
  #[error("secret '{0}' is already registered")]
  Duplicate(String),

  /// The environment variable backing a secret is not set.
  #[error("environment variable '{0}' is not set")]
  MissingEnv(String),
}

/// A named sensitive value.
#[derive(Clone)]
pub struct Secret {
  name: String,
  value: Arc<SecretString>,
}

impl Secret {
  pub fn new(name: impl Into<String>, plaintext: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      value: Arc::new(SecretString::from(plaintext.into())),
    }
  }

  /// Read a secret from the environment variable `var`; the secret is named after it.
  pub fn from_env(var: &str) -> Result<Self, SecretError> {
    let value = std::env::var(var).map_err(|_| SecretError::MissingEnv(var.to_string()))?;
    Ok(Self::new(var, value))
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Access the plaintext payload.
  pub fn expose(&self) -> &str {
    self.value.expose_secret()
  }
}

impl fmt::Debug for Secret {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Secret")
      .field("name", &self.name)
      .field("value", &"[REDACTED]")
      .finish()
  }
}

impl PartialEq for Secret {
  fn eq(&self, other: &Self) -> bool {
    self.name == other.name && self.expose() == other.expose()
  }
}

/// Environment variable consulted for a secret named `name` when secrets are
/// injected from the environment instead of decrypted.
///
/// The name is upper-cased and every character outside `[A-Z0-9_]` becomes `_`,
/// e.g. `db-password` maps to `CAIRN_SECRET_DB_PASSWORD`.
pub fn secret_env_var(name: &str) -> String {
  let normalized: String = name
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
    .collect();
  format!("{}{}", SECRET_ENV_PREFIX, normalized)
}

/// Name-keyed registry of secrets created during a run.
#[derive(Debug, Default)]
pub struct SecretRegistry {
  secrets: RwLock<BTreeMap<String, Secret>>,
}

impl SecretRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a secret. Registering a second secret under the same name is an error.
  pub fn register(&self, secret: Secret) -> Result<(), SecretError> {
    let mut secrets = self.secrets.write().unwrap_or_else(|e| e.into_inner());
    if secrets.contains_key(secret.name()) {
      return Err(SecretError::Duplicate(secret.name().to_string()));
    }
    debug!(name = %secret.name(), "registered secret");
    secrets.insert(secret.name().to_string(), secret);
    Ok(())
  }

  pub fn get(&self, name: &str) -> Option<Secret> {
    self.secrets.read().unwrap_or_else(|e| e.into_inner()).get(name).cloned()
  }

  pub fn names(&self) -> Vec<String> {
    self.secrets.read().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.secrets.read().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
