use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Lifecycle status of a persisted resource.
///
/// `Creating`, `Updating` and `DeletedPending` are in-flight markers: they are
/// written before the provider runs, so finding one on load means the previous
/// run stopped mid-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
  Creating,
  Created,
  Updating,
  Updated,
  DeletedPending,
}

impl Status {
  /// True once the last create/update finished successfully.
  pub fn is_settled(self) -> bool {
    matches!(self, Status::Created | Status::Updated)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Status::Creating => "creating",
      Status::Created => "created",
      Status::Updating => "updating",
      Status::Updated => "updated",
      Status::DeletedPending => "deleted-pending",
    }
  }
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A replaced predecessor waiting to be deleted.
///
/// Captured when a provider calls `replace()`, so the old external resource
/// can be deleted after its successor exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDeletion {
  #[serde(default)]
  pub data: Map<String, JsonValue>,
  #[serde(default)]
  pub inputs: JsonValue,
  #[serde(default)]
  pub output: JsonValue,
}

/// Persisted record of one resource.
///
/// All value fields hold the codec's serialized form, so secrets inside them
/// are already encrypted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
  /// Resource kind of the provider that owns this record.
  pub provider: String,
  pub status: Status,
  /// Creation sequence number from the last run that declared the resource.
  #[serde(default)]
  pub seq: u64,
  /// Provider-private scratch data.
  #[serde(default)]
  pub data: Map<String, JsonValue>,
  /// Inputs of the last apply.
  #[serde(default)]
  pub inputs: JsonValue,
  #[serde(default, skip_serializing_if = "JsonValue::is_null")]
  pub old_inputs: JsonValue,
  /// Output of the last successful apply; null until one finished.
  #[serde(default)]
  pub output: JsonValue,
  /// Fully-qualified names of resources this one's inputs referenced.
  #[serde(default)]
  pub deps: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub pending_deletions: Vec<PendingDeletion>,
}

impl StateRecord {
  /// Fresh record for a resource that has never been applied.
  pub fn new(provider: impl Into<String>, seq: u64) -> Self {
    Self {
      provider: provider.into(),
      status: Status::Creating,
      seq,
      data: Map::new(),
      inputs: JsonValue::Null,
      old_inputs: JsonValue::Null,
      output: JsonValue::Null,
      deps: Vec::new(),
      pending_deletions: Vec::new(),
    }
  }
}

/// Where a scope's state lives: the root scope's name, the stage and the
/// names of the nested scopes below the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreLocation {
  pub root: Option<String>,
  pub stage: String,
  pub scopes: Vec<String>,
}

impl StoreLocation {
  pub fn new(root: Option<String>, stage: impl Into<String>, scopes: Vec<String>) -> Self {
    Self {
      root,
      stage: stage.into(),
      scopes,
    }
  }

  /// Location of a nested scope called `name` below this one.
  pub fn child(&self, name: &str) -> Self {
    let mut scopes = self.scopes.clone();
    scopes.push(name.to_string());
    Self {
      root: self.root.clone(),
      stage: self.stage.clone(),
      scopes,
    }
  }

  /// Relative directory for this location: `<root>/<stage>/<nested scopes...>`.
  ///
  /// The stage sits right below the root scope so every stage of an app gets
  /// its own tree.
  pub fn relative_dir(&self) -> PathBuf {
    let mut dir = PathBuf::new();
    if let Some(root) = &self.root {
      dir.push(root);
    }
    dir.push(&self.stage);
    for name in &self.scopes {
      dir.push(name);
    }
    dir
  }
}

impl fmt::Display for StoreLocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.relative_dir().display())
  }
}

/// Errors that can occur when working with a state store.
#[derive(Debug, Error)]
pub enum StateError {
  /// Failed to read a state record.
  #[error("failed to read state for '{id}': {source}")]
  Read {
    id: String,
    #[source]
    source: io::Error,
  },

  /// Failed to write a state record.
  #[error("failed to write state for '{id}': {source}")]
  Write {
    id: String,
    #[source]
    source: io::Error,
  },

  /// Failed to remove a state record.
  #[error("failed to remove state for '{id}': {source}")]
  Remove {
    id: String,
    #[source]
    source: io::Error,
  },

  /// Failed to create or list the state directory.
  #[error("failed to access state directory {path}: {source}")]
  Dir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Failed to parse a state record.
  #[error("failed to parse state for '{id}': {source}")]
  Parse {
    id: String,
    #[source]
    source: serde_json::Error,
  },

  /// Failed to serialize a state record.
  #[error("failed to serialize state for '{id}': {source}")]
  Serialize {
    id: String,
    #[source]
    source: serde_json::Error,
  },
}
