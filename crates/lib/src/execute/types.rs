//! Types for resource reconciliation and deletion.

use thiserror::Error;

use crate::codec::CodecError;
use crate::resource::{BoxError, OutputError};
use crate::scope::Scope;
use crate::state::{StateError, StateRecord};

/// Errors that can occur while applying a resource.
///
/// Every variant carries the fully-qualified name of the resource.
#[derive(Debug, Error)]
pub enum ApplyError {
  /// No provider is registered for the resource kind.
  #[error("{fqn}: no provider registered for '{kind}'")]
  UnknownProvider { fqn: String, kind: String },

  /// A resource referenced by the inputs failed.
  #[error("{fqn}: input dependency failed: {source}")]
  Dependency {
    fqn: String,
    #[source]
    source: OutputError,
  },

  /// Inputs or outputs could not be (de)serialized.
  #[error("{fqn}: {source}")]
  Codec {
    fqn: String,
    #[source]
    source: CodecError,
  },

  #[error("{fqn}: {source}")]
  State {
    fqn: String,
    #[source]
    source: StateError,
  },

  /// Phase `read` found no state for the resource.
  #[error("{fqn}: no state recorded")]
  NotFound { fqn: String },

  /// The provider's lifecycle function failed.
  #[error("{fqn}: provider failed: {source}")]
  Provider {
    fqn: String,
    #[source]
    source: BoxError,
  },
}

/// Errors that can occur while deleting a resource.
#[derive(Debug, Error)]
pub enum DestroyError {
  #[error("{fqn}: no provider registered for '{kind}'")]
  UnknownProvider { fqn: String, kind: String },

  #[error("{fqn}: {source}")]
  Codec {
    fqn: String,
    #[source]
    source: CodecError,
  },

  #[error("{fqn}: {source}")]
  State {
    fqn: String,
    #[source]
    source: StateError,
  },

  #[error("{fqn}: provider failed to delete: {source}")]
  Provider {
    fqn: String,
    #[source]
    source: BoxError,
  },

  /// A parallel deletion task panicked or was cancelled.
  #[error("{fqn}: deletion task failed: {message}")]
  Task { fqn: String, message: String },
}

impl ApplyError {
  pub fn fqn(&self) -> &str {
    match self {
      ApplyError::UnknownProvider { fqn, .. }
      | ApplyError::Dependency { fqn, .. }
      | ApplyError::Codec { fqn, .. }
      | ApplyError::State { fqn, .. }
      | ApplyError::NotFound { fqn }
      | ApplyError::Provider { fqn, .. } => fqn,
    }
  }
}

impl DestroyError {
  pub fn fqn(&self) -> &str {
    match self {
      DestroyError::UnknownProvider { fqn, .. }
      | DestroyError::Codec { fqn, .. }
      | DestroyError::State { fqn, .. }
      | DestroyError::Provider { fqn, .. }
      | DestroyError::Task { fqn, .. } => fqn,
    }
  }
}

/// A recorded resource scheduled for deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyTarget {
  pub id: String,
  pub fqn: String,
  pub kind: String,
  pub seq: u64,
}

impl DestroyTarget {
  pub fn from_record(scope: &Scope, id: &str, record: &StateRecord) -> Self {
    Self {
      id: id.to_string(),
      fqn: scope.fqn(id),
      kind: record.provider.clone(),
      seq: record.seq,
    }
  }
}
