//! Resources: declaration, output handles and providers.
//!
//! Declaring a resource registers a pending [`Output`] in the current scope
//! and spawns its reconciliation. The handle settles once the provider (or the
//! skip rule) produced an output.
//!
//! # Submodules
//!
//! - [`output`] - the lazily-resolved handle and its projections
//! - [`provider`] - the provider trait and registry
//! - [`context`] - what a provider sees while it runs

pub mod context;
pub mod output;
pub mod provider;

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, warn};

use crate::execute;
use crate::scope::{self, Scope};
use crate::util::lock;
use crate::value::Value;

pub use context::{Context, ContextError, Event};
pub use output::{Output, OutputError, ResourceMeta, SettleGuard};
pub use provider::{BoxError, FnProvider, Provider, ProviderRegistry, RegistryError, provider_fn};

#[derive(Debug, Error)]
pub enum ResourceError {
  #[error("no active scope: resources must be declared inside a scope")]
  NoActiveScope,

  /// The id is already taken by a nested scope.
  #[error("id '{id}' in scope {scope} is already used by a nested scope")]
  IdConflict { scope: String, id: String },
}

/// Per-declaration flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceOptions {
  /// Call the provider even when the inputs did not change.
  pub always_update: bool,
}

impl ResourceOptions {
  pub fn always_update() -> Self {
    Self { always_update: true }
  }
}

/// Declare a resource in the current scope.
pub fn declare(kind: impl Into<String>, id: impl Into<String>, inputs: impl Into<Value>) -> Result<Output, ResourceError> {
  declare_with(kind, id, inputs, ResourceOptions::default())
}

/// [`declare`] with explicit options.
pub fn declare_with(
  kind: impl Into<String>,
  id: impl Into<String>,
  inputs: impl Into<Value>,
  options: ResourceOptions,
) -> Result<Output, ResourceError> {
  let scope = scope::current().ok_or(ResourceError::NoActiveScope)?;
  scope.declare(kind, id, inputs, options)
}

impl Scope {
  /// Declare a resource in this scope.
  ///
  /// Declaring an id twice logs a warning and returns the first handle; no
  /// second reconciliation starts. Must be called from within a tokio runtime.
  pub fn declare(
    self: &Arc<Self>,
    kind: impl Into<String>,
    id: impl Into<String>,
    inputs: impl Into<Value>,
    options: ResourceOptions,
  ) -> Result<Output, ResourceError> {
    let id = id.into();
    let inputs = inputs.into();

    let output = {
      let mut resources = lock(self.resources());
      if let Some(existing) = resources.get(&id) {
        warn!(fqn = %self.fqn(&id), "resource already declared, reusing the existing handle");
        return Ok(existing.clone());
      }
      if lock(self.children()).contains_key(&id) {
        return Err(ResourceError::IdConflict { scope: self.path(), id });
      }

      let meta = ResourceMeta::new(id.clone(), self.fqn(&id), kind, self.next_seq())
        .with_inputs(inputs.clone())
        .with_scope(self.scope_ref());
      let output = Output::for_resource(meta);
      resources.insert(id, output.clone());
      output
    };

    let scope = Arc::clone(self);
    let handle = output.clone();
    let task = tokio::spawn(scope::enter(Arc::clone(self), async move {
      let _guard = handle.drop_guard();
      let Some(meta) = handle.meta() else {
        return;
      };
      match execute::apply(&scope, meta, inputs, options).await {
        Ok(value) => {
          let _ = handle.provide(value);
        }
        Err(err) => {
          error!(fqn = %meta.fqn, error = %err, "resource failed");
          scope.record_failure(err.to_string());
          let _ = handle.fail(OutputError::Failed {
            fqn: meta.fqn.clone(),
            message: err.to_string(),
          });
        }
      }
    }));
    self.track(task);

    Ok(output)
  }
}
