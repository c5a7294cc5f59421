//! Providers and the registry that maps resource kinds to them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::consts::SCOPE_KIND;
use crate::value::Value;

use super::context::Context;

/// Error type returned by providers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The single lifecycle function behind a resource kind.
///
/// `ctx.event()` tells the provider whether to create, update or delete.
/// For deletes `inputs` holds the last applied inputs and the returned value
/// is ignored.
#[async_trait]
pub trait Provider: Send + Sync {
  async fn run(&self, ctx: Context, inputs: Value) -> Result<Value, BoxError>;
}

/// Adapter turning an async closure into a [`Provider`].
pub struct FnProvider<F> {
  f: F,
}

#[async_trait]
impl<F, Fut> Provider for FnProvider<F>
where
  F: Fn(Context, Value) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Value, BoxError>> + Send,
{
  async fn run(&self, ctx: Context, inputs: Value) -> Result<Value, BoxError> {
    (self.f)(ctx, inputs).await
  }
}

/// Wrap an async closure as a provider.
pub fn provider_fn<F, Fut>(f: F) -> FnProvider<F>
where
  F: Fn(Context, Value) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Value, BoxError>> + Send,
{
  FnProvider { f }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
  #[error("provider '{0}' is already registered")]
  Duplicate(String),

  #[error("'{0}' is reserved for nested scopes")]
  Reserved(String),
}

/// Providers keyed by resource kind. Each kind registers exactly once.
#[derive(Default)]
pub struct ProviderRegistry {
  providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&self, kind: impl Into<String>, provider: impl Provider + 'static) -> Result<(), RegistryError> {
    let kind = kind.into();
    if kind == SCOPE_KIND {
      return Err(RegistryError::Reserved(kind));
    }
    let mut providers = self.providers.write().unwrap_or_else(|e| e.into_inner());
    if providers.contains_key(&kind) {
      return Err(RegistryError::Duplicate(kind));
    }
    debug!(kind = %kind, "registered provider");
    providers.insert(kind, Arc::new(provider));
    Ok(())
  }

  /// Shorthand for `register(kind, provider_fn(f))`.
  pub fn register_fn<F, Fut>(&self, kind: impl Into<String>, f: F) -> Result<(), RegistryError>
  where
    F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
  {
    self.register(kind, provider_fn(f))
  }

  pub fn get(&self, kind: &str) -> Option<Arc<dyn Provider>> {
    let providers = self.providers.read().unwrap_or_else(|e| e.into_inner());
    providers.get(kind).cloned()
  }

  pub fn contains(&self, kind: &str) -> bool {
    let providers = self.providers.read().unwrap_or_else(|e| e.into_inner());
    providers.contains_key(kind)
  }

  /// Registered kinds, sorted.
  pub fn kinds(&self) -> Vec<String> {
    let providers = self.providers.read().unwrap_or_else(|e| e.into_inner());
    let mut kinds: Vec<_> = providers.keys().cloned().collect();
    kinds.sort();
    kinds
  }
}

impl std::fmt::Debug for ProviderRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ProviderRegistry").field("kinds", &self.kinds()).finish()
  }
}
