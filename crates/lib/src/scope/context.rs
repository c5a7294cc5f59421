//! The ambient current scope.
//!
//! Held in a tokio task-local, so it follows the future it was entered with.
//! Spawned reconciliation tasks re-enter their scope explicitly.

use std::future::Future;
use std::sync::Arc;

use tokio::task::futures::TaskLocalFuture;

use super::Scope;

tokio::task_local! {
  static CURRENT_SCOPE: Arc<Scope>;
}

/// The innermost scope entered by the running task, if any.
pub fn current() -> Option<Arc<Scope>> {
  CURRENT_SCOPE.try_with(Arc::clone).ok()
}

/// Run `fut` with `scope` as the current scope.
pub fn enter<F: Future>(scope: Arc<Scope>, fut: F) -> TaskLocalFuture<Arc<Scope>, F> {
  CURRENT_SCOPE.scope(scope, fut)
}
