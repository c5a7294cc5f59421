//! Deletion of recorded resources.
//!
//! Deleting is idempotent: a target without a record is already gone. The
//! record is marked `deleted-pending` before the provider runs and removed
//! only after it succeeded, so an interrupted delete is retried next time.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::codec::{self, CodecError};
use crate::consts::SCOPE_KIND;
use crate::resource::context::{ContextInit, Journal};
use crate::resource::{Context, Event, Output, Provider};
use crate::scope::{DestroyStrategy, Scope};
use crate::state::{StateError, StateRecord, Status};
use crate::util::lock;

use super::types::{DestroyError, DestroyTarget};

fn state_err(fqn: &str) -> impl Fn(StateError) -> DestroyError + '_ {
  move |source| DestroyError::State {
    fqn: fqn.to_string(),
    source,
  }
}

fn codec_err(fqn: &str) -> impl Fn(CodecError) -> DestroyError + '_ {
  move |source| DestroyError::Codec {
    fqn: fqn.to_string(),
    source,
  }
}

fn lookup_provider(scope: &Scope, fqn: &str, kind: &str) -> Result<Arc<dyn Provider>, DestroyError> {
  scope.providers().get(kind).ok_or_else(|| DestroyError::UnknownProvider {
    fqn: fqn.to_string(),
    kind: kind.to_string(),
  })
}

/// Delete one recorded resource, or tear down a recorded nested scope.
pub async fn destroy(scope: &Arc<Scope>, target: &DestroyTarget) -> Result<(), DestroyError> {
  let fqn = target.fqn.as_str();
  let store = Arc::clone(scope.store());

  if target.kind == SCOPE_KIND {
    let child = scope.detached_child(&target.id);
    info!(scope = %child.path(), "destroying nested scope");
    child.teardown().await?;
    store.delete(&target.id).await.map_err(state_err(fqn))?;
    return Ok(());
  }

  let provider = lookup_provider(scope, fqn, &target.kind)?;
  let Some(record) = store.get(&target.id).await.map_err(state_err(fqn))? else {
    debug!(fqn = %fqn, "no state recorded, nothing to delete");
    return Ok(());
  };
  let mut record = drain_pending(scope, provider.as_ref(), &target.id, record).await?;

  record.status = Status::DeletedPending;
  store.set(&target.id, &record).await.map_err(state_err(fqn))?;
  if scope.is_quiet() {
    debug!(fqn = %fqn, status = %record.status, "resource");
  } else {
    info!(fqn = %fqn, status = %record.status, "resource");
  }

  let deserialize_options = scope.deserialize_options();
  let inputs = codec::deserialize(&record.inputs, &deserialize_options).map_err(codec_err(fqn))?;
  let output = codec::deserialize(&record.output, &deserialize_options).map_err(codec_err(fqn))?;
  let ctx = Context::new(ContextInit {
    stage: scope.stage().to_string(),
    id: target.id.clone(),
    fqn: fqn.to_string(),
    event: Event::Delete,
    output,
    record,
    journal: Some(Journal {
      store: Arc::clone(&store),
      serialize: scope.serialize_options(),
    }),
    deserialize: deserialize_options,
  });

  provider
    .run(ctx, inputs)
    .await
    .map_err(|source| DestroyError::Provider {
      fqn: fqn.to_string(),
      source,
    })?;

  store.delete(&target.id).await.map_err(state_err(fqn))?;
  info!(fqn = %fqn, "deleted");
  Ok(())
}

/// Delete every replaced predecessor recorded under `id`.
pub async fn delete_pending(scope: &Arc<Scope>, id: &str, record: StateRecord) -> Result<StateRecord, DestroyError> {
  let fqn = scope.fqn(id);
  let provider = lookup_provider(scope, &fqn, &record.provider)?;
  drain_pending(scope, provider.as_ref(), id, record).await
}

async fn drain_pending(
  scope: &Scope,
  provider: &dyn Provider,
  id: &str,
  mut record: StateRecord,
) -> Result<StateRecord, DestroyError> {
  let fqn = scope.fqn(id);
  let deserialize_options = scope.deserialize_options();

  while let Some(predecessor) = record.pending_deletions.first().cloned() {
    let inputs = codec::deserialize(&predecessor.inputs, &deserialize_options).map_err(codec_err(&fqn))?;
    let output = codec::deserialize(&predecessor.output, &deserialize_options).map_err(codec_err(&fqn))?;

    let mut snapshot = StateRecord::new(record.provider.clone(), record.seq);
    snapshot.status = Status::DeletedPending;
    snapshot.data = predecessor.data;
    snapshot.inputs = predecessor.inputs;
    snapshot.output = predecessor.output;

    // The predecessor's scratch data lives only for this call.
    let ctx = Context::new(ContextInit {
      stage: scope.stage().to_string(),
      id: id.to_string(),
      fqn: fqn.clone(),
      event: Event::Delete,
      output,
      record: snapshot,
      journal: None,
      deserialize: deserialize_options.clone(),
    });
    provider
      .run(ctx, inputs)
      .await
      .map_err(|source| DestroyError::Provider {
        fqn: fqn.clone(),
        source,
      })?;

    record.pending_deletions.remove(0);
    scope.store().set(id, &record).await.map_err(state_err(&fqn))?;
    info!(fqn = %fqn, "replaced predecessor deleted");
  }

  Ok(record)
}

/// Delete a batch of targets.
///
/// `Sequential` deletes newest first and stops at the first failure;
/// `Parallel` issues every delete at once and reports the first failure.
pub async fn destroy_all(
  scope: &Arc<Scope>,
  mut targets: Vec<DestroyTarget>,
  strategy: DestroyStrategy,
) -> Result<(), DestroyError> {
  match strategy {
    DestroyStrategy::Sequential => {
      targets.sort_by(|a, b| b.seq.cmp(&a.seq).then_with(|| b.id.cmp(&a.id)));
      for target in &targets {
        destroy(scope, target).await?;
      }
      Ok(())
    }
    DestroyStrategy::Parallel => {
      let mut set = JoinSet::new();
      for target in targets {
        let scope = Arc::clone(scope);
        set.spawn(async move { destroy(&scope, &target).await });
      }

      let mut first_error = None;
      while let Some(joined) = set.join_next().await {
        let result = joined.unwrap_or_else(|err| {
          Err(DestroyError::Task {
            fqn: scope.path(),
            message: err.to_string(),
          })
        });
        if let Err(err) = result {
          error!(fqn = %err.fqn(), error = %err, "delete failed");
          first_error.get_or_insert(err);
        }
      }
      first_error.map_or(Ok(()), Err)
    }
  }
}

/// Delete the resource behind `output` right away and forget it in its scope.
pub async fn destroy_resource(output: &Output) -> Result<(), DestroyError> {
  let Some(meta) = output.meta() else {
    warn!(output = %output.label(), "not a resource handle, nothing to delete");
    return Ok(());
  };
  let Some(scope) = meta.scope.as_ref().and_then(|s| s.upgrade()) else {
    warn!(fqn = %meta.fqn, "scope of resource is gone, nothing to delete");
    return Ok(());
  };

  lock(scope.resources()).remove(&meta.id);
  let target = DestroyTarget {
    id: meta.id.clone(),
    fqn: meta.fqn.clone(),
    kind: meta.kind.clone(),
    seq: meta.seq,
  };
  destroy(&scope, &target).await
}
