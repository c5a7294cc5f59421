//! Reconciliation of one declared resource.
//!
//! # Algorithm
//!
//! 1. resolve every output handle in the inputs (this is what orders resources)
//! 2. load the record, creating and persisting a fresh `creating` one if absent
//! 3. skip: a settled record whose canonical inputs match returns its stored output
//! 4. persist the in-flight status (`creating`/`updating`) with the new inputs
//! 5. run the provider; scratch data it writes is persisted as it goes
//! 6. persist the settled status with output, deps and any replaced predecessor
//!
//! A failing provider leaves the in-flight status on disk so the next run
//! resumes with the same event.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codec::{self, CodecError};
use crate::resource::context::{ContextInit, Journal};
use crate::resource::{Context, Event, Output, ResourceMeta, ResourceOptions};
use crate::scope::{Phase, Scope};
use crate::state::{StateError, StateRecord, Status};
use crate::value::Value;

use super::types::ApplyError;

/// Reconcile the resource described by `meta` and return its output.
pub async fn apply(
  scope: &Arc<Scope>,
  meta: &ResourceMeta,
  inputs: Value,
  options: ResourceOptions,
) -> Result<Value, ApplyError> {
  let fqn = meta.fqn.as_str();
  let id = meta.id.as_str();
  let store = Arc::clone(scope.store());
  let codec_err = |source: CodecError| ApplyError::Codec {
    fqn: fqn.to_string(),
    source,
  };
  let state_err = |source: StateError| ApplyError::State {
    fqn: fqn.to_string(),
    source,
  };
  let deserialize_options = scope.deserialize_options();

  match scope.phase() {
    Phase::Up => {}
    Phase::Read => {
      let record = store.get(id).await.map_err(state_err)?.ok_or_else(|| ApplyError::NotFound {
        fqn: fqn.to_string(),
      })?;
      debug!(fqn = %fqn, "read from state");
      return codec::deserialize(&record.output, &deserialize_options).map_err(codec_err);
    }
    Phase::Destroy => {
      // Resolve to what is recorded so dependents can still be evaluated.
      return match store.get(id).await.map_err(state_err)? {
        Some(record) => codec::deserialize(&record.output, &deserialize_options).map_err(codec_err),
        None => Ok(Value::Null),
      };
    }
  }

  let provider = scope
    .providers()
    .get(&meta.kind)
    .ok_or_else(|| ApplyError::UnknownProvider {
      fqn: fqn.to_string(),
      kind: meta.kind.clone(),
    })?;

  let (inputs, deps) = resolve_inputs(fqn, inputs).await?;

  let mut record = match store.get(id).await.map_err(state_err)? {
    Some(record) => record,
    None => {
      let record = StateRecord::new(meta.kind.clone(), meta.seq);
      store.set(id, &record).await.map_err(state_err)?;
      record
    }
  };

  if record.status.is_settled() && !options.always_update {
    let stored = codec::deserialize(&record.inputs, &deserialize_options).map_err(codec_err)?;
    if codec::canonical(&stored).map_err(codec_err)? == codec::canonical(&inputs).map_err(codec_err)? {
      if record.seq != meta.seq {
        record.seq = meta.seq;
        store.set(id, &record).await.map_err(state_err)?;
      }
      log_transition(scope, fqn, "skipped, inputs unchanged");
      return codec::deserialize(&record.output, &deserialize_options).map_err(codec_err);
    }
  }

  if record.status == Status::DeletedPending {
    warn!(fqn = %fqn, "previous deletion did not finish, updating instead");
  }
  let event = if record.status == Status::Creating {
    Event::Create
  } else {
    Event::Update
  };

  // Serializing first means a secret without a passphrase fails before any side effect.
  let serialize_options = scope.serialize_options();
  let serialized_inputs = codec::serialize(&inputs, &serialize_options).map_err(codec_err)?;
  let previous_output = codec::deserialize(&record.output, &deserialize_options).map_err(codec_err)?;

  let in_flight = match event {
    Event::Create => Status::Creating,
    _ => Status::Updating,
  };
  if record.status.is_settled() {
    record.old_inputs = std::mem::replace(&mut record.inputs, serialized_inputs);
  } else {
    record.inputs = serialized_inputs;
  }
  record.status = in_flight;
  record.seq = meta.seq;
  store.set(id, &record).await.map_err(state_err)?;
  log_transition(scope, fqn, in_flight.as_str());

  let ctx = Context::new(ContextInit {
    stage: scope.stage().to_string(),
    id: id.to_string(),
    fqn: fqn.to_string(),
    event,
    output: previous_output,
    record,
    journal: Some(Journal {
      store: Arc::clone(&store),
      serialize: serialize_options.clone(),
    }),
    deserialize: deserialize_options,
  });

  let output = provider
    .run(ctx.clone(), inputs)
    .await
    .map_err(|source| ApplyError::Provider {
      fqn: fqn.to_string(),
      source,
    })?;

  let (mut record, replaced) = ctx.finish().await;
  record.output = codec::serialize(&output, &serialize_options).map_err(codec_err)?;
  record.status = match event {
    Event::Create => Status::Created,
    _ => Status::Updated,
  };
  record.deps = deps;
  if let Some(predecessor) = replaced {
    record.pending_deletions.push(predecessor);
  }
  store.set(id, &record).await.map_err(state_err)?;
  log_transition(scope, fqn, record.status.as_str());

  Ok(output)
}

/// Wait for every output handle inside `inputs` and substitute its value.
///
/// Returns the resolved inputs and the fully-qualified names of the
/// resources they referenced.
pub(crate) async fn resolve_inputs(fqn: &str, mut inputs: Value) -> Result<(Value, Vec<String>), ApplyError> {
  let mut deps = BTreeSet::new();

  // Resolved values may themselves carry handles.
  while inputs.contains_outputs() {
    let mut handles = Vec::new();
    collect_outputs(&inputs, &mut handles);

    for handle in &handles {
      if let Some(origin) = handle.origin() {
        deps.insert(origin.to_string());
      }
      handle.resolved().await.map_err(|source| ApplyError::Dependency {
        fqn: fqn.to_string(),
        source,
      })?;
    }
    inputs = substitute(inputs);
  }

  Ok((inputs, deps.into_iter().collect()))
}

fn collect_outputs(value: &Value, handles: &mut Vec<Output>) {
  match value {
    Value::Output(output) => handles.push(output.clone()),
    Value::Array(items) => items.iter().for_each(|item| collect_outputs(item, handles)),
    Value::Object(map) => map.values().for_each(|item| collect_outputs(item, handles)),
    _ => {}
  }
}

fn substitute(value: Value) -> Value {
  match value {
    Value::Output(output) => match output.try_value() {
      Some(Ok(value)) => value,
      _ => Value::Null,
    },
    Value::Array(items) => Value::Array(items.into_iter().map(substitute).collect()),
    Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, substitute(v))).collect()),
    other => other,
  }
}

fn log_transition(scope: &Scope, fqn: &str, status: &str) {
  if scope.is_quiet() {
    debug!(fqn = %fqn, status = %status, "resource");
  } else {
    info!(fqn = %fqn, status = %status, "resource");
  }
}
