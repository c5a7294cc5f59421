//! Conversion between live [`Value`]s and the JSON trees kept in state stores.
//!
//! Plain JSON passes through untouched. Everything else is written as a
//! single-key object whose key is a tag:
//!
//! ```text
//! {"@secret":   {"name": "db", "data": "<base64 age ciphertext>"}}
//! {"@date":     "2024-05-01T12:00:00Z"}
//! {"@scope":    null}
//! {"@symbol":   "cairn::replaced"}
//! {"@schema":   {...}}
//! {"@resource": {"kind": "...", "id": "...", "fqn": "...", "seq": 3, "output": ...}}
//! ```
//!
//! `@scope` always resolves to the scope doing the deserialization, never to a
//! stored snapshot of one.
//!
//! # Submodules
//!
//! - [`crypto`] - passphrase encryption of secret payloads

pub mod crypto;
mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value as JsonValue, json};
use tracing::debug;

use crate::consts::{DATE_TAG, RESOURCE_TAG, SCHEMA_TAG, SCOPE_TAG, SECRET_TAG, SYMBOL_TAG};
use crate::resource::{Output, ResourceMeta};
use crate::util::hash::fingerprint_secret;
use crate::value::{Secret, StoredSchema, Value, secret_env_var};

pub use crypto::{CryptoError, Passphrase};
pub use types::*;

/// Serialize a live value into its persisted JSON form.
///
/// Fails with [`CodecError::MissingPassphrase`] as soon as a secret is met
/// while encrypting without a passphrase; no plaintext is ever written.
pub fn serialize(value: &Value, options: &SerializeOptions) -> Result<JsonValue, CodecError> {
  Ok(match value {
    Value::Null => JsonValue::Null,
    Value::Bool(b) => JsonValue::Bool(*b),
    Value::Number(n) => JsonValue::Number(n.clone()),
    Value::String(s) => JsonValue::String(s.clone()),
    Value::Array(items) => JsonValue::Array(
      items
        .iter()
        .map(|item| serialize(item, options))
        .collect::<Result<_, _>>()?,
    ),
    Value::Object(map) => JsonValue::Object(serialize_map(map, options)?),
    Value::Secret(secret) => serialize_secret(secret, options)?,
    Value::Timestamp(ts) => json!({ DATE_TAG: ts.to_rfc3339_opts(SecondsFormat::AutoSi, true) }),
    Value::Scope(_) => json!({ SCOPE_TAG: null }),
    Value::Symbol(name) => json!({ SYMBOL_TAG: name }),
    Value::Schema(schema) => json!({ SCHEMA_TAG: schema.to_schema() }),
    Value::Output(output) => serialize_output(output, options)?,
  })
}

/// Serialize every entry of a map.
pub fn serialize_map(map: &BTreeMap<String, Value>, options: &SerializeOptions) -> Result<Map<String, JsonValue>, CodecError> {
  map
    .iter()
    .map(|(k, v)| Ok((k.clone(), serialize(v, options)?)))
    .collect()
}

fn serialize_secret(secret: &Secret, options: &SerializeOptions) -> Result<JsonValue, CodecError> {
  match options.secrets {
    SecretMode::Encrypt => {
      let passphrase = options
        .passphrase
        .as_ref()
        .ok_or_else(|| CodecError::MissingPassphrase(secret.name().to_string()))?;
      let data = crypto::encrypt(secret.expose(), passphrase, options.work_factor).map_err(|source| {
        CodecError::Crypto {
          name: secret.name().to_string(),
          source,
        }
      })?;
      Ok(json!({ SECRET_TAG: { "name": secret.name(), "data": data } }))
    }
    SecretMode::Fingerprint => Ok(json!({
      SECRET_TAG: { "name": secret.name(), "sha256": fingerprint_secret(secret.name(), secret.expose()) }
    })),
  }
}

fn serialize_output(output: &Output, options: &SerializeOptions) -> Result<JsonValue, CodecError> {
  let value = match output.try_value() {
    Some(Ok(value)) => value,
    Some(Err(_)) => return Err(CodecError::FailedOutput(output.label().to_string())),
    None => return Err(CodecError::Unresolved(output.label().to_string())),
  };
  let serialized = serialize(&value, options)?;

  // Projections and combinators carry no identity of their own.
  match output.meta() {
    Some(meta) => Ok(json!({
      RESOURCE_TAG: {
        "kind": meta.kind,
        "id": meta.id,
        "fqn": meta.fqn,
        "seq": meta.seq,
        "output": serialized,
      }
    })),
    None => Ok(serialized),
  }
}

/// Canonical string form of a value, used for change detection.
///
/// Object keys are ordered and secrets are fingerprinted, so two values are
/// structurally equal exactly when their canonical strings are equal.
pub fn canonical(value: &Value) -> Result<String, CodecError> {
  let json = serialize(value, &SerializeOptions::fingerprint())?;
  // serde_json maps are ordered; to_string cannot fail on a JsonValue.
  Ok(json.to_string())
}

/// Rebuild a live value from its persisted JSON form.
pub fn deserialize(json: &JsonValue, options: &DeserializeOptions) -> Result<Value, CodecError> {
  if let Some(transform) = &options.transform
    && let Some(value) = transform(json)?
  {
    return Ok(value);
  }

  Ok(match json {
    JsonValue::Null => Value::Null,
    JsonValue::Bool(b) => Value::Bool(*b),
    JsonValue::Number(n) => Value::Number(n.clone()),
    JsonValue::String(s) => Value::String(s.clone()),
    JsonValue::Array(items) => Value::Array(
      items
        .iter()
        .map(|item| deserialize(item, options))
        .collect::<Result<_, _>>()?,
    ),
    JsonValue::Object(map) => match single_entry(map) {
      Some((SECRET_TAG, payload)) => deserialize_secret(payload, options)?,
      Some((DATE_TAG, payload)) => deserialize_date(payload)?,
      Some((SCOPE_TAG, _)) => Value::Scope(options.scope.clone().ok_or(CodecError::NoScope)?),
      Some((SYMBOL_TAG, payload)) => Value::Symbol(
        payload
          .as_str()
          .ok_or_else(|| malformed(SYMBOL_TAG, "expected a string"))?
          .to_string(),
      ),
      Some((SCHEMA_TAG, payload)) => Value::Schema(Arc::new(StoredSchema(payload.clone()))),
      Some((RESOURCE_TAG, payload)) => deserialize_resource(payload, options)?,
      _ => Value::Object(deserialize_map(map, options)?),
    },
  })
}

/// Deserialize every entry of a map.
pub fn deserialize_map(
  map: &Map<String, JsonValue>,
  options: &DeserializeOptions,
) -> Result<BTreeMap<String, Value>, CodecError> {
  map
    .iter()
    .map(|(k, v)| Ok((k.clone(), deserialize(v, options)?)))
    .collect()
}

fn single_entry(map: &Map<String, JsonValue>) -> Option<(&str, &JsonValue)> {
  if map.len() != 1 {
    return None;
  }
  map.iter().next().map(|(k, v)| (k.as_str(), v))
}

fn malformed(tag: &'static str, message: &str) -> CodecError {
  CodecError::Malformed {
    tag,
    message: message.to_string(),
  }
}

fn secret_name(payload: &JsonValue) -> Result<&str, CodecError> {
  payload
    .get("name")
    .and_then(JsonValue::as_str)
    .ok_or_else(|| malformed(SECRET_TAG, "missing name"))
}

fn deserialize_secret(payload: &JsonValue, options: &DeserializeOptions) -> Result<Value, CodecError> {
  let name = secret_name(payload)?;
  let data = payload
    .get("data")
    .and_then(JsonValue::as_str)
    .ok_or_else(|| malformed(SECRET_TAG, "missing ciphertext"))?;
  let passphrase = options
    .passphrase
    .as_ref()
    .ok_or_else(|| CodecError::MissingDecryptionPassphrase(name.to_string()))?;
  let plaintext = crypto::decrypt(data, passphrase).map_err(|source| CodecError::Crypto {
    name: name.to_string(),
    source,
  })?;
  Ok(Value::Secret(Secret::new(name, plaintext)))
}

fn deserialize_date(payload: &JsonValue) -> Result<Value, CodecError> {
  let raw = payload
    .as_str()
    .ok_or_else(|| malformed(DATE_TAG, "expected a string"))?;
  let ts = DateTime::parse_from_rfc3339(raw).map_err(|e| malformed(DATE_TAG, &e.to_string()))?;
  Ok(Value::Timestamp(ts.with_timezone(&Utc)))
}

fn deserialize_resource(payload: &JsonValue, options: &DeserializeOptions) -> Result<Value, CodecError> {
  let field = |key: &str| {
    payload
      .get(key)
      .and_then(JsonValue::as_str)
      .map(str::to_string)
      .ok_or_else(|| malformed(RESOURCE_TAG, &format!("missing {key}")))
  };
  let mut meta = ResourceMeta::new(
    field("id")?,
    field("fqn")?,
    field("kind")?,
    payload.get("seq").and_then(JsonValue::as_u64).unwrap_or_default(),
  );
  meta.scope = options.scope.clone();
  let value = deserialize(payload.get("output").unwrap_or(&JsonValue::Null), options)?;
  Ok(Value::Output(Output::new_resolved(meta, value)))
}

/// Transform that resolves `@secret` nodes from the environment instead of
/// decrypting them.
///
/// The secret named `db-password` is read from `CAIRN_SECRET_DB_PASSWORD`. This
/// is meant for sandboxed runtimes that receive secrets as environment
/// variables and never see the passphrase.
pub fn env_secret_transform() -> Transform {
  Arc::new(|json: &JsonValue| {
    let Some((SECRET_TAG, payload)) = json.as_object().and_then(single_entry) else {
      return Ok(None);
    };
    let name = secret_name(payload)?;
    let var = secret_env_var(name);
    let value =
      std::env::var(&var).map_err(|_| CodecError::Transform(format!("environment variable {var} is not set")))?;
    debug!(secret = %name, var = %var, "resolved secret from environment");
    Ok(Some(Value::Secret(Secret::new(name, value))))
  })
}

/// Replace every `@secret` node of a persisted tree with its plaintext.
///
/// Used for human inspection only; the result must not be written back.
pub fn reveal_secrets(json: &JsonValue, passphrase: &Passphrase) -> Result<JsonValue, CodecError> {
  Ok(match json {
    JsonValue::Array(items) => JsonValue::Array(
      items
        .iter()
        .map(|item| reveal_secrets(item, passphrase))
        .collect::<Result<_, _>>()?,
    ),
    JsonValue::Object(map) => match single_entry(map) {
      Some((SECRET_TAG, payload)) => {
        let options = DeserializeOptions {
          passphrase: Some(passphrase.clone()),
          ..DeserializeOptions::default()
        };
        match deserialize_secret(payload, &options)? {
          Value::Secret(secret) => JsonValue::String(secret.expose().to_string()),
          _ => JsonValue::Null,
        }
      }
      _ => JsonValue::Object(
        map
          .iter()
          .map(|(k, v)| Ok((k.clone(), reveal_secrets(v, passphrase)?)))
          .collect::<Result<_, CodecError>>()?,
      ),
    },
    other => other.clone(),
  })
}
