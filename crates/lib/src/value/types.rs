use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Number, Value as JsonValue};
use thiserror::Error;

use crate::resource::Output;
use crate::scope::ScopeRef;

use super::secret::Secret;

/// A value that can export a self-describing schema (e.g. a validator).
///
/// The codec persists the schema form instead of the value itself.
pub trait Schema: Send + Sync + fmt::Debug {
  fn to_schema(&self) -> JsonValue;
}

/// Schema read back from a state store, holding only its exported form.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSchema(pub JsonValue);

impl Schema for StoredSchema {
  fn to_schema(&self) -> JsonValue {
    self.0.clone()
  }
}

/// Errors converting a [`Value`] into plain JSON.
#[derive(Debug, Error)]
pub enum ValueError {
  /// The value contains an output handle that has not resolved yet.
  #[error("value contains an unresolved output: {0}")]
  Unresolved(String),

  /// The value contains a secret; plain conversion would leak it.
  #[error("value contains secret '{0}' which cannot be converted to plain JSON")]
  Secret(String),

  /// The value contains a scope back-reference.
  #[error("value contains a scope reference")]
  ScopeReference,

  /// Conversion through serde failed.
  #[error("failed to convert value: {0}")]
  Convert(#[from] serde_json::Error),
}

/// A live value.
#[derive(Clone, Default)]
pub enum Value {
  #[default]
  Null,
  Bool(bool),
  Number(Number),
  String(String),
  Array(Vec<Value>),
  Object(BTreeMap<String, Value>),
  Secret(Secret),
  Timestamp(DateTime<Utc>),
  /// Back-reference to the scope the value lives in.
  Scope(ScopeRef),
  /// Symbolic marker identified by name.
  Symbol(String),
  Schema(Arc<dyn Schema>),
  Output(Output),
}

impl Value {
  /// Build an object from key/value pairs.
  pub fn object<K, V, I>(entries: I) -> Self
  where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
  {
    Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }

  /// Convert anything serde can serialize into a plain value.
  pub fn from_serialize<T: serde::Serialize>(value: &T) -> Result<Self, ValueError> {
    Ok(Value::from(serde_json::to_value(value)?))
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Value::Number(n) => n.as_i64(),
      _ => None,
    }
  }

  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Value::Number(n) => n.as_f64(),
      _ => None,
    }
  }

  pub fn as_array(&self) -> Option<&Vec<Value>> {
    match self {
      Value::Array(items) => Some(items),
      _ => None,
    }
  }

  pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
    match self {
      Value::Object(map) => Some(map),
      _ => None,
    }
  }

  pub fn as_secret(&self) -> Option<&Secret> {
    match self {
      Value::Secret(secret) => Some(secret),
      _ => None,
    }
  }

  pub fn as_output(&self) -> Option<&Output> {
    match self {
      Value::Output(output) => Some(output),
      _ => None,
    }
  }

  /// Look up a direct child by key (objects) or index (arrays).
  pub fn get(&self, key: &str) -> Option<&Value> {
    match self {
      Value::Object(map) => map.get(key),
      Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
      _ => None,
    }
  }

  /// Project a dotted field path (`a.b.0.c`) out of this value.
  ///
  /// Missing segments project to [`Value::Null`]. An empty path returns a clone
  /// of the value itself.
  pub fn project(&self, path: &str) -> Value {
    let mut current = self;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
      match current.get(segment) {
        Some(next) => current = next,
        None => return Value::Null,
      }
    }
    current.clone()
  }

  /// True if any node in the tree is an [`Output`] handle.
  pub fn contains_outputs(&self) -> bool {
    match self {
      Value::Output(_) => true,
      Value::Array(items) => items.iter().any(Value::contains_outputs),
      Value::Object(map) => map.values().any(Value::contains_outputs),
      _ => false,
    }
  }

  /// Convert into plain JSON.
  ///
  /// Timestamps become RFC 3339 strings, symbols their name and schemas their
  /// schema form. Resolved outputs are replaced by their value. Secrets and
  /// scope references are refused.
  pub fn to_json(&self) -> Result<JsonValue, ValueError> {
    Ok(match self {
      Value::Null => JsonValue::Null,
      Value::Bool(b) => JsonValue::Bool(*b),
      Value::Number(n) => JsonValue::Number(n.clone()),
      Value::String(s) => JsonValue::String(s.clone()),
      Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect::<Result<_, _>>()?),
      Value::Object(map) => JsonValue::Object(
        map
          .iter()
          .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
          .collect::<Result<_, ValueError>>()?,
      ),
      Value::Secret(secret) => return Err(ValueError::Secret(secret.name().to_string())),
      Value::Timestamp(ts) => JsonValue::String(ts.to_rfc3339()),
      Value::Scope(_) => return Err(ValueError::ScopeReference),
      Value::Symbol(name) => JsonValue::String(name.clone()),
      Value::Schema(schema) => schema.to_schema(),
      Value::Output(output) => match output.try_value() {
        Some(Ok(value)) => value.to_json()?,
        _ => return Err(ValueError::Unresolved(output.label().to_string())),
      },
    })
  }

  /// Deserialize a plain value into a typed struct.
  pub fn deserialize_into<T: serde::de::DeserializeOwned>(&self) -> Result<T, ValueError> {
    Ok(serde_json::from_value(self.to_json()?)?)
  }
}

impl fmt::Debug for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Null => write!(f, "Null"),
      Value::Bool(b) => write!(f, "{b:?}"),
      Value::Number(n) => write!(f, "{n}"),
      Value::String(s) => write!(f, "{s:?}"),
      Value::Array(items) => f.debug_list().entries(items).finish(),
      Value::Object(map) => f.debug_map().entries(map).finish(),
      Value::Secret(secret) => write!(f, "{secret:?}"),
      Value::Timestamp(ts) => write!(f, "Timestamp({})", ts.to_rfc3339()),
      Value::Scope(scope) => write!(f, "{scope:?}"),
      Value::Symbol(name) => write!(f, "Symbol({name})"),
      Value::Schema(schema) => write!(f, "Schema({schema:?})"),
      Value::Output(output) => write!(f, "{output:?}"),
    }
  }
}

impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Value::Null, Value::Null) => true,
      (Value::Bool(a), Value::Bool(b)) => a == b,
      (Value::Number(a), Value::Number(b)) => a == b,
      (Value::String(a), Value::String(b)) => a == b,
      (Value::Array(a), Value::Array(b)) => a == b,
      (Value::Object(a), Value::Object(b)) => a == b,
      (Value::Secret(a), Value::Secret(b)) => a == b,
      (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
      (Value::Scope(a), Value::Scope(b)) => a.ptr_eq(b),
      (Value::Symbol(a), Value::Symbol(b)) => a == b,
      (Value::Schema(a), Value::Schema(b)) => a.to_schema() == b.to_schema(),
      (Value::Output(a), Value::Output(b)) => a.ptr_eq(b),
      _ => false,
    }
  }
}

impl From<JsonValue> for Value {
  fn from(json: JsonValue) -> Self {
    match json {
      JsonValue::Null => Value::Null,
      JsonValue::Bool(b) => Value::Bool(b),
      JsonValue::Number(n) => Value::Number(n),
      JsonValue::String(s) => Value::String(s),
      JsonValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
      JsonValue::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
    }
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::String(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::String(s)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

impl From<i32> for Value {
  fn from(n: i32) -> Self {
    Value::Number(n.into())
  }
}

impl From<i64> for Value {
  fn from(n: i64) -> Self {
    Value::Number(n.into())
  }
}

impl From<u64> for Value {
  fn from(n: u64) -> Self {
    Value::Number(n.into())
  }
}

impl From<f64> for Value {
  /// Non-finite floats have no JSON form and become [`Value::Null`].
  fn from(n: f64) -> Self {
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
  }
}

impl From<Vec<Value>> for Value {
  fn from(items: Vec<Value>) -> Self {
    Value::Array(items)
  }
}

impl From<BTreeMap<String, Value>> for Value {
  fn from(map: BTreeMap<String, Value>) -> Self {
    Value::Object(map)
  }
}

impl From<Secret> for Value {
  fn from(secret: Secret) -> Self {
    Value::Secret(secret)
  }
}

impl From<DateTime<Utc>> for Value {
  fn from(ts: DateTime<Utc>) -> Self {
    Value::Timestamp(ts)
  }
}

impl From<Output> for Value {
  fn from(output: Output) -> Self {
    Value::Output(output)
  }
}

impl From<&Output> for Value {
  fn from(output: &Output) -> Self {
    Value::Output(output.clone())
  }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(value: Option<T>) -> Self {
    value.map(Into::into).unwrap_or(Value::Null)
  }
}
