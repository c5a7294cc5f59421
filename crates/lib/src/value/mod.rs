//! Live values flowing between declarations, providers and the state store.
//!
//! A [`Value`] is a JSON-like tree that can additionally carry values the
//! engine treats specially when persisting:
//!
//! - [`Secret`] payloads that must be encrypted at rest
//! - timestamps
//! - back-references to the enclosing scope and symbolic markers
//! - values exporting a self-describing [`Schema`]
//! - [`Output`](crate::resource::Output) handles of other resources
//!
//! # Submodules
//!
//! - [`secret`] - secret wrapper and the name-keyed secret registry

pub mod secret;
mod types;

pub use secret::{Secret, SecretError, SecretRegistry, secret_env_var};
pub use types::*;
