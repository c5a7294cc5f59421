//! cairn-lib: the resource reconciliation engine behind cairn.
//!
//! Programs declare resources inside a [`Scope`](scope::Scope); each
//! declaration is reconciled against its persisted [`StateRecord`](state::StateRecord)
//! by the resource kind's [`Provider`](resource::Provider), and anything a
//! scope recorded but no longer declares is deleted when it finishes.
//!
//! - `value`: live values, secrets
//! - `codec`: persisted form of values, secret encryption
//! - `state`: the state store contract and its backends
//! - `resource`: declaration, output handles, providers
//! - `scope`: the scope tree and run lifecycle
//! - `execute`: apply and destroy

pub mod bundle;
pub mod codec;
pub mod consts;
pub mod execute;
pub mod resource;
pub mod scope;
pub mod state;
pub mod util;
pub mod value;

pub use resource::{Output, declare, declare_with};
pub use scope::{Scope, run};
pub use value::{Secret, Value};
