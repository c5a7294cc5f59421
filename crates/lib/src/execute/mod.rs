//! Resource reconciliation and deletion.
//!
//! - [`apply`] creates or updates one declared resource
//! - [`destroy`] deletes one recorded resource or a whole nested scope
//! - [`destroy_all`] deletes a batch with a [`DestroyStrategy`](crate::scope::DestroyStrategy)

pub mod apply;
pub mod destroy;
pub mod types;

pub use apply::apply;
pub use destroy::{delete_pending, destroy, destroy_all, destroy_resource};
pub use types::{ApplyError, DestroyError, DestroyTarget};
