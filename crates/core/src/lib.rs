//! `storedesk-core`: identifiers and the domain error shared by every crate.
//!
//! No IO, no async.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{StoreId, TenantId, UserId};
