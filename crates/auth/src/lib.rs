//! `wms-auth`: the access-control predicate consulted by the stock engine.
//!
//! This crate is intentionally decoupled from HTTP, tokens and storage: callers
//! build a [`Principal`] however they authenticate, and the engine asks
//! [`authorize`] before every operation.

pub mod authorize;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{authorize, has_permission, AuthzError};
pub use permissions::Permission;
pub use principal::{Principal, WarehouseScope};
pub use roles::{default_role_permissions, Role};
