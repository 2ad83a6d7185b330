//! Permission Aggregate
//!
//! Atomic capabilities and the catalogue that lists them.

pub mod entity;
pub mod repository;
pub mod service;

pub use entity::{Permission, PermissionKey, RolePermission};
pub use repository::{PermissionRepository, PgPermissionRepository};
pub use service::PermissionService;
