//! ACL Aggregate
//!
//! User grants and the access decision engine.

pub mod entity;
pub mod repository;
pub mod service;

pub use entity::{AccessControl, AccessDecision, GrantReason};
pub use repository::{AclRepository, PgAclRepository};
pub use service::AclService;
