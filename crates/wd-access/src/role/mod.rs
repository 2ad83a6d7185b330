//! Role Aggregate
//!
//! Roles, their machine keys, the default-role cache and role management.

pub mod cache;
pub mod cache_populator;
pub mod entity;
pub mod repository;
pub mod service;

// Re-export main types
pub use cache::{MemoryRoleCache, RedisRoleCache, RoleCache};
pub use cache_populator::{PopulatorConfig, RoleCachePopulator};
pub use entity::{derive_key, Role, RoleInput, RoleKey, RoleWithPermissions, UnknownKey};
pub use repository::{PgRoleRepository, RoleRepository};
pub use service::RoleService;
