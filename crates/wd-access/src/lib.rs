//! Warden Access Control
//!
//! Authorization core providing:
//! - Unit of Work binding role, permission and ACL repositories to one transaction
//! - Role management with key derivation and replace-all permission sync
//! - The access decision engine (super-admin bypass, `NONE` sentinel, OR semantics)
//! - Bounded background population of the default-role cache
//! - Typed errors that survive an RPC boundary as message key + attributes
//!
//! ## Module Organization (Aggregate-based)
//!
//! Each aggregate contains:
//! - `entity` - Domain entities
//! - `repository` - Data access contract and PostgreSQL implementation
//! - `service` - Operations routed through a unit of work

// Aggregates
pub mod acl;
pub mod permission;
pub mod role;
pub mod user;

// Cross-cutting concerns
pub mod memory;
pub mod schema;
pub mod seed;
pub mod shared;
pub mod usecase;

// Re-export common types from shared
pub use shared::error::{AccessError, Result};
pub use shared::transport::ErrorDetail;

// Re-export unit of work
pub use usecase::{PgUnitOfWork, TxHandle, UnitOfWork};

// Re-export main entity types
pub use acl::entity::{AccessControl, AccessDecision, GrantReason};
pub use permission::entity::{Permission, PermissionKey, RolePermission};
pub use role::entity::{derive_key, Role, RoleInput, RoleKey, RoleWithPermissions};
pub use user::entity::{User, UserStatus};

// Re-export repositories
pub use acl::repository::{AclRepository, PgAclRepository};
pub use permission::repository::{PermissionRepository, PgPermissionRepository};
pub use role::repository::{PgRoleRepository, RoleRepository};
pub use user::directory::{PgUserDirectory, UserDirectory};

// Re-export services
pub use acl::service::AclService;
pub use permission::service::PermissionService;
pub use role::cache::{MemoryRoleCache, RedisRoleCache, RoleCache};
pub use role::cache_populator::{PopulatorConfig, RoleCachePopulator};
pub use role::service::RoleService;
pub use seed::{DefaultRoleSeeder, SeedReport};
