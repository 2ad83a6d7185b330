//! Role Entities
//!
//! A role is a named bundle of permissions identified on the wire by its
//! machine key. Keys are derived from the human title and are unique among
//! live (not soft-deleted) roles.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::permission::entity::Permission;
use crate::shared::error::{AccessError, Result};

/// Machine key of a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleKey {
    /// Bypasses every permission check
    SuperAdmin,
    Admin,
    Manager,
    Accountant,
    Supplier,
    Sales,
    Staff,
    /// Well-known default role assigned at account creation
    User,
}

impl RoleKey {
    pub const ALL: [RoleKey; 8] = [
        RoleKey::SuperAdmin,
        RoleKey::Admin,
        RoleKey::Manager,
        RoleKey::Accountant,
        RoleKey::Supplier,
        RoleKey::Sales,
        RoleKey::Staff,
        RoleKey::User,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKey::SuperAdmin => "SUPER_ADMIN",
            RoleKey::Admin => "ADMIN",
            RoleKey::Manager => "MANAGER",
            RoleKey::Accountant => "ACCOUNTANT",
            RoleKey::Supplier => "SUPPLIER",
            RoleKey::Sales => "SALES",
            RoleKey::Staff => "STAFF",
            RoleKey::User => "USER",
        }
    }

    /// Derive the key from a human title and require it to be a known key.
    pub fn from_title(title: &str) -> Result<Self> {
        let derived = derive_key(title);
        derived.parse().map_err(|_| {
            AccessError::invalid_body(
                "title",
                format!("'{}' does not map to a known role key", title.trim()),
            )
        })
    }
}

impl fmt::Display for RoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored or supplied string is not a known key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown key: {0}")]
pub struct UnknownKey(pub String);

impl FromStr for RoleKey {
    type Err = UnknownKey;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        RoleKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| UnknownKey(s.to_string()))
    }
}

/// Uppercase the title and collapse every run of spaces, hyphens and
/// underscores into a single underscore. Leading and trailing separators
/// are dropped, so the result is stable under re-derivation.
pub fn derive_key(title: &str) -> String {
    let mut key = String::with_capacity(title.len());
    let mut pending_separator = false;

    for c in title.chars() {
        if c.is_whitespace() || c == '-' || c == '_' {
            pending_separator = true;
            continue;
        }
        if pending_separator && !key.is_empty() {
            key.push('_');
        }
        pending_separator = false;
        key.extend(c.to_uppercase());
    }

    key
}

/// Role definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    /// Internal identifier, assigned by the store
    pub id: i64,

    /// Public identifier
    pub uuid: Uuid,

    /// Human-readable label
    pub title: String,

    pub key: RoleKey,

    pub description: String,

    /// Auto-applied to new users and memoized in the role cache
    pub is_default: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<i64>,
}

impl Role {
    /// New, not yet persisted role. `id` is 0 until the repository assigns one.
    pub fn new(title: impl Into<String>, key: RoleKey) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            title: title.into(),
            key,
            description: String::new(),
            is_default: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Input for creating or updating a role. The key is never supplied by the
/// caller; it is derived from `title` (or kept from the cache on update).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_default: bool,
}

impl RoleInput {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }
}

/// A role together with its attached permissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleWithPermissions {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<Permission>,
}
