//! Permission Entities

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::role::entity::UnknownKey;

/// Machine key of an atomic capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionKey {
    /// Sentinel: the endpoint only requires an authenticated, active user
    None,
    ReadUser,
    CreateUser,
    UpdateUser,
    DeleteUser,
    BanUser,
    ReadRole,
    CreateRole,
    UpdateRole,
    DeleteRole,
    AssignRole,
    ReadPermission,
    AssignPermission,
}

impl PermissionKey {
    pub const ALL: [PermissionKey; 13] = [
        PermissionKey::None,
        PermissionKey::ReadUser,
        PermissionKey::CreateUser,
        PermissionKey::UpdateUser,
        PermissionKey::DeleteUser,
        PermissionKey::BanUser,
        PermissionKey::ReadRole,
        PermissionKey::CreateRole,
        PermissionKey::UpdateRole,
        PermissionKey::DeleteRole,
        PermissionKey::AssignRole,
        PermissionKey::ReadPermission,
        PermissionKey::AssignPermission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionKey::None => "NONE",
            PermissionKey::ReadUser => "READ_USER",
            PermissionKey::CreateUser => "CREATE_USER",
            PermissionKey::UpdateUser => "UPDATE_USER",
            PermissionKey::DeleteUser => "DELETE_USER",
            PermissionKey::BanUser => "BAN_USER",
            PermissionKey::ReadRole => "READ_ROLE",
            PermissionKey::CreateRole => "CREATE_ROLE",
            PermissionKey::UpdateRole => "UPDATE_ROLE",
            PermissionKey::DeleteRole => "DELETE_ROLE",
            PermissionKey::AssignRole => "ASSIGN_ROLE",
            PermissionKey::ReadPermission => "READ_PERMISSION",
            PermissionKey::AssignPermission => "ASSIGN_PERMISSION",
        }
    }

    /// UI grouping label
    pub fn group(&self) -> &'static str {
        match self {
            PermissionKey::None => "general",
            PermissionKey::ReadUser
            | PermissionKey::CreateUser
            | PermissionKey::UpdateUser
            | PermissionKey::DeleteUser
            | PermissionKey::BanUser => "user",
            PermissionKey::ReadRole
            | PermissionKey::CreateRole
            | PermissionKey::UpdateRole
            | PermissionKey::DeleteRole
            | PermissionKey::AssignRole => "role",
            PermissionKey::ReadPermission | PermissionKey::AssignPermission => "permission",
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, PermissionKey::None)
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionKey {
    type Err = UnknownKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PermissionKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| UnknownKey(s.to_string()))
    }
}

/// Permission definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: i64,
    pub uuid: Uuid,
    pub title: String,
    pub key: PermissionKey,
    pub group: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Permission {
    pub fn new(title: impl Into<String>, key: PermissionKey) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            title: title.into(),
            key,
            group: key.group().to_string(),
            description: String::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Join row between a role and a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePermission {
    pub role_id: i64,
    pub permission_id: i64,
}
