//! Access Control Entities

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Grant of a role or a permission to a user. Exactly one of `role_id` and
/// `permission_id` is set per row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControl {
    pub id: i64,
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl AccessControl {
    pub fn for_role(user_id: i64, role_id: i64) -> Self {
        Self {
            id: 0,
            user_id,
            role_id: Some(role_id),
            permission_id: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn for_permission(user_id: i64, permission_id: i64) -> Self {
        Self {
            id: 0,
            user_id,
            role_id: None,
            permission_id: Some(permission_id),
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Why an access check succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantReason {
    /// The user holds `SUPER_ADMIN`; permissions were not evaluated
    SuperAdmin,
    /// The required set contained the `NONE` sentinel
    NoneSentinel,
    /// One of the required permissions is in the user's effective set
    Permission,
}

impl GrantReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantReason::SuperAdmin => "super_admin",
            GrantReason::NoneSentinel => "none_sentinel",
            GrantReason::Permission => "permission",
        }
    }
}

impl fmt::Display for GrantReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an access check.
///
/// Denial is a normal result, not an error. An `Err` from the check means
/// the decision could not be made at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AccessDecision {
    #[serde(rename_all = "camelCase")]
    Granted { user_id: i64, reason: GrantReason },
    Denied,
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Granted { .. })
    }

    /// The resolved user id; `None` on denial.
    pub fn user_id(&self) -> Option<i64> {
        match self {
            AccessDecision::Granted { user_id, .. } => Some(*user_id),
            AccessDecision::Denied => None,
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            AccessDecision::Granted { reason, .. } => reason.as_str(),
            AccessDecision::Denied => "denied",
        }
    }
}
