//! Access Control Errors
//!
//! Every failure the core raises is an `AccessError`. Variants carry only
//! strings so the error stays `Clone` and can be rebuilt on the far side of
//! an RPC boundary from its message key and attributes (see `transport`).
//!
//! Infrastructure failures go through [`AccessError::server`], which logs the
//! underlying driver error with its operation name and keeps only the name.
//!
//! ```ignore
//! use wd_access::{attrs, AccessError};
//!
//! let err = AccessError::role_existed("ADMIN");
//! assert_eq!(err.message_key(), "role_existed");
//! assert_eq!(err.attributes(), attrs! { "key" => "ADMIN" });
//! ```

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Macro for creating error attribute maps.
///
/// ```ignore
/// let attributes = attrs! {
///     "entity" => "role",
///     "id" => role_uuid,
/// };
/// ```
#[macro_export]
macro_rules! attrs {
    () => {
        std::collections::BTreeMap::<String, String>::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = std::collections::BTreeMap::<String, String>::new();
        $(
            map.insert($key.to_string(), $value.to_string());
        )+
        map
    }};
}

pub mod keys {
    pub const SERVER_ERROR: &str = "server_error";
    pub const RECORD_NOT_FOUND: &str = "record_not_found";
    pub const ROLE_EXISTED: &str = "role_existed";
    pub const IS_NOT_DELETABLE: &str = "is_not_deletable";
    pub const NO_ROWS_EFFECTED: &str = "no_rows_effected";
    pub const INVALID_REQUEST_BODY: &str = "invalid_request_body";
    pub const USER_INACTIVE: &str = "user_inactive";
    pub const USER_UNVERIFIED: &str = "user_unverified";
    pub const USER_IS_BANNED: &str = "user_is_banned";
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "message_key", rename_all = "snake_case")]
pub enum AccessError {
    /// Infrastructure or unexpected failure. Safe to retry at a higher layer.
    #[error("Server error during {operation}")]
    ServerError { operation: String },

    #[error("{entity} not found: {id}")]
    RecordNotFound { entity: String, id: String },

    #[error("Role with key {key} already exists")]
    RoleExisted { key: String },

    #[error("{entity} {id} is not deletable")]
    IsNotDeletable { entity: String, id: String },

    #[error("No rows affected by {operation}")]
    NoRowsEffected { operation: String },

    #[error("Invalid request body: {field} {reason}")]
    InvalidRequestBody { field: String, reason: String },

    #[error("User {uuid} is inactive")]
    #[serde(rename = "user_inactive")]
    UserInActive { uuid: String },

    #[error("User {uuid} is not verified")]
    #[serde(rename = "user_unverified")]
    UserUnVerified { uuid: String },

    #[error("User {uuid} is banned")]
    UserIsBanned { uuid: String },
}

pub type Result<T> = std::result::Result<T, AccessError>;

impl AccessError {
    /// Wrap an infrastructure failure. The cause is logged here and dropped.
    pub fn server(operation: impl Into<String>, cause: impl Display) -> Self {
        let operation = operation.into();
        error!(operation = %operation, error = %cause, "Infrastructure failure");
        Self::ServerError { operation }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Display) -> Self {
        Self::RecordNotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn role_existed(key: impl Into<String>) -> Self {
        Self::RoleExisted { key: key.into() }
    }

    pub fn not_deletable(entity: impl Into<String>, id: impl Display) -> Self {
        Self::IsNotDeletable {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn no_rows(operation: impl Into<String>) -> Self {
        Self::NoRowsEffected {
            operation: operation.into(),
        }
    }

    pub fn invalid_body(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRequestBody {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Stable key used by callers to look up a localized message.
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::ServerError { .. } => keys::SERVER_ERROR,
            Self::RecordNotFound { .. } => keys::RECORD_NOT_FOUND,
            Self::RoleExisted { .. } => keys::ROLE_EXISTED,
            Self::IsNotDeletable { .. } => keys::IS_NOT_DELETABLE,
            Self::NoRowsEffected { .. } => keys::NO_ROWS_EFFECTED,
            Self::InvalidRequestBody { .. } => keys::INVALID_REQUEST_BODY,
            Self::UserInActive { .. } => keys::USER_INACTIVE,
            Self::UserUnVerified { .. } => keys::USER_UNVERIFIED,
            Self::UserIsBanned { .. } => keys::USER_IS_BANNED,
        }
    }

    /// Interpolation values for the localized message.
    pub fn attributes(&self) -> BTreeMap<String, String> {
        match self {
            Self::ServerError { operation } | Self::NoRowsEffected { operation } => {
                attrs! { "operation" => operation }
            }
            Self::RecordNotFound { entity, id } | Self::IsNotDeletable { entity, id } => {
                attrs! { "entity" => entity, "id" => id }
            }
            Self::RoleExisted { key } => attrs! { "key" => key },
            Self::InvalidRequestBody { field, reason } => {
                attrs! { "field" => field, "reason" => reason }
            }
            Self::UserInActive { uuid }
            | Self::UserUnVerified { uuid }
            | Self::UserIsBanned { uuid } => attrs! { "uuid" => uuid },
        }
    }

    /// Rebuild an error from its message key and attributes.
    ///
    /// Unknown keys collapse to `ServerError` so a newer peer never makes an
    /// older caller treat an infrastructure failure as a business outcome.
    pub fn from_parts(message_key: &str, attributes: &BTreeMap<String, String>) -> Self {
        let get = |name: &str| attributes.get(name).cloned().unwrap_or_default();

        match message_key {
            keys::RECORD_NOT_FOUND => Self::RecordNotFound {
                entity: get("entity"),
                id: get("id"),
            },
            keys::ROLE_EXISTED => Self::RoleExisted { key: get("key") },
            keys::IS_NOT_DELETABLE => Self::IsNotDeletable {
                entity: get("entity"),
                id: get("id"),
            },
            keys::NO_ROWS_EFFECTED => Self::NoRowsEffected {
                operation: get("operation"),
            },
            keys::INVALID_REQUEST_BODY => Self::InvalidRequestBody {
                field: get("field"),
                reason: get("reason"),
            },
            keys::USER_INACTIVE => Self::UserInActive { uuid: get("uuid") },
            keys::USER_UNVERIFIED => Self::UserUnVerified { uuid: get("uuid") },
            keys::USER_IS_BANNED => Self::UserIsBanned { uuid: get("uuid") },
            keys::SERVER_ERROR => Self::ServerError {
                operation: get("operation"),
            },
            _ => Self::ServerError {
                operation: "remote".to_string(),
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServerError { .. })
    }

    /// Suggested HTTP status for the excluded HTTP transport.
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::ServerError { .. } => 500,
            Self::RecordNotFound { .. } | Self::NoRowsEffected { .. } => 404,
            Self::RoleExisted { .. } => 409,
            Self::IsNotDeletable { .. } => 422,
            Self::InvalidRequestBody { .. } => 400,
            Self::UserInActive { .. } | Self::UserUnVerified { .. } | Self::UserIsBanned { .. } => {
                403
            }
        }
    }
}
