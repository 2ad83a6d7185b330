//! User Entity
//!
//! Users are owned by the user-of-record service. The access control core
//! only reads them, through a [`UserDirectory`](super::directory::UserDirectory).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::role::entity::UnknownKey;
use crate::shared::error::{AccessError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Active,
    Inactive,
    Unverified,
    Banned,
    Unknown,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "ACTIVE",
            UserStatus::Inactive => "INACTIVE",
            UserStatus::Unverified => "UNVERIFIED",
            UserStatus::Banned => "BANNED",
            UserStatus::Unknown => "UNKNOWN",
        }
    }

    /// Only active users may act. `Unknown` is treated like `Inactive`.
    pub fn ensure_active(&self, uuid: &Uuid) -> Result<()> {
        let uuid = uuid.to_string();
        match self {
            UserStatus::Active => Ok(()),
            UserStatus::Inactive | UserStatus::Unknown => Err(AccessError::UserInActive { uuid }),
            UserStatus::Unverified => Err(AccessError::UserUnVerified { uuid }),
            UserStatus::Banned => Err(AccessError::UserIsBanned { uuid }),
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = UnknownKey;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(UserStatus::Active),
            "INACTIVE" => Ok(UserStatus::Inactive),
            "UNVERIFIED" => Ok(UserStatus::Unverified),
            "BANNED" => Ok(UserStatus::Banned),
            "UNKNOWN" => Ok(UserStatus::Unknown),
            other => Err(UnknownKey(other.to_string())),
        }
    }
}

/// Identity subject as seen by the access control core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Internal identifier used for joins
    pub id: i64,
    /// Public identifier
    pub uuid: Uuid,
    pub status: UserStatus,
}

impl User {
    pub fn new(id: i64, status: UserStatus) -> Self {
        Self {
            id,
            uuid: Uuid::new_v4(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_gate() {
        let uuid = Uuid::new_v4();
        assert!(UserStatus::Active.ensure_active(&uuid).is_ok());
        assert!(matches!(
            UserStatus::Inactive.ensure_active(&uuid),
            Err(AccessError::UserInActive { .. })
        ));
        assert!(matches!(
            UserStatus::Unknown.ensure_active(&uuid),
            Err(AccessError::UserInActive { .. })
        ));
        assert!(matches!(
            UserStatus::Unverified.ensure_active(&uuid),
            Err(AccessError::UserUnVerified { .. })
        ));
        assert!(matches!(
            UserStatus::Banned.ensure_active(&uuid),
            Err(AccessError::UserIsBanned { .. })
        ));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            UserStatus::Active,
            UserStatus::Inactive,
            UserStatus::Unverified,
            UserStatus::Banned,
            UserStatus::Unknown,
        ] {
            assert_eq!(status.as_str().parse::<UserStatus>().unwrap(), status);
        }
        assert!("active".parse::<UserStatus>().is_err());
    }
}
