//! User Directory
//!
//! Lookup of users by public uuid. In split deployments this is a call to
//! the user-of-record service; `PgUserDirectory` covers deployments that
//! share one database.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::shared::error::{AccessError, Result};
use crate::user::entity::{User, UserStatus};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolve a user. Fails with `RecordNotFound` when no user has `uuid`.
    async fn get_by_uuid(&self, uuid: &str) -> Result<User>;
}

pub(crate) fn parse_user_uuid(uuid: &str) -> Result<Uuid> {
    Uuid::parse_str(uuid).map_err(|e| AccessError::invalid_body("user_uuid", e.to_string()))
}

/// PostgreSQL implementation of UserDirectory reading the `users` table.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn get_by_uuid(&self, uuid: &str) -> Result<User> {
        const OP: &str = "user.get_by_uuid";
        let uuid = parse_user_uuid(uuid)?;

        let row = sqlx::query("SELECT id, uuid, status FROM users WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AccessError::server(OP, e))?
            .ok_or_else(|| AccessError::not_found("user", uuid))?;

        let status: String = row.try_get("status").map_err(|e| AccessError::server(OP, e))?;

        Ok(User {
            id: row.try_get("id").map_err(|e| AccessError::server(OP, e))?,
            uuid: row.try_get("uuid").map_err(|e| AccessError::server(OP, e))?,
            // Statuses written by a newer user service are treated as unknown
            status: status.parse().unwrap_or(UserStatus::Unknown),
        })
    }
}
