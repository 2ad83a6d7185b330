//! ACL Repository

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::debug;

use crate::acl::entity::AccessControl;
use crate::shared::error::{AccessError, Result};
use crate::usecase::unit_of_work::{lock_tx, TxHandle};

#[async_trait]
pub trait AclRepository: Send + Sync {
    /// Replace-all: soft-delete every live grant of the user, then insert
    /// one role grant per id in `role_ids`.
    async fn assign_roles_to_user(&self, user_id: i64, role_ids: &[i64]) -> Result<()>;

    /// Additive: insert a direct grant for each permission the user does
    /// not already hold directly.
    async fn grant_permissions_to_user(&self, user_id: i64, permission_ids: &[i64]) -> Result<()>;

    /// Live grants of a user, oldest first.
    async fn list_by_user(&self, user_id: i64) -> Result<Vec<AccessControl>>;
}

fn access_control_from_row(row: &PgRow, operation: &str) -> Result<AccessControl> {
    let map = |e: sqlx::Error| AccessError::server(operation, e);

    Ok(AccessControl {
        id: row.try_get("id").map_err(map)?,
        user_id: row.try_get("user_id").map_err(map)?,
        role_id: row.try_get("role_id").map_err(map)?,
        permission_id: row.try_get("permission_id").map_err(map)?,
        created_at: row.try_get("created_at").map_err(map)?,
        deleted_at: row.try_get("deleted_at").map_err(map)?,
    })
}

/// PostgreSQL implementation of AclRepository
pub struct PgAclRepository {
    tx: TxHandle,
}

impl PgAclRepository {
    pub fn new(tx: TxHandle) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl AclRepository for PgAclRepository {
    async fn assign_roles_to_user(&self, user_id: i64, role_ids: &[i64]) -> Result<()> {
        const OP: &str = "acl.assign_roles_to_user";

        let mut tx = lock_tx(&self.tx, OP).await?;
        let removed = sqlx::query(
            "UPDATE access_controls SET deleted_at = NOW() \
             WHERE user_id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AccessError::server(OP, e))?
        .rows_affected();

        if !role_ids.is_empty() {
            sqlx::query(
                "INSERT INTO access_controls (user_id, role_id) \
                 SELECT $1, role_id FROM (SELECT DISTINCT unnest($2::bigint[]) AS role_id) ids",
            )
            .bind(user_id)
            .bind(role_ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| AccessError::server(OP, e))?;
        }

        debug!(user_id, removed, assigned = role_ids.len(), "User roles replaced");
        Ok(())
    }

    async fn grant_permissions_to_user(&self, user_id: i64, permission_ids: &[i64]) -> Result<()> {
        const OP: &str = "acl.grant_permissions_to_user";
        if permission_ids.is_empty() {
            return Ok(());
        }

        let mut tx = lock_tx(&self.tx, OP).await?;
        let granted = sqlx::query(
            "INSERT INTO access_controls (user_id, permission_id) \
             SELECT $1, ids.permission_id FROM (SELECT DISTINCT unnest($2::bigint[]) AS permission_id) ids \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM access_controls ac \
                 WHERE ac.user_id = $1 AND ac.permission_id = ids.permission_id AND ac.deleted_at IS NULL \
             )",
        )
        .bind(user_id)
        .bind(permission_ids)
        .execute(&mut *tx)
        .await
        .map_err(|e| AccessError::server(OP, e))?
        .rows_affected();

        debug!(user_id, granted, "Direct permissions granted");
        Ok(())
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<AccessControl>> {
        const OP: &str = "acl.list_by_user";

        let mut tx = lock_tx(&self.tx, OP).await?;
        let rows = sqlx::query(
            "SELECT id, user_id, role_id, permission_id, created_at, deleted_at \
             FROM access_controls WHERE user_id = $1 AND deleted_at IS NULL ORDER BY id ASC",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AccessError::server(OP, e))?;

        rows.iter()
            .map(|row| access_control_from_row(row, OP))
            .collect()
    }
}
