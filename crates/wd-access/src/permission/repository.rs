//! Permission Repository

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::warn;
use uuid::Uuid;

use crate::permission::entity::{Permission, PermissionKey};
use crate::shared::error::{AccessError, Result};
use crate::usecase::unit_of_work::{lock_tx, TxHandle};

#[async_trait]
pub trait PermissionRepository: Send + Sync {
    /// Deduplicated keys reachable by a user through live role assignments
    /// and live direct grants.
    async fn get_user_permission_keys(&self, user_id: i64) -> Result<Vec<PermissionKey>>;

    /// All live permissions, oldest first.
    async fn list(&self) -> Result<Vec<Permission>>;

    /// Internal ids of the live permissions among `uuids`. Unknown uuids
    /// are not an error; they are simply absent from the result.
    async fn filter_valid_permissions(&self, uuids: &[Uuid]) -> Result<Vec<i64>>;

    async fn create(&self, permission: &Permission) -> Result<Permission>;
}

const PERMISSION_COLUMNS: &str =
    "id, uuid, title, key, group_name, description, created_at, updated_at, deleted_at";

pub(crate) fn permission_from_row(row: &PgRow, operation: &str) -> Result<Permission> {
    let map = |e: sqlx::Error| AccessError::server(operation, e);

    let key: String = row.try_get("key").map_err(map)?;
    let key = key
        .parse::<PermissionKey>()
        .map_err(|e| AccessError::server(operation, e))?;

    Ok(Permission {
        id: row.try_get("id").map_err(map)?,
        uuid: row.try_get("uuid").map_err(map)?,
        title: row.try_get("title").map_err(map)?,
        key,
        group: row.try_get("group_name").map_err(map)?,
        description: row.try_get("description").map_err(map)?,
        created_at: row.try_get("created_at").map_err(map)?,
        updated_at: row.try_get("updated_at").map_err(map)?,
        deleted_at: row.try_get("deleted_at").map_err(map)?,
    })
}

/// PostgreSQL implementation of PermissionRepository
pub struct PgPermissionRepository {
    tx: TxHandle,
}

impl PgPermissionRepository {
    pub fn new(tx: TxHandle) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl PermissionRepository for PgPermissionRepository {
    async fn get_user_permission_keys(&self, user_id: i64) -> Result<Vec<PermissionKey>> {
        const OP: &str = "permission.get_user_permission_keys";

        let mut tx = lock_tx(&self.tx, OP).await?;
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT p.key FROM access_controls ac \
             JOIN role_permissions rp ON rp.role_id = ac.role_id \
             JOIN roles r ON r.id = ac.role_id AND r.deleted_at IS NULL \
             JOIN permissions p ON p.id = rp.permission_id \
             WHERE ac.user_id = $1 AND ac.deleted_at IS NULL AND p.deleted_at IS NULL \
             UNION \
             SELECT p.key FROM access_controls ac \
             JOIN permissions p ON p.id = ac.permission_id \
             WHERE ac.user_id = $1 AND ac.deleted_at IS NULL AND p.deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AccessError::server(OP, e))?;

        Ok(keys
            .into_iter()
            .filter_map(|key| match key.parse::<PermissionKey>() {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(user_id, error = %e, "Skipping unknown permission key");
                    None
                }
            })
            .collect())
    }

    async fn list(&self) -> Result<Vec<Permission>> {
        const OP: &str = "permission.list";
        let query = format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE deleted_at IS NULL ORDER BY id ASC"
        );

        let mut tx = lock_tx(&self.tx, OP).await?;
        let rows = sqlx::query(&query)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| AccessError::server(OP, e))?;

        rows.iter().map(|row| permission_from_row(row, OP)).collect()
    }

    async fn filter_valid_permissions(&self, uuids: &[Uuid]) -> Result<Vec<i64>> {
        const OP: &str = "permission.filter_valid_permissions";
        if uuids.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = lock_tx(&self.tx, OP).await?;
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM permissions WHERE uuid = ANY($1) AND deleted_at IS NULL ORDER BY id ASC",
        )
        .bind(uuids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AccessError::server(OP, e))?;

        Ok(ids)
    }

    async fn create(&self, permission: &Permission) -> Result<Permission> {
        const OP: &str = "permission.create";
        let query = format!(
            "INSERT INTO permissions (uuid, title, key, group_name, description, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {PERMISSION_COLUMNS}"
        );

        let mut tx = lock_tx(&self.tx, OP).await?;
        let row = sqlx::query(&query)
            .bind(permission.uuid)
            .bind(&permission.title)
            .bind(permission.key.as_str())
            .bind(&permission.group)
            .bind(&permission.description)
            .bind(permission.created_at)
            .bind(permission.updated_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AccessError::server(OP, e))?;

        permission_from_row(&row, OP)
    }
}
