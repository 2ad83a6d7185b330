//! Role Repository
//!
//! Contract for role persistence plus the PostgreSQL implementation bound
//! to a unit of work transaction.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::permission::repository::permission_from_row;
use crate::role::entity::{Role, RoleKey, RoleWithPermissions};
use crate::shared::error::{AccessError, Result};
use crate::usecase::unit_of_work::{lock_tx, TxHandle};

#[async_trait]
pub trait RoleRepository: Send + Sync {
    /// Persist a new role and return it with its store-assigned id.
    async fn create(&self, role: &Role) -> Result<Role>;

    /// Fetch a live role. Fails with `RecordNotFound` when absent.
    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Role>;

    /// All live roles, oldest first.
    async fn list(&self) -> Result<Vec<Role>>;

    /// Overwrite title, key, description and default flag of a live role.
    /// Fails with `NoRowsEffected` when no live role has `uuid`.
    async fn update(&self, role: &Role, uuid: Uuid) -> Result<Role>;

    /// Soft-delete a non-default live role. Zero affected rows, either
    /// because the role is default or because it does not exist, fails with
    /// `IsNotDeletable`.
    async fn delete(&self, uuid: Uuid, deleted_by: i64) -> Result<()>;

    /// Whether a live role other than `exclude` already uses `key`.
    async fn exist_key(&self, key: RoleKey, exclude: Option<Uuid>) -> Result<bool>;

    /// The well-known default `USER` role.
    async fn get_role_user(&self) -> Result<Role>;

    async fn find_by_key(&self, key: RoleKey) -> Result<Option<Role>>;

    /// A live role with its live permissions.
    async fn get_permissions(&self, uuid: Uuid) -> Result<RoleWithPermissions>;

    /// Replace every permission attached to `role_id` with `permission_ids`.
    async fn sync_permissions(&self, role_id: i64, permission_ids: &[i64]) -> Result<()>;

    /// Distinct keys of the live roles assigned to a user.
    async fn get_role_keys(&self, user_id: i64) -> Result<Vec<RoleKey>>;
}

const ROLE_COLUMNS: &str =
    "id, uuid, title, key, description, is_default, created_at, updated_at, deleted_at, deleted_by";

fn role_from_row(row: &PgRow, operation: &str) -> Result<Role> {
    let map = |e: sqlx::Error| AccessError::server(operation, e);

    let key: String = row.try_get("key").map_err(map)?;
    let key = key
        .parse::<RoleKey>()
        .map_err(|e| AccessError::server(operation, e))?;

    Ok(Role {
        id: row.try_get("id").map_err(map)?,
        uuid: row.try_get("uuid").map_err(map)?,
        title: row.try_get("title").map_err(map)?,
        key,
        description: row.try_get("description").map_err(map)?,
        is_default: row.try_get("is_default").map_err(map)?,
        created_at: row.try_get("created_at").map_err(map)?,
        updated_at: row.try_get("updated_at").map_err(map)?,
        deleted_at: row.try_get("deleted_at").map_err(map)?,
        deleted_by: row.try_get("deleted_by").map_err(map)?,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

/// PostgreSQL implementation of RoleRepository
pub struct PgRoleRepository {
    tx: TxHandle,
}

impl PgRoleRepository {
    pub fn new(tx: TxHandle) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl RoleRepository for PgRoleRepository {
    async fn create(&self, role: &Role) -> Result<Role> {
        const OP: &str = "role.create";
        let query = format!(
            "INSERT INTO roles (uuid, title, key, description, is_default, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {ROLE_COLUMNS}"
        );

        let mut tx = lock_tx(&self.tx, OP).await?;
        let row = sqlx::query(&query)
            .bind(role.uuid)
            .bind(&role.title)
            .bind(role.key.as_str())
            .bind(&role.description)
            .bind(role.is_default)
            .bind(role.created_at)
            .bind(role.updated_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                // A concurrent writer won the partial unique index on live keys
                if is_unique_violation(&e) {
                    AccessError::role_existed(role.key.as_str())
                } else {
                    AccessError::server(OP, e)
                }
            })?;

        let created = role_from_row(&row, OP)?;
        debug!(role_uuid = %created.uuid, key = %created.key, "Role created");
        Ok(created)
    }

    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Role> {
        const OP: &str = "role.get_by_uuid";
        let query =
            format!("SELECT {ROLE_COLUMNS} FROM roles WHERE uuid = $1 AND deleted_at IS NULL");

        let mut tx = lock_tx(&self.tx, OP).await?;
        let row = sqlx::query(&query)
            .bind(uuid)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AccessError::server(OP, e))?
            .ok_or_else(|| AccessError::not_found("role", uuid))?;

        role_from_row(&row, OP)
    }

    async fn list(&self) -> Result<Vec<Role>> {
        const OP: &str = "role.list";
        let query =
            format!("SELECT {ROLE_COLUMNS} FROM roles WHERE deleted_at IS NULL ORDER BY id ASC");

        let mut tx = lock_tx(&self.tx, OP).await?;
        let rows = sqlx::query(&query)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| AccessError::server(OP, e))?;

        rows.iter().map(|row| role_from_row(row, OP)).collect()
    }

    async fn update(&self, role: &Role, uuid: Uuid) -> Result<Role> {
        const OP: &str = "role.update";
        let query = format!(
            "UPDATE roles SET title = $1, key = $2, description = $3, is_default = $4, updated_at = NOW() \
             WHERE uuid = $5 AND deleted_at IS NULL RETURNING {ROLE_COLUMNS}"
        );

        let mut tx = lock_tx(&self.tx, OP).await?;
        let row = sqlx::query(&query)
            .bind(&role.title)
            .bind(role.key.as_str())
            .bind(&role.description)
            .bind(role.is_default)
            .bind(uuid)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AccessError::role_existed(role.key.as_str())
                } else {
                    AccessError::server(OP, e)
                }
            })?
            .ok_or_else(|| AccessError::no_rows(OP))?;

        role_from_row(&row, OP)
    }

    async fn delete(&self, uuid: Uuid, deleted_by: i64) -> Result<()> {
        const OP: &str = "role.delete";

        let mut tx = lock_tx(&self.tx, OP).await?;
        let result = sqlx::query(
            "UPDATE roles SET deleted_at = NOW(), deleted_by = $2 \
             WHERE uuid = $1 AND is_default = FALSE AND deleted_at IS NULL",
        )
        .bind(uuid)
        .bind(deleted_by)
        .execute(&mut *tx)
        .await
        .map_err(|e| AccessError::server(OP, e))?;

        if result.rows_affected() == 0 {
            return Err(AccessError::not_deletable("role", uuid));
        }

        debug!(role_uuid = %uuid, deleted_by, "Role soft-deleted");
        Ok(())
    }

    async fn exist_key(&self, key: RoleKey, exclude: Option<Uuid>) -> Result<bool> {
        const OP: &str = "role.exist_key";

        let mut tx = lock_tx(&self.tx, OP).await?;
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM roles WHERE key = $1 AND deleted_at IS NULL \
             AND ($2::uuid IS NULL OR uuid <> $2))",
        )
        .bind(key.as_str())
        .bind(exclude)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AccessError::server(OP, e))?;

        Ok(exists)
    }

    async fn get_role_user(&self) -> Result<Role> {
        self.find_by_key(RoleKey::User)
            .await?
            .ok_or_else(|| AccessError::not_found("role", RoleKey::User))
    }

    async fn find_by_key(&self, key: RoleKey) -> Result<Option<Role>> {
        const OP: &str = "role.find_by_key";
        let query =
            format!("SELECT {ROLE_COLUMNS} FROM roles WHERE key = $1 AND deleted_at IS NULL");

        let mut tx = lock_tx(&self.tx, OP).await?;
        let row = sqlx::query(&query)
            .bind(key.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AccessError::server(OP, e))?;

        row.map(|row| role_from_row(&row, OP)).transpose()
    }

    async fn get_permissions(&self, uuid: Uuid) -> Result<RoleWithPermissions> {
        const OP: &str = "role.get_permissions";
        let role = self.get_by_uuid(uuid).await?;

        let mut tx = lock_tx(&self.tx, OP).await?;
        let rows = sqlx::query(
            "SELECT p.id, p.uuid, p.title, p.key, p.group_name, p.description, \
                    p.created_at, p.updated_at, p.deleted_at \
             FROM permissions p \
             JOIN role_permissions rp ON rp.permission_id = p.id \
             WHERE rp.role_id = $1 AND p.deleted_at IS NULL \
             ORDER BY p.id ASC",
        )
        .bind(role.id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AccessError::server(OP, e))?;

        let permissions = rows
            .iter()
            .map(|row| permission_from_row(row, OP))
            .collect::<Result<Vec<_>>>()?;

        Ok(RoleWithPermissions { role, permissions })
    }

    async fn sync_permissions(&self, role_id: i64, permission_ids: &[i64]) -> Result<()> {
        const OP: &str = "role.sync_permissions";

        let mut tx = lock_tx(&self.tx, OP).await?;
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AccessError::server(OP, e))?;

        if !permission_ids.is_empty() {
            sqlx::query(
                "INSERT INTO role_permissions (role_id, permission_id) \
                 SELECT $1, unnest($2::bigint[]) ON CONFLICT DO NOTHING",
            )
            .bind(role_id)
            .bind(permission_ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| AccessError::server(OP, e))?;
        }

        debug!(role_id, count = permission_ids.len(), "Role permissions replaced");
        Ok(())
    }

    async fn get_role_keys(&self, user_id: i64) -> Result<Vec<RoleKey>> {
        const OP: &str = "role.get_role_keys";

        let mut tx = lock_tx(&self.tx, OP).await?;
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT r.key FROM access_controls ac \
             JOIN roles r ON r.id = ac.role_id \
             WHERE ac.user_id = $1 AND ac.deleted_at IS NULL AND r.deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AccessError::server(OP, e))?;

        Ok(keys
            .into_iter()
            .filter_map(|key| match key.parse::<RoleKey>() {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(user_id, error = %e, "Skipping unknown role key");
                    None
                }
            })
            .collect())
    }
}
