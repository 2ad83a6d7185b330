//! PostgreSQL Schema
//!
//! Idempotent DDL for the tables the repositories read and write. Live keys
//! are unique through partial indexes, so a soft-deleted role frees its key.

use sqlx::PgPool;
use tracing::info;

use crate::shared::error::{AccessError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id BIGSERIAL PRIMARY KEY,
    uuid UUID NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'UNVERIFIED',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS roles (
    id BIGSERIAL PRIMARY KEY,
    uuid UUID NOT NULL UNIQUE,
    title TEXT NOT NULL,
    key TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    is_default BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    deleted_at TIMESTAMPTZ,
    deleted_by BIGINT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_roles_live_key ON roles(key) WHERE deleted_at IS NULL;

CREATE TABLE IF NOT EXISTS permissions (
    id BIGSERIAL PRIMARY KEY,
    uuid UUID NOT NULL UNIQUE,
    title TEXT NOT NULL,
    key TEXT NOT NULL,
    group_name TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    deleted_at TIMESTAMPTZ
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_permissions_live_key ON permissions(key) WHERE deleted_at IS NULL;

CREATE TABLE IF NOT EXISTS role_permissions (
    role_id BIGINT NOT NULL REFERENCES roles(id),
    permission_id BIGINT NOT NULL REFERENCES permissions(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (role_id, permission_id)
);

CREATE TABLE IF NOT EXISTS access_controls (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL,
    role_id BIGINT REFERENCES roles(id),
    permission_id BIGINT REFERENCES permissions(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    deleted_at TIMESTAMPTZ,
    CHECK ((role_id IS NULL) <> (permission_id IS NULL))
);
CREATE INDEX IF NOT EXISTS idx_access_controls_user ON access_controls(user_id) WHERE deleted_at IS NULL;
"#;

/// Create every table and index that does not exist yet.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    // raw_sql runs the whole multi-statement script in one round trip
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| AccessError::server("schema.init", e))?;

    info!("Initialized PostgreSQL access control schema");
    Ok(())
}
