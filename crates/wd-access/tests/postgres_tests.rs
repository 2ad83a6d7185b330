//! PostgreSQL and Redis Integration Tests
//!
//! These tests start containers and need a running Docker daemon:
//! cargo test -p wd-access --test postgres_tests -- --ignored
//!
//! Tests for:
//! - Schema bootstrap and default seeding
//! - Transaction commit and rollback through PgUnitOfWork
//! - Partial unique index on live role keys
//! - Access decisions over the real join queries
//! - Redis role cache round trip

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::redis::Redis;
use uuid::Uuid;

use wd_access::schema::init_schema;
use wd_access::{
    AccessDecision, AccessError, AclService, DefaultRoleSeeder, GrantReason, MemoryRoleCache,
    PermissionKey, PgUnitOfWork, PgUserDirectory, RedisRoleCache, RoleCache, RoleInput, RoleKey,
    RoleService, UnitOfWork,
};

async fn start_postgres() -> (ContainerAsync<Postgres>, PgPool) {
    let container = Postgres::default()
        .start()
        .await
        .expect("Failed to start postgres container");
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();

    let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("Failed to connect to postgres");

    init_schema(&pool).await.unwrap();
    (container, pool)
}

async fn seeded(pool: &PgPool) {
    let mut uow = PgUnitOfWork::new(pool.clone());
    uow.begin().await.unwrap();
    DefaultRoleSeeder::new().seed(&uow).await.unwrap();
    uow.commit().await.unwrap();
}

async fn insert_user(pool: &PgPool, status: &str) -> (i64, Uuid) {
    let uuid = Uuid::new_v4();
    let id: i64 = sqlx::query_scalar("INSERT INTO users (uuid, status) VALUES ($1, $2) RETURNING id")
        .bind(uuid)
        .bind(status)
        .fetch_one(pool)
        .await
        .unwrap();
    (id, uuid)
}

#[tokio::test]
#[ignore]
async fn schema_init_and_seed_are_idempotent() {
    let (_container, pool) = start_postgres().await;
    init_schema(&pool).await.unwrap();

    seeded(&pool).await;
    seeded(&pool).await;

    let roles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles WHERE deleted_at IS NULL")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(roles, RoleKey::ALL.len() as i64);
}

#[tokio::test]
#[ignore]
async fn rollback_discards_and_commit_persists() {
    let (_container, pool) = start_postgres().await;
    let service = RoleService::new(Arc::new(MemoryRoleCache::new()), None);

    let mut uow = PgUnitOfWork::new(pool.clone());
    uow.begin().await.unwrap();
    service.create(&uow, RoleInput::new("Sales")).await.unwrap();
    uow.rollback().await.unwrap();

    let mut uow = PgUnitOfWork::new(pool.clone());
    uow.begin().await.unwrap();
    assert!(service.list(&uow).await.unwrap().is_empty());
    let role = service.create(&uow, RoleInput::new("Sales")).await.unwrap();
    uow.commit().await.unwrap();

    let mut uow = PgUnitOfWork::new(pool.clone());
    uow.begin().await.unwrap();
    let fetched = service.get(&uow, role.uuid).await.unwrap();
    assert_eq!(fetched.key, RoleKey::Sales);
    uow.commit().await.unwrap();

    // Finalized units refuse further work
    assert!(uow.roles().is_err());
}

#[tokio::test]
#[ignore]
async fn soft_deleted_role_frees_its_key() {
    let (_container, pool) = start_postgres().await;
    let service = RoleService::new(Arc::new(MemoryRoleCache::new()), None);

    let mut uow = PgUnitOfWork::new(pool.clone());
    uow.begin().await.unwrap();
    let first = service.create(&uow, RoleInput::new("Staff")).await.unwrap();
    let dup = service.create(&uow, RoleInput::new("staff")).await.unwrap_err();
    assert_eq!(dup, AccessError::role_existed("STAFF"));

    service.delete(&uow, first.uuid, 1).await.unwrap();
    let second = service.create(&uow, RoleInput::new("Staff")).await.unwrap();
    assert_ne!(first.uuid, second.uuid);
    uow.commit().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn access_decisions_over_seeded_roles() {
    let (_container, pool) = start_postgres().await;
    seeded(&pool).await;
    let acl = AclService::new(Arc::new(PgUserDirectory::new(pool.clone())));

    let (staff_id, staff_uuid) = insert_user(&pool, "ACTIVE").await;
    let (_, banned_uuid) = insert_user(&pool, "BANNED").await;
    let (root_id, root_uuid) = insert_user(&pool, "ACTIVE").await;

    let mut uow = PgUnitOfWork::new(pool.clone());
    uow.begin().await.unwrap();
    let staff_role = uow.roles().unwrap().find_by_key(RoleKey::Staff).await.unwrap().unwrap();
    let root_role = uow.roles().unwrap().find_by_key(RoleKey::SuperAdmin).await.unwrap().unwrap();
    acl.assign_roles(&uow, staff_id, &[staff_role.uuid.to_string()]).await.unwrap();
    acl.assign_roles(&uow, root_id, &[root_role.uuid.to_string()]).await.unwrap();

    let allowed = acl
        .check_access(&uow, &staff_uuid.to_string(), &[PermissionKey::ReadRole])
        .await
        .unwrap();
    assert_eq!(
        allowed,
        AccessDecision::Granted {
            user_id: staff_id,
            reason: GrantReason::Permission
        }
    );

    let denied = acl
        .check_access(&uow, &staff_uuid.to_string(), &[PermissionKey::DeleteRole])
        .await
        .unwrap();
    assert_eq!(denied, AccessDecision::Denied);

    let bypass = acl
        .check_access(&uow, &root_uuid.to_string(), &[PermissionKey::DeleteRole])
        .await
        .unwrap();
    assert!(matches!(bypass, AccessDecision::Granted { reason: GrantReason::SuperAdmin, .. }));

    let banned = acl
        .check_access(&uow, &banned_uuid.to_string(), &[PermissionKey::None])
        .await
        .unwrap_err();
    assert_eq!(banned.message_key(), "user_is_banned");

    // Replace-all: the default role supersedes staff
    acl.assign_user_role_to_user(&uow, staff_id).await.unwrap();
    let keys = uow.roles().unwrap().get_role_keys(staff_id).await.unwrap();
    assert_eq!(keys, vec![RoleKey::User]);
    uow.commit().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn redis_cache_round_trip() {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start redis container");
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(6379).await.unwrap();

    let cache = RedisRoleCache::connect(
        &format!("redis://{}:{}", host, port),
        "warden:role:",
        Duration::from_secs(60),
    )
    .await
    .unwrap();

    let role_uuid = Uuid::new_v4().to_string();
    assert_eq!(cache.get(&role_uuid).await.unwrap(), None);

    let mut entries = HashMap::new();
    entries.insert(role_uuid.clone(), RoleKey::User);
    cache.set_bulk(entries).await.unwrap();

    assert_eq!(cache.get(&role_uuid).await.unwrap(), Some(RoleKey::User));
}
