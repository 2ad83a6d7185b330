//! Warden Admin
//!
//! Operator CLI over the access-control core:
//! - Schema bootstrap and default role seeding
//! - Role listing (warms the default-role cache) and the permission catalogue
//! - Access checks for a user against permission keys
//! - Default role assignment and role permission sync
//!
//! Every command runs in a single unit of work that commits on success and
//! rolls back on error.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use wd_access::schema::init_schema;
use wd_access::{
    AclService, DefaultRoleSeeder, MemoryRoleCache, PermissionKey, PermissionService, PgUnitOfWork,
    PgUserDirectory, PopulatorConfig, RedisRoleCache, RoleCache, RoleCachePopulator, RoleService,
    UnitOfWork,
};
use wd_common::init_logging;
use wd_config::{AppConfig, ConfigLoader};

/// Warden access-control administration
#[derive(Parser, Debug)]
#[command(name = "wd-admin")]
#[command(about = "Warden Admin - schema, seeding and access-control operations")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, env = "WARDEN_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create tables and indexes if missing
    Migrate,

    /// Create the permission catalogue and code-defined roles
    Seed,

    /// List live roles
    Roles,

    /// List live permissions
    Permissions,

    /// Decide whether a user holds any of the given permissions
    Check {
        user_uuid: String,

        #[arg(required = true, value_parser = parse_permission_key)]
        permissions: Vec<PermissionKey>,
    },

    /// Replace a user's roles with the default role
    AssignDefault { user_id: i64 },

    /// Replace a role's permission set
    SyncPermissions {
        role_uuid: Uuid,

        permission_uuids: Vec<String>,
    },
}

fn parse_permission_key(raw: &str) -> Result<PermissionKey, String> {
    raw.to_uppercase()
        .parse::<PermissionKey>()
        .map_err(|e| e.to_string())
}

struct Services {
    roles: RoleService,
    permissions: PermissionService,
    acl: AclService,
    populator: Arc<RoleCachePopulator>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ConfigLoader::with_path(path).load(),
        None => ConfigLoader::new().load(),
    }
    .context("Failed to load configuration")?;

    init_logging("wd-admin", config.logging.format, &config.logging.level)?;

    let pool = connect(&config).await?;
    let services = build_services(&config, &pool).await?;

    let outcome = run(&args.command, &config, &pool, &services).await;

    // Give pending cache writes a chance to land before exit
    services.populator.shutdown().await;
    pool.close().await;

    outcome
}

async fn connect(config: &AppConfig) -> Result<PgPool> {
    info!(max_connections = config.database.max_connections, "Connecting to PostgreSQL");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .connect(&config.database.url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    Ok(pool)
}

async fn build_services(config: &AppConfig, pool: &PgPool) -> Result<Services> {
    let cache: Arc<dyn RoleCache> = if config.role_cache.enabled {
        let redis = RedisRoleCache::connect(
            &config.redis.url,
            &config.redis.key_prefix,
            config.redis.ttl(),
        )
        .await
        .context("Failed to connect to Redis")?;
        Arc::new(redis)
    } else {
        info!("Role cache disabled, using in-process cache");
        Arc::new(MemoryRoleCache::new())
    };

    let populator = Arc::new(RoleCachePopulator::start(
        cache.clone(),
        PopulatorConfig {
            queue_capacity: config.role_cache.queue_capacity,
            task_timeout: config.role_cache.task_timeout(),
        },
    ));

    Ok(Services {
        roles: RoleService::new(cache, Some(populator.clone())),
        permissions: PermissionService::new(),
        acl: AclService::new(Arc::new(PgUserDirectory::new(pool.clone()))),
        populator,
    })
}

async fn begin(pool: &PgPool) -> Result<PgUnitOfWork> {
    let mut uow = PgUnitOfWork::new(pool.clone());
    uow.begin().await?;
    Ok(uow)
}

/// Commit on success, roll back on error.
async fn finish<T>(mut uow: PgUnitOfWork, result: wd_access::Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = uow.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(e.into())
        }
    }
}

async fn run(
    command: &Command,
    config: &AppConfig,
    pool: &PgPool,
    services: &Services,
) -> Result<ExitCode> {
    if config.seed.on_startup && !matches!(command, Command::Migrate) {
        let uow = begin(pool).await?;
        let result = DefaultRoleSeeder::new().seed(&uow).await;
        finish(uow, result).await?;
    }

    match command {
        Command::Migrate => {
            init_schema(pool).await?;
            println!("Schema is up to date");
        }

        Command::Seed => {
            let uow = begin(pool).await?;
            let result = DefaultRoleSeeder::new().seed(&uow).await;
            let report = finish(uow, result).await?;
            println!(
                "Created {} permissions and {} roles",
                report.permissions_created, report.roles_created
            );
        }

        Command::Roles => {
            let uow = begin(pool).await?;
            let result = services.roles.list(&uow).await;
            let roles = finish(uow, result).await?;
            println!("{}", serde_json::to_string_pretty(&roles)?);
        }

        Command::Permissions => {
            let uow = begin(pool).await?;
            let result = services.permissions.list(&uow).await;
            let permissions = finish(uow, result).await?;
            println!("{}", serde_json::to_string_pretty(&permissions)?);
        }

        Command::Check {
            user_uuid,
            permissions,
        } => {
            let uow = begin(pool).await?;
            let result = services.acl.check_access(&uow, user_uuid, permissions).await;
            let decision = finish(uow, result).await?;
            println!("{}", serde_json::to_string_pretty(&decision)?);

            if !decision.is_allowed() {
                return Ok(ExitCode::from(2));
            }
        }

        Command::AssignDefault { user_id } => {
            let uow = begin(pool).await?;
            let result = services.acl.assign_user_role_to_user(&uow, *user_id).await;
            let role = finish(uow, result).await?;
            println!("User {} now holds role {} ({})", user_id, role.key, role.uuid);
        }

        Command::SyncPermissions {
            role_uuid,
            permission_uuids,
        } => {
            let uow = begin(pool).await?;
            let result = services
                .roles
                .sync_permissions(&uow, *role_uuid, permission_uuids.as_slice())
                .await;
            let synced = finish(uow, result).await?;
            println!("{}", serde_json::to_string_pretty(&synced)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_keys_parse_case_insensitively() {
        assert_eq!(parse_permission_key("read_role"), Ok(PermissionKey::ReadRole));
        assert_eq!(parse_permission_key("NONE"), Ok(PermissionKey::None));
        assert!(parse_permission_key("launch_rockets").is_err());
    }

    #[test]
    fn test_check_requires_a_permission() {
        let err = Args::try_parse_from(["wd-admin", "check", "some-user"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let args =
            Args::try_parse_from(["wd-admin", "check", "some-user", "read_user", "BAN_USER"])
                .unwrap();
        match args.command {
            Command::Check { permissions, .. } => {
                assert_eq!(permissions, vec![PermissionKey::ReadUser, PermissionKey::BanUser]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
