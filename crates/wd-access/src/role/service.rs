//! Role Service
//!
//! CRUD over roles and replace-all permission sync, routed through the
//! caller's unit of work. Listing hands the default-role mapping to the
//! cache populator; updating reads the cache to keep machine keys stable.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::role::cache::RoleCache;
use crate::role::cache_populator::RoleCachePopulator;
use crate::role::entity::{Role, RoleInput, RoleKey, RoleWithPermissions};
use crate::shared::error::{AccessError, Result};
use crate::usecase::unit_of_work::UnitOfWork;

pub struct RoleService {
    cache: Arc<dyn RoleCache>,
    populator: Option<Arc<RoleCachePopulator>>,
}

impl RoleService {
    pub fn new(cache: Arc<dyn RoleCache>, populator: Option<Arc<RoleCachePopulator>>) -> Self {
        Self { cache, populator }
    }

    /// Create a role whose key is derived from its title.
    pub async fn create(&self, uow: &dyn UnitOfWork, input: RoleInput) -> Result<Role> {
        let title = validated_title(&input.title)?;
        let key = RoleKey::from_title(title)?;

        let roles = uow.roles()?;
        if roles.exist_key(key, None).await? {
            return Err(AccessError::role_existed(key.as_str()));
        }

        let role = Role::new(title, key)
            .with_description(input.description)
            .with_default(input.is_default);
        let created = roles.create(&role).await?;

        info!(role_uuid = %created.uuid, key = %created.key, "Role created");
        Ok(created)
    }

    pub async fn get(&self, uow: &dyn UnitOfWork, uuid: Uuid) -> Result<Role> {
        uow.roles()?.get_by_uuid(uuid).await
    }

    /// List live roles and queue the default-role mapping for the cache.
    ///
    /// Never waits on the cache and never fails because of it.
    pub async fn list(&self, uow: &dyn UnitOfWork) -> Result<Vec<Role>> {
        let roles = uow.roles()?.list().await?;

        let defaults: HashMap<String, RoleKey> = roles
            .iter()
            .filter(|role| role.is_default)
            .map(|role| (role.uuid.to_string(), role.key))
            .collect();

        if let Some(populator) = &self.populator {
            if !defaults.is_empty() && !populator.submit(defaults) {
                debug!("Default role mapping not queued for caching");
            }
        }

        Ok(roles)
    }

    /// Update a role. A key already cached for the role is kept; otherwise
    /// the key is derived from the new title. Cache read failures propagate.
    pub async fn update(&self, uow: &dyn UnitOfWork, uuid: Uuid, input: RoleInput) -> Result<Role> {
        let title = validated_title(&input.title)?;

        let key = match self.cache.get(&uuid.to_string()).await? {
            Some(cached) => {
                debug!(role_uuid = %uuid, key = %cached, "Keeping cached role key");
                cached
            }
            None => RoleKey::from_title(title)?,
        };

        let roles = uow.roles()?;
        if roles.exist_key(key, Some(uuid)).await? {
            return Err(AccessError::role_existed(key.as_str()));
        }

        let mut role = Role::new(title, key)
            .with_description(input.description)
            .with_default(input.is_default);
        role.uuid = uuid;

        let updated = roles.update(&role, uuid).await?;
        info!(role_uuid = %uuid, key = %updated.key, "Role updated");
        Ok(updated)
    }

    /// Soft-delete a non-default role.
    pub async fn delete(&self, uow: &dyn UnitOfWork, uuid: Uuid, deleted_by: i64) -> Result<()> {
        uow.roles()?.delete(uuid, deleted_by).await?;
        info!(role_uuid = %uuid, deleted_by, "Role deleted");
        Ok(())
    }

    pub async fn get_permissions(&self, uow: &dyn UnitOfWork, uuid: Uuid) -> Result<RoleWithPermissions> {
        uow.roles()?.get_permissions(uuid).await
    }

    /// Replace the role's permissions with the live subset of
    /// `permission_uuids`. Unknown uuids are dropped; malformed ones reject
    /// the whole request.
    pub async fn sync_permissions<S: AsRef<str>>(
        &self,
        uow: &dyn UnitOfWork,
        uuid: Uuid,
        permission_uuids: &[S],
    ) -> Result<RoleWithPermissions> {
        let parsed = parse_uuids("permission_uuids", permission_uuids)?;

        let permission_ids = uow.permissions()?.filter_valid_permissions(&parsed).await?;
        if permission_ids.len() < parsed.len() {
            warn!(
                role_uuid = %uuid,
                requested = parsed.len(),
                valid = permission_ids.len(),
                "Dropping unknown permissions from sync"
            );
        }

        let roles = uow.roles()?;
        let role = roles.get_by_uuid(uuid).await?;
        roles.sync_permissions(role.id, &permission_ids).await?;

        info!(role_uuid = %uuid, count = permission_ids.len(), "Role permissions synced");
        roles.get_permissions(uuid).await
    }
}

fn validated_title(title: &str) -> Result<&str> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AccessError::invalid_body("title", "must not be empty"));
    }
    Ok(title)
}

/// Parse every entry or fail on the first malformed one. Duplicates collapse.
pub(crate) fn parse_uuids<S: AsRef<str>>(field: &str, raw: &[S]) -> Result<Vec<Uuid>> {
    let mut parsed = Vec::with_capacity(raw.len());
    for value in raw {
        let value = value.as_ref();
        let uuid = Uuid::parse_str(value).map_err(|_| {
            AccessError::invalid_body(field, format!("'{}' is not a valid uuid", value))
        })?;
        if !parsed.contains(&uuid) {
            parsed.push(uuid);
        }
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::permission::entity::{Permission, PermissionKey};
    use crate::role::cache::MemoryRoleCache;
    use crate::role::cache_populator::PopulatorConfig;
    use async_trait::async_trait;

    fn service_with(cache: Arc<MemoryRoleCache>) -> RoleService {
        RoleService::new(cache, None)
    }

    struct BrokenCache;

    #[async_trait]
    impl RoleCache for BrokenCache {
        async fn get(&self, _role_uuid: &str) -> Result<Option<RoleKey>> {
            Err(AccessError::server("role_cache.get", "connection refused"))
        }

        async fn set_bulk(&self, _entries: HashMap<String, RoleKey>) -> Result<()> {
            Err(AccessError::server("role_cache.set_bulk", "connection refused"))
        }
    }

    #[tokio::test]
    async fn test_create_derives_key_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let service = service_with(Arc::new(MemoryRoleCache::new()));

        let mut uow = store.unit_of_work();
        uow.begin().await.unwrap();
        let role = service.create(&uow, RoleInput::new("Admin")).await.unwrap();
        assert_eq!(role.key, RoleKey::Admin);
        assert!(role.id > 0);

        let err = service.create(&uow, RoleInput::new("admin")).await.unwrap_err();
        assert_eq!(err, AccessError::role_existed("ADMIN"));
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_and_empty_titles() {
        let store = MemoryStore::new();
        let service = service_with(Arc::new(MemoryRoleCache::new()));
        let mut uow = store.unit_of_work();
        uow.begin().await.unwrap();

        for title in ["Warehouse Lead", "   "] {
            let err = service.create(&uow, RoleInput::new(title)).await.unwrap_err();
            assert!(matches!(err, AccessError::InvalidRequestBody { ref field, .. } if field == "title"));
        }
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_surfaces_existence_check_failure() {
        let store = MemoryStore::new();
        store.fail_operation("role.exist_key");
        let service = service_with(Arc::new(MemoryRoleCache::new()));

        let mut uow = store.unit_of_work();
        uow.begin().await.unwrap();
        let err = service.create(&uow, RoleInput::new("Sales")).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.message_key(), "server_error");
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_keeps_cached_key_across_rename() {
        let store = MemoryStore::new();
        let cache = Arc::new(MemoryRoleCache::new());
        let service = service_with(cache.clone());

        let mut uow = store.unit_of_work();
        uow.begin().await.unwrap();
        let role = service.create(&uow, RoleInput::new("Staff")).await.unwrap();
        cache.insert(role.uuid.to_string(), RoleKey::Staff);

        // "Sales" would derive SALES; the cached key wins
        let updated = service
            .update(&uow, role.uuid, RoleInput::new("Sales").with_description("renamed"))
            .await
            .unwrap();
        assert_eq!(updated.key, RoleKey::Staff);
        assert_eq!(updated.title, "Sales");
        assert_eq!(updated.description, "renamed");
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_derives_key_on_cache_miss() {
        let store = MemoryStore::new();
        let service = service_with(Arc::new(MemoryRoleCache::new()));

        let mut uow = store.unit_of_work();
        uow.begin().await.unwrap();
        let role = service.create(&uow, RoleInput::new("Staff")).await.unwrap();

        // Unchanged key does not collide with itself
        let same = service.update(&uow, role.uuid, RoleInput::new("staff")).await.unwrap();
        assert_eq!(same.key, RoleKey::Staff);

        service.create(&uow, RoleInput::new("Sales")).await.unwrap();
        let err = service
            .update(&uow, role.uuid, RoleInput::new("Sales"))
            .await
            .unwrap_err();
        assert_eq!(err, AccessError::role_existed("SALES"));

        let missing = service
            .update(&uow, Uuid::new_v4(), RoleInput::new("Manager"))
            .await
            .unwrap_err();
        assert_eq!(missing.message_key(), "no_rows_effected");
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_propagates_cache_read_failure() {
        let store = MemoryStore::new();
        let service = RoleService::new(Arc::new(BrokenCache), None);

        let mut uow = store.unit_of_work();
        uow.begin().await.unwrap();
        let role = service.create(&uow, RoleInput::new("Staff")).await.unwrap();

        let err = service
            .update(&uow, role.uuid, RoleInput::new("Staff"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AccessError::ServerError {
                operation: "role_cache.get".to_string()
            }
        );
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_succeeds_when_cache_writes_fail() {
        let store = MemoryStore::new();
        let populator = Arc::new(RoleCachePopulator::start(
            Arc::new(BrokenCache),
            PopulatorConfig::default(),
        ));
        let service = RoleService::new(Arc::new(BrokenCache), Some(populator.clone()));

        let mut uow = store.unit_of_work();
        uow.begin().await.unwrap();
        service
            .create(&uow, RoleInput::new("User").with_default(true))
            .await
            .unwrap();

        let roles = service.list(&uow).await.unwrap();
        assert_eq!(roles.len(), 1);
        uow.commit().await.unwrap();
        populator.shutdown().await;
    }

    #[tokio::test]
    async fn test_list_caches_only_default_roles() {
        let store = MemoryStore::new();
        let cache = Arc::new(MemoryRoleCache::new());
        let populator = Arc::new(RoleCachePopulator::start(cache.clone(), PopulatorConfig::default()));
        let service = RoleService::new(cache.clone(), Some(populator.clone()));

        let mut uow = store.unit_of_work();
        uow.begin().await.unwrap();
        let user = service
            .create(&uow, RoleInput::new("User").with_default(true))
            .await
            .unwrap();
        let admin = service.create(&uow, RoleInput::new("Admin")).await.unwrap();

        service.list(&uow).await.unwrap();
        uow.commit().await.unwrap();
        populator.shutdown().await;

        assert_eq!(cache.get(&user.uuid.to_string()).await.unwrap(), Some(RoleKey::User));
        assert_eq!(cache.get(&admin.uuid.to_string()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sync_permissions_rejects_malformed_uuid() {
        let store = MemoryStore::new();
        let service = service_with(Arc::new(MemoryRoleCache::new()));

        let mut uow = store.unit_of_work();
        uow.begin().await.unwrap();
        let role = service.create(&uow, RoleInput::new("Staff")).await.unwrap();

        let err = service
            .sync_permissions(&uow, role.uuid, &["not-a-uuid"])
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::InvalidRequestBody { ref field, .. } if field == "permission_uuids"));
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_permissions_unknown_role() {
        let store = MemoryStore::new();
        let permission = store.put_permission(Permission::new("Read user", PermissionKey::ReadUser));
        let service = service_with(Arc::new(MemoryRoleCache::new()));

        let mut uow = store.unit_of_work();
        uow.begin().await.unwrap();
        let err = service
            .sync_permissions(&uow, Uuid::new_v4(), &[permission.uuid.to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.message_key(), "record_not_found");
        uow.rollback().await.unwrap();
    }

    #[test]
    fn test_parse_uuids_dedups() {
        let uuid = Uuid::new_v4();
        let raw = [uuid.to_string(), uuid.to_string()];
        assert_eq!(parse_uuids("ids", &raw).unwrap(), vec![uuid]);

        let empty: [&str; 0] = [];
        assert!(parse_uuids("ids", &empty).unwrap().is_empty());
    }

    #[test]
    fn test_parse_uuids_rejects_padding() {
        let padded = [format!(" {} ", Uuid::new_v4())];
        let err = parse_uuids("permission_uuids", &padded).unwrap_err();
        assert!(matches!(err, AccessError::InvalidRequestBody { ref field, .. } if field == "permission_uuids"));
    }

    #[tokio::test]
    async fn test_get_unknown_role_is_not_found() {
        let store = MemoryStore::new();
        let deleted = store.put_role(Role::new("Sales", RoleKey::Sales));
        let service = service_with(Arc::new(MemoryRoleCache::new()));

        let mut uow = store.unit_of_work();
        uow.begin().await.unwrap();
        service.delete(&uow, deleted.uuid, 1).await.unwrap();

        let missing = Uuid::new_v4();
        let err = service.get(&uow, missing).await.unwrap_err();
        assert_eq!(err, AccessError::not_found("role", missing));

        let err = service.get(&uow, deleted.uuid).await.unwrap_err();
        assert_eq!(err.message_key(), "record_not_found");
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_permissions_skips_soft_deleted_permissions() {
        let store = MemoryStore::new();
        let read_user = store.put_permission(Permission::new("Read user", PermissionKey::ReadUser));
        let mut retired = Permission::new("Ban user", PermissionKey::BanUser);
        retired.deleted_at = Some(chrono::Utc::now());
        let retired = store.put_permission(retired);
        let staff = store.put_role(Role::new("Staff", RoleKey::Staff));
        let service = service_with(Arc::new(MemoryRoleCache::new()));

        let mut uow = store.unit_of_work();
        uow.begin().await.unwrap();
        uow.roles()
            .unwrap()
            .sync_permissions(staff.id, &[read_user.id, retired.id])
            .await
            .unwrap();

        let fetched = service.get(&uow, staff.uuid).await.unwrap();
        assert_eq!(fetched.key, RoleKey::Staff);

        let with_permissions = service.get_permissions(&uow, staff.uuid).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(with_permissions.role.uuid, staff.uuid);
        let keys: Vec<_> = with_permissions.permissions.iter().map(|p| p.key).collect();
        assert_eq!(keys, vec![PermissionKey::ReadUser]);
    }
}
