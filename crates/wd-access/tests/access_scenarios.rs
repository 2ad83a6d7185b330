//! Access Control Scenarios
//!
//! End-to-end behaviour of the role and ACL services over the in-memory
//! unit of work:
//! - Key derivation and duplicate detection
//! - Super-admin bypass and the NONE sentinel
//! - Denial as a decision rather than an error
//! - Replace-all permission sync and role assignment
//! - Default-role delete protection

use std::sync::Arc;

use uuid::Uuid;
use wd_access::memory::{MemoryStore, MemoryUserDirectory};
use wd_access::{
    AccessDecision, AccessError, AclService, GrantReason, MemoryRoleCache, Permission,
    PermissionKey, Role, RoleInput, RoleKey, RoleService, UnitOfWork, User, UserStatus,
};

struct Harness {
    store: MemoryStore,
    users: Arc<MemoryUserDirectory>,
    roles: RoleService,
    acl: AclService,
}

impl Harness {
    fn new() -> Self {
        let users = Arc::new(MemoryUserDirectory::new());
        Self {
            store: MemoryStore::new(),
            roles: RoleService::new(Arc::new(MemoryRoleCache::new()), None),
            acl: AclService::new(users.clone()),
            users,
        }
    }

    fn active_user(&self, id: i64) -> User {
        let user = User::new(id, UserStatus::Active);
        self.users.insert(user.clone());
        user
    }

    fn permission(&self, key: PermissionKey) -> Permission {
        self.store.put_permission(Permission::new(key.as_str(), key))
    }

    /// Give `user` a fresh role holding `permissions`.
    async fn with_role(&self, user: &User, key: RoleKey, permissions: &[PermissionKey]) {
        let role = self.store.put_role(Role::new(key.as_str(), key));
        let uuids: Vec<String> = permissions
            .iter()
            .map(|k| self.permission(*k).uuid.to_string())
            .collect();

        let mut uow = self.store.unit_of_work();
        uow.begin().await.unwrap();
        self.roles.sync_permissions(&uow, role.uuid, &uuids).await.unwrap();
        self.acl
            .assign_roles(&uow, user.id, &[role.uuid.to_string()])
            .await
            .unwrap();
        uow.commit().await.unwrap();
    }

    async fn check(&self, user: &User, required: &[PermissionKey]) -> AccessDecision {
        let mut uow = self.store.unit_of_work();
        uow.begin().await.unwrap();
        let decision = self
            .acl
            .check_access(&uow, &user.uuid.to_string(), required)
            .await
            .unwrap();
        uow.commit().await.unwrap();
        decision
    }
}

#[tokio::test]
async fn super_admin_bypasses_every_permission() {
    let h = Harness::new();
    let admin = h.active_user(1);
    h.with_role(&admin, RoleKey::SuperAdmin, &[]).await;

    for key in PermissionKey::ALL {
        let decision = h.check(&admin, &[key]).await;
        assert_eq!(
            decision,
            AccessDecision::Granted {
                user_id: 1,
                reason: GrantReason::SuperAdmin
            }
        );
    }
}

#[tokio::test]
async fn none_sentinel_grants_without_permissions() {
    let h = Harness::new();
    let user = h.active_user(2);

    let decision = h.check(&user, &[PermissionKey::None]).await;
    assert!(decision.is_allowed());
    assert_eq!(decision.user_id(), Some(2));

    // Later entries cannot turn a sentinel grant into a denial
    let decision = h.check(&user, &[PermissionKey::DeleteRole, PermissionKey::None]).await;
    assert!(decision.is_allowed());
}

#[tokio::test]
async fn disjoint_permissions_are_denied() {
    let h = Harness::new();
    let user = h.active_user(3);
    h.with_role(&user, RoleKey::Staff, &[PermissionKey::ReadUser]).await;

    let decision = h
        .check(&user, &[PermissionKey::CreateRole, PermissionKey::DeleteRole])
        .await;
    assert_eq!(decision, AccessDecision::Denied);
    assert_eq!(decision.user_id(), None);
}

#[tokio::test]
async fn any_required_permission_is_enough() {
    let h = Harness::new();
    let user = h.active_user(4);
    h.with_role(&user, RoleKey::Manager, &[PermissionKey::UpdateUser]).await;

    let decision = h
        .check(&user, &[PermissionKey::BanUser, PermissionKey::UpdateUser])
        .await;
    assert_eq!(
        decision,
        AccessDecision::Granted {
            user_id: 4,
            reason: GrantReason::Permission
        }
    );
}

#[tokio::test]
async fn admin_title_variants_collide() {
    let h = Harness::new();
    let mut uow = h.store.unit_of_work();
    uow.begin().await.unwrap();

    let role = h.roles.create(&uow, RoleInput::new("Admin")).await.unwrap();
    assert_eq!(role.key, RoleKey::Admin);
    assert_eq!(role.key.as_str(), "ADMIN");

    let err = h.roles.create(&uow, RoleInput::new("admin")).await.unwrap_err();
    assert_eq!(err, AccessError::RoleExisted { key: "ADMIN".into() });
    uow.commit().await.unwrap();
}

#[tokio::test]
async fn sync_permissions_is_idempotent_and_drops_unknown() {
    let h = Harness::new();
    let read_user = h.permission(PermissionKey::ReadUser);
    let staff = h.store.put_role(Role::new("Staff", RoleKey::Staff));
    let requested = [read_user.uuid.to_string(), Uuid::new_v4().to_string()];

    for _ in 0..2 {
        let mut uow = h.store.unit_of_work();
        uow.begin().await.unwrap();
        let synced = h
            .roles
            .sync_permissions(&uow, staff.uuid, &requested)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let keys: Vec<_> = synced.permissions.iter().map(|p| p.key).collect();
        assert_eq!(keys, vec![PermissionKey::ReadUser]);
        assert_eq!(h.store.role_permission_ids(staff.id), vec![read_user.id]);
    }
}

#[tokio::test]
async fn sync_permissions_replaces_previous_set() {
    let h = Harness::new();
    let read_user = h.permission(PermissionKey::ReadUser);
    let read_role = h.permission(PermissionKey::ReadRole);
    let staff = h.store.put_role(Role::new("Staff", RoleKey::Staff));

    let mut uow = h.store.unit_of_work();
    uow.begin().await.unwrap();
    h.roles
        .sync_permissions(&uow, staff.uuid, &[read_user.uuid.to_string()])
        .await
        .unwrap();
    h.roles
        .sync_permissions(&uow, staff.uuid, &[read_role.uuid.to_string()])
        .await
        .unwrap();
    uow.commit().await.unwrap();

    assert_eq!(h.store.role_permission_ids(staff.id), vec![read_role.id]);
}

#[tokio::test]
async fn default_roles_cannot_be_deleted() {
    let h = Harness::new();
    let user_role = h
        .store
        .put_role(Role::new("User", RoleKey::User).with_default(true));

    let mut uow = h.store.unit_of_work();
    uow.begin().await.unwrap();

    let err = h.roles.delete(&uow, user_role.uuid, 1).await.unwrap_err();
    assert!(matches!(err, AccessError::IsNotDeletable { .. }));

    let missing = h.roles.delete(&uow, Uuid::new_v4(), 1).await.unwrap_err();
    assert!(matches!(missing, AccessError::IsNotDeletable { .. }));
    uow.rollback().await.unwrap();
}

#[tokio::test]
async fn default_role_assignment_replaces_previous_roles() {
    let h = Harness::new();
    let mut user_role = Role::new("User", RoleKey::User).with_default(true);
    user_role.id = 7;
    h.store.put_role(user_role);
    let sales = h.store.put_role(Role::new("Sales", RoleKey::Sales));

    let mut uow = h.store.unit_of_work();
    uow.begin().await.unwrap();
    h.acl
        .assign_roles(&uow, 42, &[sales.uuid.to_string()])
        .await
        .unwrap();
    let assigned = h.acl.assign_user_role_to_user(&uow, 42).await.unwrap();
    assert_eq!(assigned.id, 7);

    let rows = uow.acl().unwrap().list_by_user(42).await.unwrap();
    uow.commit().await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_id, 42);
    assert_eq!(rows[0].role_id, Some(7));
    assert!(rows.iter().all(|row| row.role_id != Some(sales.id)));

    // The previous assignment is soft-deleted, not erased
    let history = h.store.access_controls(42);
    assert_eq!(history.len(), 2);
    assert!(history.iter().any(|row| row.role_id == Some(sales.id) && row.deleted_at.is_some()));
}

#[tokio::test]
async fn rolled_back_work_is_invisible() {
    let h = Harness::new();

    let mut uow = h.store.unit_of_work();
    uow.begin().await.unwrap();
    h.roles.create(&uow, RoleInput::new("Supplier")).await.unwrap();
    uow.rollback().await.unwrap();

    let mut uow = h.store.unit_of_work();
    uow.begin().await.unwrap();
    assert!(h.roles.list(&uow).await.unwrap().is_empty());
    uow.commit().await.unwrap();
}
