//! In-Memory Backend
//!
//! A unit of work and repositories over process memory, with the same
//! replace-all, soft-delete and zero-rows semantics as the PostgreSQL
//! repositories. Used by tests and by local runs without a database.
//!
//! `begin` snapshots the store and repositories work on the snapshot.
//! `commit` applies the rows the unit changed onto the committed state and
//! `rollback` discards them. Units touching the same row resolve as last
//! writer wins; a commit that would leave two live roles with one key fails
//! with `RoleExisted`, as the unique index does in PostgreSQL.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::acl::entity::AccessControl;
use crate::acl::repository::AclRepository;
use crate::permission::entity::{Permission, PermissionKey, RolePermission};
use crate::permission::repository::PermissionRepository;
use crate::role::entity::{Role, RoleKey, RoleWithPermissions};
use crate::role::repository::RoleRepository;
use crate::shared::error::{AccessError, Result};
use crate::usecase::unit_of_work::{not_active, UnitOfWork};
use crate::user::directory::{parse_user_uuid, UserDirectory};
use crate::user::entity::User;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    // Shared by every snapshot of one store
    ids: Arc<AtomicI64>,
    roles: Vec<Role>,
    permissions: Vec<Permission>,
    role_permissions: Vec<RolePermission>,
    access_controls: Vec<AccessControl>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.ids.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn reserve_id(&self, id: i64) {
        self.ids.fetch_max(id, Ordering::SeqCst);
    }

    /// Apply the rows `work` changed relative to `base`.
    fn merge(&mut self, base: &MemoryState, work: &MemoryState) {
        merge_rows(&mut self.roles, &base.roles, &work.roles, |r| r.id);
        merge_rows(&mut self.permissions, &base.permissions, &work.permissions, |p| p.id);
        merge_rows(
            &mut self.role_permissions,
            &base.role_permissions,
            &work.role_permissions,
            |rp| (rp.role_id, rp.permission_id),
        );
        merge_rows(
            &mut self.access_controls,
            &base.access_controls,
            &work.access_controls,
            |ac| ac.id,
        );
    }

    fn duplicate_live_role_key(&self) -> Option<RoleKey> {
        let mut seen = HashSet::new();
        self.roles
            .iter()
            .filter(|r| !r.is_deleted())
            .find(|r| !seen.insert(r.key))
            .map(|r| r.key)
    }

    fn live_role(&self, uuid: Uuid) -> Option<&Role> {
        self.roles.iter().find(|r| r.uuid == uuid && !r.is_deleted())
    }

    fn live_role_by_id(&self, id: i64) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == id && !r.is_deleted())
    }

    fn live_permission_by_id(&self, id: i64) -> Option<&Permission> {
        self.permissions
            .iter()
            .find(|p| p.id == id && p.deleted_at.is_none())
    }

    fn role_permission_keys(&self, role_id: i64) -> impl Iterator<Item = PermissionKey> + '_ {
        self.role_permissions
            .iter()
            .filter(move |rp| rp.role_id == role_id)
            .filter_map(move |rp| self.live_permission_by_id(rp.permission_id))
            .map(|p| p.key)
    }
}

/// Remove rows `work` dropped and upsert rows it added or changed.
fn merge_rows<T, K>(committed: &mut Vec<T>, base: &[T], work: &[T], key: impl Fn(&T) -> K)
where
    T: Clone + PartialEq,
    K: PartialEq,
{
    for removed in base.iter().filter(|b| !work.iter().any(|w| key(w) == key(b))) {
        committed.retain(|c| key(c) != key(removed));
    }

    for row in work.iter().filter(|w| !base.contains(w)) {
        match committed.iter_mut().find(|c| key(c) == key(row)) {
            Some(existing) => *existing = row.clone(),
            None => committed.push(row.clone()),
        }
    }
}

#[derive(Default)]
struct StoreInner {
    state: RwLock<MemoryState>,
    failures: Mutex<HashSet<String>>,
}

/// Shared in-memory store. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit_of_work(&self) -> MemoryUnitOfWork {
        MemoryUnitOfWork {
            store: self.clone(),
            state: State::Idle,
        }
    }

    /// Make every later call of `operation` fail with `ServerError`.
    pub fn fail_operation(&self, operation: &str) {
        self.inner.failures.lock().insert(operation.to_string());
    }

    pub fn clear_failures(&self) {
        self.inner.failures.lock().clear();
    }

    /// Insert a role directly, keeping its id when non-zero.
    pub fn put_role(&self, mut role: Role) -> Role {
        let mut state = self.inner.state.write();
        if role.id == 0 {
            role.id = state.next_id();
        } else {
            state.reserve_id(role.id);
        }
        state.roles.push(role.clone());
        role
    }

    /// Insert a permission directly, keeping its id when non-zero.
    pub fn put_permission(&self, mut permission: Permission) -> Permission {
        let mut state = self.inner.state.write();
        if permission.id == 0 {
            permission.id = state.next_id();
        } else {
            state.reserve_id(permission.id);
        }
        state.permissions.push(permission.clone());
        permission
    }

    /// Every grant row of a user, soft-deleted ones included.
    pub fn access_controls(&self, user_id: i64) -> Vec<AccessControl> {
        self.inner
            .state
            .read()
            .access_controls
            .iter()
            .filter(|ac| ac.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Committed roles, soft-deleted ones included.
    pub fn roles(&self) -> Vec<Role> {
        self.inner.state.read().roles.clone()
    }

    pub fn role_permission_ids(&self, role_id: i64) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .inner
            .state
            .read()
            .role_permissions
            .iter()
            .filter(|rp| rp.role_id == role_id)
            .map(|rp| rp.permission_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self.inner.failures.lock().contains(operation) {
            return Err(AccessError::server(operation, "injected failure"));
        }
        Ok(())
    }
}

/// Working copy shared by the repositories of one unit.
#[derive(Clone)]
struct Session {
    store: MemoryStore,
    work: Arc<Mutex<Option<MemoryState>>>,
}

impl Session {
    fn with<T>(&self, operation: &str, f: impl FnOnce(&mut MemoryState) -> Result<T>) -> Result<T> {
        self.store.check(operation)?;
        let mut work = self.work.lock();
        let state = work
            .as_mut()
            .ok_or_else(|| AccessError::server(operation, "transaction already finalized"))?;
        f(state)
    }
}

pub struct MemoryRoleRepository {
    session: Session,
}

pub struct MemoryPermissionRepository {
    session: Session,
}

pub struct MemoryAclRepository {
    session: Session,
}

#[async_trait]
impl RoleRepository for MemoryRoleRepository {
    async fn create(&self, role: &Role) -> Result<Role> {
        self.session.with("role.create", |state| {
            if state.roles.iter().any(|r| r.key == role.key && !r.is_deleted()) {
                return Err(AccessError::role_existed(role.key.as_str()));
            }
            let mut created = role.clone();
            created.id = state.next_id();
            state.roles.push(created.clone());
            Ok(created)
        })
    }

    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Role> {
        self.session.with("role.get_by_uuid", |state| {
            state
                .live_role(uuid)
                .cloned()
                .ok_or_else(|| AccessError::not_found("role", uuid))
        })
    }

    async fn list(&self) -> Result<Vec<Role>> {
        self.session.with("role.list", |state| {
            Ok(state.roles.iter().filter(|r| !r.is_deleted()).cloned().collect())
        })
    }

    async fn update(&self, role: &Role, uuid: Uuid) -> Result<Role> {
        self.session.with("role.update", |state| {
            if state
                .roles
                .iter()
                .any(|r| r.key == role.key && r.uuid != uuid && !r.is_deleted())
            {
                return Err(AccessError::role_existed(role.key.as_str()));
            }
            let existing = state
                .roles
                .iter_mut()
                .find(|r| r.uuid == uuid && !r.is_deleted())
                .ok_or_else(|| AccessError::no_rows("role.update"))?;

            existing.title = role.title.clone();
            existing.key = role.key;
            existing.description = role.description.clone();
            existing.is_default = role.is_default;
            existing.updated_at = Utc::now();
            Ok(existing.clone())
        })
    }

    async fn delete(&self, uuid: Uuid, deleted_by: i64) -> Result<()> {
        self.session.with("role.delete", |state| {
            let role = state
                .roles
                .iter_mut()
                .find(|r| r.uuid == uuid && !r.is_default && !r.is_deleted())
                .ok_or_else(|| AccessError::not_deletable("role", uuid))?;
            role.deleted_at = Some(Utc::now());
            role.deleted_by = Some(deleted_by);
            Ok(())
        })
    }

    async fn exist_key(&self, key: RoleKey, exclude: Option<Uuid>) -> Result<bool> {
        self.session.with("role.exist_key", |state| {
            Ok(state
                .roles
                .iter()
                .any(|r| r.key == key && !r.is_deleted() && Some(r.uuid) != exclude))
        })
    }

    async fn get_role_user(&self) -> Result<Role> {
        self.find_by_key(RoleKey::User)
            .await?
            .ok_or_else(|| AccessError::not_found("role", RoleKey::User))
    }

    async fn find_by_key(&self, key: RoleKey) -> Result<Option<Role>> {
        self.session.with("role.find_by_key", |state| {
            Ok(state
                .roles
                .iter()
                .find(|r| r.key == key && !r.is_deleted())
                .cloned())
        })
    }

    async fn get_permissions(&self, uuid: Uuid) -> Result<RoleWithPermissions> {
        self.session.with("role.get_permissions", |state| {
            let role = state
                .live_role(uuid)
                .cloned()
                .ok_or_else(|| AccessError::not_found("role", uuid))?;

            let mut permissions: Vec<Permission> = state
                .role_permissions
                .iter()
                .filter(|rp| rp.role_id == role.id)
                .filter_map(|rp| state.live_permission_by_id(rp.permission_id))
                .cloned()
                .collect();
            permissions.sort_by_key(|p| p.id);

            Ok(RoleWithPermissions { role, permissions })
        })
    }

    async fn sync_permissions(&self, role_id: i64, permission_ids: &[i64]) -> Result<()> {
        self.session.with("role.sync_permissions", |state| {
            state.role_permissions.retain(|rp| rp.role_id != role_id);
            for &permission_id in permission_ids {
                let row = RolePermission {
                    role_id,
                    permission_id,
                };
                if !state.role_permissions.contains(&row) {
                    state.role_permissions.push(row);
                }
            }
            Ok(())
        })
    }

    async fn get_role_keys(&self, user_id: i64) -> Result<Vec<RoleKey>> {
        self.session.with("role.get_role_keys", |state| {
            let mut keys = Vec::new();
            for ac in state.access_controls.iter().filter(|ac| ac.user_id == user_id && ac.is_active()) {
                if let Some(role) = ac.role_id.and_then(|id| state.live_role_by_id(id)) {
                    if !keys.contains(&role.key) {
                        keys.push(role.key);
                    }
                }
            }
            Ok(keys)
        })
    }
}

#[async_trait]
impl PermissionRepository for MemoryPermissionRepository {
    async fn get_user_permission_keys(&self, user_id: i64) -> Result<Vec<PermissionKey>> {
        self.session.with("permission.get_user_permission_keys", |state| {
            let mut keys = Vec::new();
            let grants = state
                .access_controls
                .iter()
                .filter(|ac| ac.user_id == user_id && ac.is_active());

            for ac in grants {
                let via_role: Vec<PermissionKey> = match ac.role_id {
                    Some(role_id) if state.live_role_by_id(role_id).is_some() => {
                        state.role_permission_keys(role_id).collect()
                    }
                    _ => Vec::new(),
                };
                let direct = ac
                    .permission_id
                    .and_then(|id| state.live_permission_by_id(id))
                    .map(|p| p.key);

                for key in via_role.into_iter().chain(direct) {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
            }
            Ok(keys)
        })
    }

    async fn list(&self) -> Result<Vec<Permission>> {
        self.session.with("permission.list", |state| {
            Ok(state
                .permissions
                .iter()
                .filter(|p| p.deleted_at.is_none())
                .cloned()
                .collect())
        })
    }

    async fn filter_valid_permissions(&self, uuids: &[Uuid]) -> Result<Vec<i64>> {
        self.session.with("permission.filter_valid_permissions", |state| {
            let mut ids: Vec<i64> = state
                .permissions
                .iter()
                .filter(|p| p.deleted_at.is_none() && uuids.contains(&p.uuid))
                .map(|p| p.id)
                .collect();
            ids.sort_unstable();
            Ok(ids)
        })
    }

    async fn create(&self, permission: &Permission) -> Result<Permission> {
        self.session.with("permission.create", |state| {
            if state
                .permissions
                .iter()
                .any(|p| p.key == permission.key && p.deleted_at.is_none())
            {
                return Err(AccessError::server(
                    "permission.create",
                    format!("duplicate permission key {}", permission.key),
                ));
            }
            let mut created = permission.clone();
            created.id = state.next_id();
            state.permissions.push(created.clone());
            Ok(created)
        })
    }
}

#[async_trait]
impl AclRepository for MemoryAclRepository {
    async fn assign_roles_to_user(&self, user_id: i64, role_ids: &[i64]) -> Result<()> {
        self.session.with("acl.assign_roles_to_user", |state| {
            let now = Utc::now();
            for ac in state
                .access_controls
                .iter_mut()
                .filter(|ac| ac.user_id == user_id && ac.is_active())
            {
                ac.deleted_at = Some(now);
            }

            let mut seen = HashSet::new();
            for &role_id in role_ids.iter().filter(|id| seen.insert(**id)) {
                let mut row = AccessControl::for_role(user_id, role_id);
                row.id = state.next_id();
                state.access_controls.push(row);
            }
            Ok(())
        })
    }

    async fn grant_permissions_to_user(&self, user_id: i64, permission_ids: &[i64]) -> Result<()> {
        self.session.with("acl.grant_permissions_to_user", |state| {
            for &permission_id in permission_ids {
                let held = state.access_controls.iter().any(|ac| {
                    ac.user_id == user_id && ac.permission_id == Some(permission_id) && ac.is_active()
                });
                if !held {
                    let mut row = AccessControl::for_permission(user_id, permission_id);
                    row.id = state.next_id();
                    state.access_controls.push(row);
                }
            }
            Ok(())
        })
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<AccessControl>> {
        self.session.with("acl.list_by_user", |state| {
            Ok(state
                .access_controls
                .iter()
                .filter(|ac| ac.user_id == user_id && ac.is_active())
                .cloned()
                .collect())
        })
    }
}

struct BoundRepositories {
    base: MemoryState,
    session: Session,
    roles: MemoryRoleRepository,
    permissions: MemoryPermissionRepository,
    acl: MemoryAclRepository,
}

enum State {
    Idle,
    Active(BoundRepositories),
    Finalized,
}

/// In-memory implementation of UnitOfWork.
pub struct MemoryUnitOfWork {
    store: MemoryStore,
    state: State,
}

impl MemoryUnitOfWork {
    fn bound(&self, operation: &str) -> Result<&BoundRepositories> {
        match &self.state {
            State::Active(bound) => Ok(bound),
            _ => Err(not_active(operation)),
        }
    }

    /// Move to `Finalized` and hand back the snapshot taken at `begin` with
    /// the working copy.
    fn finalize(&mut self, operation: &str) -> Result<(MemoryState, MemoryState)> {
        self.store.check(operation)?;
        match std::mem::replace(&mut self.state, State::Finalized) {
            State::Active(bound) => {
                let work = bound.session.work.lock().take();
                work.map(|work| (bound.base, work))
                    .ok_or_else(|| not_active(operation))
            }
            previous => {
                self.state = previous;
                Err(not_active(operation))
            }
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn begin(&mut self) -> Result<()> {
        self.store.check("unit_of_work.begin")?;
        if !matches!(self.state, State::Idle) {
            return Err(AccessError::server(
                "unit_of_work.begin",
                "unit of work already started",
            ));
        }

        let snapshot = self.store.inner.state.read().clone();
        let session = Session {
            store: self.store.clone(),
            work: Arc::new(Mutex::new(Some(snapshot.clone()))),
        };
        self.state = State::Active(BoundRepositories {
            base: snapshot,
            roles: MemoryRoleRepository {
                session: session.clone(),
            },
            permissions: MemoryPermissionRepository {
                session: session.clone(),
            },
            acl: MemoryAclRepository {
                session: session.clone(),
            },
            session,
        });
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let (base, work) = self.finalize("unit_of_work.commit")?;

        let mut committed = self.store.inner.state.write();
        let mut merged = committed.clone();
        merged.merge(&base, &work);
        if let Some(key) = merged.duplicate_live_role_key() {
            return Err(AccessError::role_existed(key.as_str()));
        }
        *committed = merged;

        debug!("Memory unit of work committed");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.finalize("unit_of_work.rollback")?;
        debug!("Memory unit of work rolled back");
        Ok(())
    }

    fn roles(&self) -> Result<&dyn RoleRepository> {
        Ok(&self.bound("unit_of_work.roles")?.roles)
    }

    fn permissions(&self) -> Result<&dyn PermissionRepository> {
        Ok(&self.bound("unit_of_work.permissions")?.permissions)
    }

    fn acl(&self) -> Result<&dyn AclRepository> {
        Ok(&self.bound("unit_of_work.acl")?.acl)
    }
}

/// In-memory user directory keyed by uuid.
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: DashMap<Uuid, User>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users.insert(user.uuid, user);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get_by_uuid(&self, uuid: &str) -> Result<User> {
        let uuid = parse_user_uuid(uuid)?;
        self.users
            .get(&uuid)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AccessError::not_found("user", uuid))
    }
}
