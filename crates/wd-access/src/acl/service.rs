//! ACL Service
//!
//! The access decision engine. A check resolves the caller through the
//! user directory, gates on account status, then evaluates two ordered
//! rules:
//!
//! 1. `SUPER_ADMIN` among the user's role keys grants unconditionally.
//! 2. Otherwise the required keys are tried in order and the first one
//!    that is `NONE` or present in the user's effective permissions grants.
//!
//! No match is a `Denied` decision, not an error.

use std::sync::Arc;

use tracing::{debug, info};

use crate::acl::entity::{AccessDecision, GrantReason};
use crate::permission::entity::PermissionKey;
use crate::role::entity::{Role, RoleKey};
use crate::role::service::parse_uuids;
use crate::shared::error::Result;
use crate::shared::metrics;
use crate::usecase::unit_of_work::UnitOfWork;
use crate::user::directory::UserDirectory;
use crate::user::entity::User;

pub struct AclService {
    users: Arc<dyn UserDirectory>,
}

impl AclService {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self { users }
    }

    /// Decide whether the user may act with any of `required`.
    ///
    /// Lookup and status errors propagate unchanged.
    pub async fn check_access(
        &self,
        uow: &dyn UnitOfWork,
        user_uuid: &str,
        required: &[PermissionKey],
    ) -> Result<AccessDecision> {
        let user = self.active_user(user_uuid).await?;

        let role_keys = uow.roles()?.get_role_keys(user.id).await?;
        let decision = if role_keys.contains(&RoleKey::SuperAdmin) {
            AccessDecision::Granted {
                user_id: user.id,
                reason: GrantReason::SuperAdmin,
            }
        } else {
            let effective = uow.permissions()?.get_user_permission_keys(user.id).await?;
            if required.contains(&PermissionKey::None) {
                AccessDecision::Granted {
                    user_id: user.id,
                    reason: GrantReason::NoneSentinel,
                }
            } else if required.iter().any(|key| effective.contains(key)) {
                AccessDecision::Granted {
                    user_id: user.id,
                    reason: GrantReason::Permission,
                }
            } else {
                AccessDecision::Denied
            }
        };

        metrics::record_access_decision(decision.outcome());
        debug!(
            user_id = user.id,
            outcome = decision.outcome(),
            required = ?required,
            "Access checked"
        );
        Ok(decision)
    }

    /// Replace the user's grants with the well-known default `USER` role.
    pub async fn assign_user_role_to_user(&self, uow: &dyn UnitOfWork, user_id: i64) -> Result<Role> {
        let role = uow.roles()?.get_role_user().await?;
        uow.acl()?.assign_roles_to_user(user_id, &[role.id]).await?;

        info!(user_id, role_id = role.id, "Default role assigned");
        Ok(role)
    }

    /// Replace the user's grants with the given roles. Every uuid must name
    /// a live role.
    pub async fn assign_roles<S: AsRef<str>>(
        &self,
        uow: &dyn UnitOfWork,
        user_id: i64,
        role_uuids: &[S],
    ) -> Result<Vec<Role>> {
        let parsed = parse_uuids("role_uuids", role_uuids)?;

        let roles_repo = uow.roles()?;
        let mut roles = Vec::with_capacity(parsed.len());
        for uuid in parsed {
            roles.push(roles_repo.get_by_uuid(uuid).await?);
        }

        let role_ids: Vec<i64> = roles.iter().map(|r| r.id).collect();
        uow.acl()?.assign_roles_to_user(user_id, &role_ids).await?;

        info!(user_id, count = role_ids.len(), "User roles assigned");
        Ok(roles)
    }

    /// Grant permissions directly, on top of existing grants. Unknown uuids
    /// are dropped. Returns the number of live permissions matched.
    pub async fn grant_permissions<S: AsRef<str>>(
        &self,
        uow: &dyn UnitOfWork,
        user_id: i64,
        permission_uuids: &[S],
    ) -> Result<usize> {
        let parsed = parse_uuids("permission_uuids", permission_uuids)?;

        let permission_ids = uow.permissions()?.filter_valid_permissions(&parsed).await?;
        uow.acl()?
            .grant_permissions_to_user(user_id, &permission_ids)
            .await?;

        info!(user_id, count = permission_ids.len(), "Direct permissions granted");
        Ok(permission_ids.len())
    }

    /// Deduplicated permission keys of an active user, through roles and
    /// direct grants.
    pub async fn effective_permissions(
        &self,
        uow: &dyn UnitOfWork,
        user_uuid: &str,
    ) -> Result<Vec<PermissionKey>> {
        let user = self.active_user(user_uuid).await?;
        uow.permissions()?.get_user_permission_keys(user.id).await
    }

    async fn active_user(&self, user_uuid: &str) -> Result<User> {
        let user = self.users.get_by_uuid(user_uuid).await?;
        user.status.ensure_active(&user.uuid)?;
        Ok(user)
    }
}
