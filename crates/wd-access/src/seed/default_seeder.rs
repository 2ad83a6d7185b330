//! Default Role Seeder
//!
//! Creates the permission catalogue and the code-defined roles. Rows that
//! already exist are left alone, so seeding is safe on every startup.
//! Runs inside the caller's unit of work.

use std::collections::HashMap;

use tracing::info;

use crate::permission::entity::{Permission, PermissionKey};
use crate::role::entity::{Role, RoleKey};
use crate::shared::error::Result;
use crate::usecase::unit_of_work::UnitOfWork;

/// Code-defined role with the permissions attached when it is first created.
#[derive(Debug, Clone, Copy)]
pub struct RoleDefinition {
    pub key: RoleKey,
    pub title: &'static str,
    pub description: &'static str,
    pub is_default: bool,
    pub permissions: &'static [PermissionKey],
}

/// Bypasses every check; permissions listed for display only
pub const SUPER_ADMIN: RoleDefinition = RoleDefinition {
    key: RoleKey::SuperAdmin,
    title: "Super Admin",
    description: "Unrestricted access to every operation",
    is_default: false,
    permissions: &[
        PermissionKey::ReadUser,
        PermissionKey::CreateUser,
        PermissionKey::UpdateUser,
        PermissionKey::DeleteUser,
        PermissionKey::BanUser,
        PermissionKey::ReadRole,
        PermissionKey::CreateRole,
        PermissionKey::UpdateRole,
        PermissionKey::DeleteRole,
        PermissionKey::AssignRole,
        PermissionKey::ReadPermission,
        PermissionKey::AssignPermission,
    ],
};

pub const ADMIN: RoleDefinition = RoleDefinition {
    key: RoleKey::Admin,
    title: "Admin",
    description: "User and role administration",
    is_default: false,
    permissions: &[
        PermissionKey::ReadUser,
        PermissionKey::CreateUser,
        PermissionKey::UpdateUser,
        PermissionKey::BanUser,
        PermissionKey::ReadRole,
        PermissionKey::CreateRole,
        PermissionKey::UpdateRole,
        PermissionKey::AssignRole,
        PermissionKey::ReadPermission,
        PermissionKey::AssignPermission,
    ],
};

pub const MANAGER: RoleDefinition = RoleDefinition {
    key: RoleKey::Manager,
    title: "Manager",
    description: "Manages users within the organisation",
    is_default: false,
    permissions: &[
        PermissionKey::ReadUser,
        PermissionKey::UpdateUser,
        PermissionKey::ReadRole,
        PermissionKey::ReadPermission,
    ],
};

pub const ACCOUNTANT: RoleDefinition = RoleDefinition {
    key: RoleKey::Accountant,
    title: "Accountant",
    description: "Finance staff",
    is_default: false,
    permissions: &[PermissionKey::ReadUser],
};

pub const SUPPLIER: RoleDefinition = RoleDefinition {
    key: RoleKey::Supplier,
    title: "Supplier",
    description: "External supplier account",
    is_default: false,
    permissions: &[],
};

pub const SALES: RoleDefinition = RoleDefinition {
    key: RoleKey::Sales,
    title: "Sales",
    description: "Sales staff",
    is_default: false,
    permissions: &[PermissionKey::ReadUser],
};

pub const STAFF: RoleDefinition = RoleDefinition {
    key: RoleKey::Staff,
    title: "Staff",
    description: "Internal staff",
    is_default: false,
    permissions: &[PermissionKey::ReadUser, PermissionKey::ReadRole],
};

/// Assigned to every new account
pub const USER: RoleDefinition = RoleDefinition {
    key: RoleKey::User,
    title: "User",
    description: "Default role for registered users",
    is_default: true,
    permissions: &[],
};

pub const CODE_DEFINED_ROLES: &[&RoleDefinition] = &[
    &SUPER_ADMIN,
    &ADMIN,
    &MANAGER,
    &ACCOUNTANT,
    &SUPPLIER,
    &SALES,
    &STAFF,
    &USER,
];

/// What a seed run created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub roles_created: usize,
}

/// "READ_USER" -> "Read user"
fn permission_title(key: PermissionKey) -> String {
    let words = key.as_str().to_lowercase().replace('_', " ");
    let mut chars = words.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

pub struct DefaultRoleSeeder {
    definitions: &'static [&'static RoleDefinition],
}

impl Default for DefaultRoleSeeder {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultRoleSeeder {
    pub fn new() -> Self {
        Self {
            definitions: CODE_DEFINED_ROLES,
        }
    }

    pub async fn seed(&self, uow: &dyn UnitOfWork) -> Result<SeedReport> {
        let mut report = SeedReport::default();
        let permission_ids = self.seed_permissions(uow, &mut report).await?;
        self.seed_roles(uow, &permission_ids, &mut report).await?;

        info!(
            permissions_created = report.permissions_created,
            roles_created = report.roles_created,
            "Default roles seeded"
        );
        Ok(report)
    }

    async fn seed_permissions(
        &self,
        uow: &dyn UnitOfWork,
        report: &mut SeedReport,
    ) -> Result<HashMap<PermissionKey, i64>> {
        let permissions = uow.permissions()?;
        let mut ids: HashMap<PermissionKey, i64> =
            permissions.list().await?.into_iter().map(|p| (p.key, p.id)).collect();

        for key in PermissionKey::ALL.into_iter().filter(|k| !k.is_sentinel()) {
            if ids.contains_key(&key) {
                continue;
            }
            let created = permissions
                .create(&Permission::new(permission_title(key), key))
                .await?;
            info!(key = %key, "Created permission");
            ids.insert(key, created.id);
            report.permissions_created += 1;
        }

        Ok(ids)
    }

    async fn seed_roles(
        &self,
        uow: &dyn UnitOfWork,
        permission_ids: &HashMap<PermissionKey, i64>,
        report: &mut SeedReport,
    ) -> Result<()> {
        let roles = uow.roles()?;

        for definition in self.definitions {
            if roles.find_by_key(definition.key).await?.is_some() {
                continue;
            }

            let role = Role::new(definition.title, definition.key)
                .with_description(definition.description)
                .with_default(definition.is_default);
            let created = roles.create(&role).await?;

            let ids: Vec<i64> = definition
                .permissions
                .iter()
                .filter_map(|key| permission_ids.get(key).copied())
                .collect();
            roles.sync_permissions(created.id, &ids).await?;

            info!(key = %definition.key, permissions = ids.len(), "Created role");
            report.roles_created += 1;
        }

        Ok(())
    }
}
