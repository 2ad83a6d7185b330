//! Permission Service

use crate::permission::entity::Permission;
use crate::shared::error::Result;
use crate::usecase::unit_of_work::UnitOfWork;

/// Read access to the permission catalogue.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissionService;

impl PermissionService {
    pub fn new() -> Self {
        Self
    }

    pub async fn list(&self, uow: &dyn UnitOfWork) -> Result<Vec<Permission>> {
        uow.permissions()?.list().await
    }
}
