//! Unit of Work
//!
//! Binds the role, permission and ACL repositories of one request to a
//! single database transaction.
//!
//! A unit of work moves through three states: idle, active and finalized.
//! `begin` opens the transaction and binds the repositories; `commit` or
//! `rollback` finalizes it. Accessors only hand out repositories while the
//! unit is active.
//!
//! # Usage in a transport handler:
//!
//! ```ignore
//! let mut uow = PgUnitOfWork::new(pool.clone());
//! uow.begin().await?;
//!
//! match role_service.create(&uow, input).await {
//!     Ok(role) => {
//!         uow.commit().await?;
//!         Ok(role)
//!     }
//!     Err(e) => {
//!         uow.rollback().await?;
//!         Err(e)
//!     }
//! }
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::acl::repository::{AclRepository, PgAclRepository};
use crate::permission::repository::{PermissionRepository, PgPermissionRepository};
use crate::role::repository::{PgRoleRepository, RoleRepository};
use crate::shared::error::{AccessError, Result};

/// Request-scoped transactional boundary.
///
/// Services only need the accessors, so they take `&dyn UnitOfWork`; the
/// caller that opened the unit keeps `&mut` ownership for the terminal call.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Open the transaction and bind the repositories to it.
    async fn begin(&mut self) -> Result<()>;

    /// Commit the transaction. The unit cannot be used afterwards.
    async fn commit(&mut self) -> Result<()>;

    /// Roll the transaction back. The unit cannot be used afterwards.
    async fn rollback(&mut self) -> Result<()>;

    fn roles(&self) -> Result<&dyn RoleRepository>;

    fn permissions(&self) -> Result<&dyn PermissionRepository>;

    fn acl(&self) -> Result<&dyn AclRepository>;
}

/// Transaction slot shared by every repository of one unit of work.
///
/// The slot is emptied when the unit is finalized, so a repository that
/// outlives its unit fails instead of touching another transaction.
pub type TxHandle = Arc<Mutex<Option<Transaction<'static, Postgres>>>>;

/// Locked transaction slot, known to hold an open transaction.
///
/// Derefs to the transaction's connection so repositories execute on
/// `&mut *tx`.
pub(crate) struct TxGuard<'a>(MutexGuard<'a, Option<Transaction<'static, Postgres>>>);

impl Deref for TxGuard<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        match self.0.as_ref() {
            Some(tx) => tx,
            None => unreachable!("lock_tx only hands out occupied slots"),
        }
    }
}

impl DerefMut for TxGuard<'_> {
    fn deref_mut(&mut self) -> &mut PgConnection {
        match self.0.as_mut() {
            Some(tx) => tx,
            None => unreachable!("lock_tx only hands out occupied slots"),
        }
    }
}

/// Lock the shared transaction for one statement.
pub(crate) async fn lock_tx<'a>(tx: &'a TxHandle, operation: &str) -> Result<TxGuard<'a>> {
    let slot = tx.lock().await;
    if slot.is_none() {
        return Err(AccessError::server(operation, "transaction already finalized"));
    }
    Ok(TxGuard(slot))
}

/// Error returned by accessors and terminal calls outside the active state.
pub(crate) fn not_active(operation: &str) -> AccessError {
    AccessError::server(operation, "unit of work is not active")
}

struct BoundRepositories {
    tx: TxHandle,
    roles: PgRoleRepository,
    permissions: PgPermissionRepository,
    acl: PgAclRepository,
}

enum State {
    Idle,
    Active(BoundRepositories),
    Finalized,
}

/// PostgreSQL implementation of UnitOfWork.
///
/// Dropping an active unit rolls its transaction back.
pub struct PgUnitOfWork {
    pool: PgPool,
    state: State,
}

impl PgUnitOfWork {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            state: State::Idle,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Active(_))
    }

    fn bound(&self, operation: &str) -> Result<&BoundRepositories> {
        match &self.state {
            State::Active(bound) => Ok(bound),
            _ => Err(not_active(operation)),
        }
    }

    /// Move to `Finalized` and hand back the open transaction.
    async fn finalize(&mut self, operation: &str) -> Result<Transaction<'static, Postgres>> {
        match std::mem::replace(&mut self.state, State::Finalized) {
            State::Active(bound) => bound
                .tx
                .lock()
                .await
                .take()
                .ok_or_else(|| not_active(operation)),
            previous => {
                self.state = previous;
                Err(not_active(operation))
            }
        }
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn begin(&mut self) -> Result<()> {
        if !matches!(self.state, State::Idle) {
            return Err(AccessError::server(
                "unit_of_work.begin",
                "unit of work already started",
            ));
        }

        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AccessError::server("unit_of_work.begin", e))?;

        let handle: TxHandle = Arc::new(Mutex::new(Some(tx)));
        self.state = State::Active(BoundRepositories {
            roles: PgRoleRepository::new(handle.clone()),
            permissions: PgPermissionRepository::new(handle.clone()),
            acl: PgAclRepository::new(handle.clone()),
            tx: handle,
        });

        debug!("Unit of work started");
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self.finalize("unit_of_work.commit").await?;
        tx.commit()
            .await
            .map_err(|e| AccessError::server("unit_of_work.commit", e))?;

        debug!("Unit of work committed");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let tx = self.finalize("unit_of_work.rollback").await?;
        tx.rollback()
            .await
            .map_err(|e| AccessError::server("unit_of_work.rollback", e))?;

        debug!("Unit of work rolled back");
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
