//! Transactional coordination for request-scoped work.

pub mod unit_of_work;

pub use unit_of_work::{PgUnitOfWork, TxHandle, UnitOfWork};
