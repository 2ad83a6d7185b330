//! User lookup collaborator

pub mod directory;
pub mod entity;

pub use directory::{PgUserDirectory, UserDirectory};
pub use entity::{User, UserStatus};
