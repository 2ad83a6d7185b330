//! Seed data

pub mod default_seeder;

pub use default_seeder::{DefaultRoleSeeder, RoleDefinition, SeedReport, CODE_DEFINED_ROLES};
