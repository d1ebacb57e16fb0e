//! Database migrations for the cloud apps service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_01_12_090000_create_providers;
mod m2026_01_12_090100_create_apps;
mod m2026_01_12_090200_create_authorizations;
mod m2026_01_12_090300_create_oauth_states;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_12_090000_create_providers::Migration),
            Box::new(m2026_01_12_090100_create_apps::Migration),
            Box::new(m2026_01_12_090200_create_authorizations::Migration),
            Box::new(m2026_01_12_090300_create_oauth_states::Migration),
        ]
    }
}
