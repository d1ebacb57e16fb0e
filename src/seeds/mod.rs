//! Database seeding functionality
//!
//! Populates tables that must not start empty. Today that is only the
//! provider catalog, seeded from the [`crate::oauth::ProviderRegistry`].

pub mod provider;

pub use provider::seed_providers;
