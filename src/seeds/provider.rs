//! Provider seeding functionality
//!
//! Inserts a provider row for every registry entry that has none yet.
//! Rows an operator already edited are left untouched.

use anyhow::Result;

use crate::oauth::ProviderRegistry;
use crate::repositories::ProviderRepository;

/// Seeds the providers table from the registry
///
/// # Arguments
///
/// * `repo` - Provider repository to write through
/// * `registry` - Built-in provider families with configured endpoints
///
/// # Returns
///
/// Returns the number of providers created
pub async fn seed_providers(repo: &ProviderRepository, registry: &ProviderRegistry) -> Result<usize> {
    let mut created = 0;

    for entry in registry.entries() {
        match repo.insert_if_absent(entry).await {
            Ok(true) => {
                log::info!(
                    "Created provider '{}' ({}) at {}",
                    entry.name,
                    entry.client_kind,
                    entry.authentication_endpoint
                );
                created += 1;
            }
            Ok(false) => {
                log::info!("Provider '{}' already exists, skipping", entry.name);
            }
            Err(e) => {
                log::error!("Failed to seed provider '{}': {}", entry.name, e);
                return Err(e);
            }
        }
    }

    log::info!("Provider seeding completed, {} created", created);
    Ok(created)
}
