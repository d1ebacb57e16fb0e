//! Built-in provider registry.
//!
//! The registry lists the provider families the service knows about out of
//! the box, each with a default authentication endpoint that configuration
//! may override. It is built once at startup and handed to the services
//! that need it; provider rows in the database are seeded from it.

use std::collections::BTreeMap;

use thiserror::Error;

use super::kind::ClientKind;
use crate::config::ProviderEndpointsConfig;

pub const DEFAULT_GOOGLE_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2";
pub const DEFAULT_AZURE_AUTH_ENDPOINT: &str = "https://login.microsoftonline.com/common/oauth2";
pub const DEFAULT_AMAZON_AUTH_ENDPOINT: &str = "https://api.amazon.com/auth/o2";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("provider '{name}' is not registered")]
    ProviderNotFound { name: String },
}

/// One registered provider family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub name: String,
    pub authentication_endpoint: String,
    pub client_kind: ClientKind,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl ProviderRegistry {
    pub fn new(entries: impl IntoIterator<Item = RegistryEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.name.clone(), entry))
                .collect(),
        }
    }

    /// Registry of the three built-in families, with endpoint overrides applied
    pub fn from_config(endpoints: &ProviderEndpointsConfig) -> Self {
        let endpoint = |value: &Option<String>, default: &str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        };

        Self::new([
            RegistryEntry {
                name: ClientKind::Google.as_str().to_string(),
                authentication_endpoint: endpoint(
                    &endpoints.google_auth_endpoint,
                    DEFAULT_GOOGLE_AUTH_ENDPOINT,
                ),
                client_kind: ClientKind::Google,
            },
            RegistryEntry {
                name: ClientKind::Azure.as_str().to_string(),
                authentication_endpoint: endpoint(
                    &endpoints.azure_auth_endpoint,
                    DEFAULT_AZURE_AUTH_ENDPOINT,
                ),
                client_kind: ClientKind::Azure,
            },
            RegistryEntry {
                name: ClientKind::Amazon.as_str().to_string(),
                authentication_endpoint: endpoint(
                    &endpoints.amazon_auth_endpoint,
                    DEFAULT_AMAZON_AUTH_ENDPOINT,
                ),
                client_kind: ClientKind::Amazon,
            },
        ])
    }

    pub fn get(&self, name: &str) -> Result<&RegistryEntry, RegistryError> {
        self.entries
            .get(name)
            .ok_or_else(|| RegistryError::ProviderNotFound {
                name: name.to_string(),
            })
    }

    /// Default endpoint for a kind, used when a provider is created without one
    pub fn default_endpoint_for(&self, kind: ClientKind) -> Option<&str> {
        self.entries
            .values()
            .find(|entry| entry.client_kind == kind)
            .map(|entry| entry.authentication_endpoint.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
