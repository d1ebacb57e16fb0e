//! # Data Models
//!
//! SeaORM entities for providers, apps, authorizations and pending OAuth
//! states, plus small response types shared by the HTTP layer.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod app;
pub mod authorization;
pub mod oauth_state;
pub mod provider;

pub use app::Entity as App;
pub use authorization::Entity as Authorization;
pub use oauth_state::Entity as OAuthState;
pub use provider::Entity as Provider;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "cloud-apps".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
