//! # OAuth2 Module
//!
//! Provider client kinds, the built-in provider registry and the
//! authorization-code client that drives consent, code exchange, refresh
//! and bearer request construction.

pub mod authorization;
pub mod callback;
pub mod client;
pub mod error;
pub mod kind;
pub mod registry;

pub use authorization::{Authorization, TokenGrant, authorization_id_for};
pub use callback::{CallbackAction, CallbackUrlBuilder, PublicUrlBuilder};
pub use client::{
    AUTHORIZATION_ID_QUERY_PARAMETER, OAuthClient, OAuthClientFactory,
    authorization_id_from_return_uri,
};
pub use error::OAuthError;
pub use kind::{ClientKind, ScopeParam};
pub use registry::{ProviderRegistry, RegistryEntry, RegistryError};
