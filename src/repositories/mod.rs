//! # Repository Layer
//!
//! Repositories wrap SeaORM operations for providers, apps and
//! authorizations. Secrets are encrypted and decrypted here so nothing
//! above this layer sees ciphertext.

pub mod app;
pub mod authorization;
pub mod provider;

pub use app::AppRepository;
pub use authorization::AuthorizationRepository;
pub use provider::ProviderRepository;
