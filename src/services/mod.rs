//! # Services
//!
//! Request/response orchestration over the repositories and the OAuth
//! client. Services hold no state of their own beyond shared handles.

use thiserror::Error;

use crate::oauth::OAuthError;

pub mod app;
pub mod provider;

pub use app::{AppChanges, AppService, AuthorizeOutcome, NewApp};
pub use provider::{NewProvider, ProviderChanges, ProviderService};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    OAuth(#[from] OAuthError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ServiceError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ServiceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
