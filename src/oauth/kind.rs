//! Client kinds and their per-provider protocol quirks.
//!
//! Every provider row names one [`ClientKind`]. The kind decides how the
//! scope is encoded, whether a `resource` parameter is sent, whether the
//! redirect URI is forced onto https and which extra authorize parameters
//! are added. Endpoint paths are the same for all kinds.

use std::fmt;
use std::str::FromStr;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;

/// Path appended to the authentication endpoint for the authorize step
pub const AUTHORIZE_PATH: &str = "/authorize";
/// Path appended to the authentication endpoint for token requests
pub const TOKEN_PATH: &str = "/token";
/// Path appended to the authentication endpoint for resource owner details
pub const RESOURCE_OWNER_PATH: &str = "/token/resource";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    #[sea_orm(string_value = "google")]
    Google,
    #[sea_orm(string_value = "azure")]
    Azure,
    #[sea_orm(string_value = "amazon")]
    Amazon,
}

/// Scope as each client kind models it.
///
/// Google takes scopes as a list, azure and amazon as one opaque string.
/// Both render to the same single space-delimited `scope` query value,
/// since Google's authorize endpoint joins its scope list with spaces
/// (RFC 6749 section 3.3). The only wire difference is that `List` drops
/// empty entries, so stray whitespace in a google scope collapses while a
/// `Joined` scope is sent verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeParam {
    List(Vec<String>),
    Joined(String),
}

impl ScopeParam {
    pub fn to_query_value(&self) -> String {
        match self {
            ScopeParam::List(scopes) => scopes.join(" "),
            ScopeParam::Joined(scope) => scope.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ScopeParam::List(scopes) => scopes.is_empty(),
            ScopeParam::Joined(scope) => scope.trim().is_empty(),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown client kind '{0}'")]
pub struct UnknownClientKind(pub String);

impl ClientKind {
    pub const ALL: [ClientKind; 3] = [ClientKind::Google, ClientKind::Azure, ClientKind::Amazon];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKind::Google => "google",
            ClientKind::Azure => "azure",
            ClientKind::Amazon => "amazon",
        }
    }

    pub fn encode_scope(&self, scope: &str) -> ScopeParam {
        match self {
            ClientKind::Google => {
                ScopeParam::List(scope.split_whitespace().map(str::to_string).collect())
            }
            ClientKind::Azure | ClientKind::Amazon => ScopeParam::Joined(scope.to_string()),
        }
    }

    /// Azure v1 endpoints take the target API as a `resource` parameter
    pub fn sends_resource(&self) -> bool {
        matches!(self, ClientKind::Azure)
    }

    /// Azure rejects plain-http reply URLs outside localhost registrations
    pub fn forces_https_callback(&self) -> bool {
        matches!(self, ClientKind::Azure)
    }

    pub fn extra_authorize_params(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            ClientKind::Google => &[("access_type", "offline"), ("prompt", "consent")],
            ClientKind::Azure | ClientKind::Amazon => &[],
        }
    }

    pub fn apply_callback_policy(&self, mut redirect_uri: Url) -> Url {
        if self.forces_https_callback() && redirect_uri.scheme() == "http" {
            // set_scheme only fails for special/non-special switches; http -> https is allowed
            let _ = redirect_uri.set_scheme("https");
        }
        redirect_uri
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientKind {
    type Err = UnknownClientKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ClientKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| UnknownClientKind(value.to_string()))
    }
}

/// Derive a concrete endpoint from a provider's authentication endpoint.
pub fn derive_endpoint(authentication_endpoint: &str, path: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!(
        "{}{}",
        authentication_endpoint.trim().trim_end_matches('/'),
        path
    ))
}
