//! Decrypted authorization record.

use chrono::{DateTime, Duration, Utc};
use oauth2::{AccessToken, ClientSecret, RefreshToken};
use sha2::{Digest, Sha256};

use super::kind::ClientKind;

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";

/// Deterministic authorization id.
///
/// Hashes the client kind, the service (app) name, the client id and the
/// grant type, so the same app starting authorization twice lands on the
/// same record.
pub fn authorization_id_for(kind: ClientKind, service_name: &str, client_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(service_name.as_bytes());
    hasher.update(b"|");
    hasher.update(client_id.as_bytes());
    hasher.update(b"|");
    hasher.update(GRANT_AUTHORIZATION_CODE.as_bytes());
    hex::encode(hasher.finalize())
}

/// Token set returned by a provider token endpoint
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: AccessToken,
    pub refresh_token: Option<RefreshToken>,
    pub expires_in: Option<Duration>,
    pub scope: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Authorization {
    pub authorization_id: String,
    pub client_kind: ClientKind,
    pub service_name: String,
    pub client_id: String,
    pub client_secret: Option<ClientSecret>,
    pub grant_type: String,
    pub scope: String,
    pub access_token: Option<AccessToken>,
    pub refresh_token: Option<RefreshToken>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Authorization {
    pub fn new(
        client_kind: ClientKind,
        service_name: impl Into<String>,
        client_id: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        let service_name = service_name.into();
        let client_id = client_id.into();
        Self {
            authorization_id: authorization_id_for(client_kind, &service_name, &client_id),
            client_kind,
            service_name,
            client_id,
            client_secret: None,
            grant_type: GRANT_AUTHORIZATION_CODE.to_string(),
            scope: scope.into(),
            access_token: None,
            refresh_token: None,
            expires_at: None,
        }
    }

    /// An authorization without an expiry never expires
    pub fn has_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    pub fn has_expired(&self) -> bool {
        self.has_expired_at(Utc::now())
    }

    pub fn expires_within(&self, now: DateTime<Utc>, lead: Duration) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now + lead)
    }

    /// Store a freshly issued token set. A missing refresh token keeps the
    /// one already held, since most providers only issue it once.
    pub fn apply_grant(&mut self, grant: TokenGrant, now: DateTime<Utc>) {
        self.access_token = Some(grant.access_token);
        if let Some(refresh_token) = grant.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        self.expires_at = grant.expires_in.map(|ttl| now + ttl);
        if let Some(scope) = grant.scope.filter(|s| !s.trim().is_empty()) {
            self.scope = scope;
        }
    }
}
