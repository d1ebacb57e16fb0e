//! Authorization entity model
//!
//! Stored OAuth2 credential bundle for one app. Secrets are kept as
//! AES-256-GCM ciphertexts; see [`crate::repositories::AuthorizationRepository`]
//! for the decrypted view.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

use crate::oauth::ClientKind;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "authorizations")]
pub struct Model {
    /// Deterministic id derived from (client kind, service name, client id)
    #[sea_orm(primary_key, auto_increment = false)]
    pub authorization_id: String,

    pub client_kind: ClientKind,

    /// Name of the app the authorization was started for
    pub service_name: String,

    pub client_id: String,

    pub client_secret_ciphertext: Option<Vec<u8>>,

    /// Always `authorization_code` for records created by this service
    pub grant_type: String,

    pub scope: String,

    pub access_token_ciphertext: Option<Vec<u8>>,

    pub refresh_token_ciphertext: Option<Vec<u8>>,

    pub expires_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
