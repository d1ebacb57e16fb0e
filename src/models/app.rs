//! App entity model
//!
//! An app is one operator-registered integration: client credentials bound to
//! a provider, the API it targets and the id of its active authorization.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::provider::Entity as Provider;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "apps")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Unique app name, also used as the OAuth service name
    #[sea_orm(unique)]
    pub name: String,

    pub client_id: String,

    /// Encrypted client secret
    pub secret_ciphertext: Vec<u8>,

    /// Space separated scope string
    pub scope: String,

    /// Resource parameter sent by azure-kind providers
    pub resource: Option<String>,

    /// Base URI of the provider API authenticated requests go to
    pub api_uri: String,

    pub provider_name: String,

    /// Active authorization id, empty when the app is not authorized
    pub authorization_id: String,

    /// Free-form operator notes
    #[sea_orm(column_type = "JsonBinary")]
    pub notes: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Whether the app currently points at an authorization
    pub fn is_authorized(&self) -> bool {
        !self.authorization_id.is_empty()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Provider",
        from = "Column::ProviderName",
        to = "super::provider::Column::Name"
    )]
    Provider,
}

impl Related<Provider> for Entity {
    fn to() -> RelationDef {
        Relation::Provider.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
