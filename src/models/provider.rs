//! Provider entity model
//!
//! This module contains the SeaORM entity model for the providers table,
//! the catalog of OAuth2 endpoint families apps can be bound to.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

use crate::oauth::ClientKind;

/// Provider entity representing a cloud vendor's OAuth2 endpoint family
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "providers")]
pub struct Model {
    /// Unique provider name (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,

    /// Base URL the authorize/token/resource endpoints are derived from
    pub authentication_endpoint: String,

    /// Client implementation used to talk to this provider
    pub client_kind: ClientKind,

    /// Timestamp when the provider was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the provider was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::app::Entity")]
    App,
}

impl Related<super::app::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::App.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
