//! # OAuth State Model
//!
//! Pending authorization state keyed by the random state token sent to the
//! provider. The payload is an encrypted JSON blob.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "oauth_states")]
pub struct Model {
    /// State token (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub state: String,

    /// Encrypted pending authorization payload
    pub payload_ciphertext: Vec<u8>,

    /// Expiration timestamp
    pub expires_at: DateTimeWithTimeZone,

    /// When the state was created
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
