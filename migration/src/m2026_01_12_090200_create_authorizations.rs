//! Migration to create the authorizations table.
//!
//! Authorizations are keyed by a deterministic id so that restarting the
//! authorization code flow for the same app reuses the same row.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Authorizations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Authorizations::AuthorizationId)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Authorizations::ClientKind).text().not_null())
                    .col(ColumnDef::new(Authorizations::ServiceName).text().not_null())
                    .col(ColumnDef::new(Authorizations::ClientId).text().not_null())
                    .col(
                        ColumnDef::new(Authorizations::ClientSecretCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Authorizations::GrantType)
                            .text()
                            .not_null()
                            .default("authorization_code"),
                    )
                    .col(
                        ColumnDef::new(Authorizations::Scope)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Authorizations::AccessTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Authorizations::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Authorizations::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Authorizations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Authorizations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_authorizations_expires_at")
                    .table(Authorizations::Table)
                    .col(Authorizations::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_authorizations_expires_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Authorizations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Authorizations {
    Table,
    AuthorizationId,
    ClientKind,
    ServiceName,
    ClientId,
    ClientSecretCiphertext,
    GrantType,
    Scope,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    ExpiresAt,
    CreatedAt,
    UpdatedAt,
}
