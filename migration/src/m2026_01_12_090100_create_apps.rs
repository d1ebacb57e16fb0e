//! Migration to create the apps table.
//!
//! Apps hold the operator-registered client credentials for one provider and
//! point at their active authorization by id. The secret is stored encrypted.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Apps::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Apps::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Apps::Name).text().not_null().unique_key())
                    .col(ColumnDef::new(Apps::ClientId).text().not_null())
                    .col(ColumnDef::new(Apps::SecretCiphertext).binary().not_null())
                    .col(
                        ColumnDef::new(Apps::Scope)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Apps::Resource).text().null())
                    .col(ColumnDef::new(Apps::ApiUri).text().not_null())
                    .col(ColumnDef::new(Apps::ProviderName).text().not_null())
                    .col(
                        ColumnDef::new(Apps::AuthorizationId)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Apps::Notes).json_binary().null())
                    .col(
                        ColumnDef::new(Apps::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Apps::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_apps_provider_name")
                            .from(Apps::Table, Apps::ProviderName)
                            .to(Providers::Table, Providers::Name)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_apps_provider_name")
                    .table(Apps::Table)
                    .col(Apps::ProviderName)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_apps_provider_name").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Apps::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Apps {
    Table,
    Id,
    Name,
    ClientId,
    SecretCiphertext,
    Scope,
    Resource,
    ApiUri,
    ProviderName,
    AuthorizationId,
    Notes,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Providers {
    Table,
    Name,
}
