//! Migration to add deactivation and soft-delete fields to account.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Account::Table)
                    .add_column(
                        ColumnDef::new(Account::IsDeactivated)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .add_column(ColumnDef::new(Account::DeactivatedAt).timestamp_with_time_zone().null())
                    .add_column(
                        ColumnDef::new(Account::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .add_column(ColumnDef::new(Account::DeletedAt).timestamp_with_time_zone().null())
                    .add_column(ColumnDef::new(Account::PendingGroupActions).text().null())
                    .to_owned(),
            )
            .await?;

        // Index for the reconciliation sweep
        manager
            .create_index(
                Index::create()
                    .name("idx_account_lifecycle")
                    .table(Account::Table)
                    .col(Account::IsDeactivated)
                    .col(Account::IsDeleted)
                    .col(Account::DeactivatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_account_lifecycle")
                    .table(Account::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .alter_table(
                Table::alter()
                    .table(Account::Table)
                    .drop_column(Account::IsDeactivated)
                    .drop_column(Account::DeactivatedAt)
                    .drop_column(Account::IsDeleted)
                    .drop_column(Account::DeletedAt)
                    .drop_column(Account::PendingGroupActions)
                    .to_owned(),
            )
            .await
    }
}

#[derive(Iden)]
enum Account {
    Table,
    IsDeactivated,
    DeactivatedAt,
    IsDeleted,
    DeletedAt,
    PendingGroupActions,
}
