use sea_orm_migration::prelude::*;

use super::{
  m20260110_000001_create_users::Users,
  m20260110_000002_create_products::Products,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Purchases::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Purchases::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Purchases::UserId).integer().not_null())
          .col(ColumnDef::new(Purchases::ProductId).integer().not_null())
          .col(ColumnDef::new(Purchases::Amount).big_integer().not_null())
          .col(
            ColumnDef::new(Purchases::Status)
              .string()
              .not_null()
              .default("pending"),
          )
          .col(ColumnDef::new(Purchases::CreatedAt).date_time().not_null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_purchases_user")
              .from(Purchases::Table, Purchases::UserId)
              .to(Users::Table, Users::Id),
          )
          .foreign_key(
            ForeignKey::create()
              .name("fk_purchases_product")
              .from(Purchases::Table, Purchases::ProductId)
              .to(Products::Table, Products::Id),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_purchases_user_product_status")
          .table(Purchases::Table)
          .col(Purchases::UserId)
          .col(Purchases::ProductId)
          .col(Purchases::Status)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Purchases::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum Purchases {
  Table,
  Id,
  UserId,
  ProductId,
  Amount,
  Status,
  CreatedAt,
}
