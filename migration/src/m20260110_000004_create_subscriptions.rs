use sea_orm_migration::prelude::*;

use super::{
  m20260110_000001_create_users::Users,
  m20260110_000002_create_products::Products,
  m20260110_000003_create_purchases::Purchases,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Subscriptions::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Subscriptions::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Subscriptions::UserId).integer().not_null())
          .col(ColumnDef::new(Subscriptions::ProductId).integer().not_null())
          .col(
            ColumnDef::new(Subscriptions::PurchaseId)
              .integer()
              .not_null()
              .unique_key(),
          )
          .col(
            ColumnDef::new(Subscriptions::TradingviewUsername)
              .string()
              .not_null(),
          )
          .col(ColumnDef::new(Subscriptions::StartDate).date_time().not_null())
          .col(ColumnDef::new(Subscriptions::EndDate).date_time().not_null())
          .col(
            ColumnDef::new(Subscriptions::Status)
              .string()
              .not_null()
              .default("active"),
          )
          .col(
            ColumnDef::new(Subscriptions::NotifiedExpiringSoon)
              .boolean()
              .not_null()
              .default(false),
          )
          .col(
            ColumnDef::new(Subscriptions::NotifiedExpired)
              .boolean()
              .not_null()
              .default(false),
          )
          .col(
            ColumnDef::new(Subscriptions::NotifyFailures)
              .integer()
              .not_null()
              .default(0),
          )
          .foreign_key(
            ForeignKey::create()
              .name("fk_subscriptions_user")
              .from(Subscriptions::Table, Subscriptions::UserId)
              .to(Users::Table, Users::Id),
          )
          .foreign_key(
            ForeignKey::create()
              .name("fk_subscriptions_product")
              .from(Subscriptions::Table, Subscriptions::ProductId)
              .to(Products::Table, Products::Id),
          )
          .foreign_key(
            ForeignKey::create()
              .name("fk_subscriptions_purchase")
              .from(Subscriptions::Table, Subscriptions::PurchaseId)
              .to(Purchases::Table, Purchases::Id),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_subscriptions_status_end")
          .table(Subscriptions::Table)
          .col(Subscriptions::Status)
          .col(Subscriptions::EndDate)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(Subscriptions::Table).to_owned())
      .await
  }
}

#[derive(DeriveIden)]
pub enum Subscriptions {
  Table,
  Id,
  UserId,
  ProductId,
  PurchaseId,
  TradingviewUsername,
  StartDate,
  EndDate,
  Status,
  NotifiedExpiringSoon,
  NotifiedExpired,
  NotifyFailures,
}
