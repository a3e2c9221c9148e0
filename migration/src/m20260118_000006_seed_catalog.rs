use sea_orm_migration::prelude::*;

use super::m20260110_000002_create_products::Products;

#[derive(DeriveMigrationName)]
pub struct Migration;

/// (id, name, description, price in kopecks)
const CATALOG: [(i32, &str, &str, i64); 3] = [
  (1, "RSI Pro", "Advanced RSI with extra levels and signals", 50_000),
  (2, "MACD Advanced", "MACD with configurable parameters", 70_000),
  (3, "Volume Profile", "Professional volume analysis tool", 100_000),
];

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    let mut insert = Query::insert();
    insert
      .into_table(Products::Table)
      .columns([
        Products::Id,
        Products::Name,
        Products::Description,
        Products::Price,
        Products::DurationDays,
        Products::IsActive,
        Products::CreatedAt,
      ])
      .on_conflict(OnConflict::column(Products::Id).do_nothing().to_owned());

    for (id, name, description, price) in CATALOG {
      insert.values_panic([
        id.into(),
        name.into(),
        description.into(),
        price.into(),
        30.into(),
        true.into(),
        Expr::current_timestamp().into(),
      ]);
    }

    manager.exec_stmt(insert).await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    let ids = CATALOG.iter().map(|(id, ..)| *id);
    manager
      .exec_stmt(
        Query::delete()
          .from_table(Products::Table)
          .and_where(Expr::col(Products::Id).is_in(ids))
          .to_owned(),
      )
      .await
  }
}
