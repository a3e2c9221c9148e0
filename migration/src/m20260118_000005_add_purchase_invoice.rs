use sea_orm_migration::prelude::*;

use super::m20260110_000003_create_purchases::Purchases;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(DeriveIden, Clone, Copy)]
enum Invoice {
  InvoiceId,
  PayUrl,
  PaidAt,
}

impl Invoice {
  const ALL: [Invoice; 3] =
    [Invoice::InvoiceId, Invoice::PayUrl, Invoice::PaidAt];

  fn column(self) -> ColumnDef {
    let mut def = ColumnDef::new(self);
    match self {
      Invoice::InvoiceId => def.big_integer(),
      Invoice::PayUrl => def.string(),
      Invoice::PaidAt => def.date_time(),
    };
    def.null().to_owned()
  }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    // SQLite applies one column per ALTER TABLE statement
    for column in Invoice::ALL {
      manager
        .alter_table(
          Table::alter()
            .table(Purchases::Table)
            .add_column(column.column())
            .to_owned(),
        )
        .await?;
    }

    manager
      .create_index(
        Index::create()
          .name("idx_purchases_invoice")
          .table(Purchases::Table)
          .col(Invoice::InvoiceId)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_index(
        Index::drop()
          .name("idx_purchases_invoice")
          .table(Purchases::Table)
          .to_owned(),
      )
      .await?;

    for column in Invoice::ALL {
      manager
        .alter_table(
          Table::alter()
            .table(Purchases::Table)
            .drop_column(column)
            .to_owned(),
        )
        .await?;
    }
    Ok(())
  }
}
