pub use sea_orm_migration::prelude::*;

mod m20260110_000001_create_users;
mod m20260110_000002_create_products;
mod m20260110_000003_create_purchases;
mod m20260110_000004_create_subscriptions;
mod m20260118_000005_add_purchase_invoice;
mod m20260118_000006_seed_catalog;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
  fn migrations() -> Vec<Box<dyn MigrationTrait>> {
    vec![
      Box::new(m20260110_000001_create_users::Migration),
      Box::new(m20260110_000002_create_products::Migration),
      Box::new(m20260110_000003_create_purchases::Migration),
      Box::new(m20260110_000004_create_subscriptions::Migration),
      Box::new(m20260118_000005_add_purchase_invoice::Migration),
      Box::new(m20260118_000006_seed_catalog::Migration),
    ]
  }
}
