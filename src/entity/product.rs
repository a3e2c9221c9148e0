use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  pub name: String,
  pub description: Option<String>,
  /// Minor units (kopecks)
  pub price: i64,
  pub duration_days: i32,
  /// TradingView script the entitlement grants access to
  pub tradingview_script: Option<String>,
  /// Deliverable: Telegram file id, URL or local path
  #[serde(skip_serializing)]
  pub file_ref: Option<String>,
  pub is_active: bool,
  pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(has_many = "super::purchase::Entity")]
  Purchases,
}

impl Related<super::purchase::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Purchases.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
