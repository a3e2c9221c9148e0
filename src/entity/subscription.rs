use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
  Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
  #[sea_orm(string_value = "active")]
  Active,
  /// Terminal, renewals create a new subscription
  #[sea_orm(string_value = "expired")]
  Expired,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscriptions")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  pub user_id: i32,
  pub product_id: i32,
  #[sea_orm(unique)]
  pub purchase_id: i32,
  pub tradingview_username: String,
  pub start_date: DateTime,
  pub end_date: DateTime,
  pub status: SubscriptionStatus,
  pub notified_expiring_soon: bool,
  pub notified_expired: bool,
  /// Best-effort deliveries that failed for this subscription
  pub notify_failures: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::user::Entity",
    from = "Column::UserId",
    to = "super::user::Column::Id"
  )]
  User,
  #[sea_orm(
    belongs_to = "super::product::Entity",
    from = "Column::ProductId",
    to = "super::product::Column::Id"
  )]
  Product,
  #[sea_orm(
    belongs_to = "super::purchase::Entity",
    from = "Column::PurchaseId",
    to = "super::purchase::Column::Id"
  )]
  Purchase,
}

impl Related<super::user::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::User.def()
  }
}

impl Related<super::product::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Product.def()
  }
}

impl Related<super::purchase::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Purchase.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
