use sea_orm::sea_query::Expr;

use crate::{
  entity::{PurchaseStatus, purchase},
  prelude::*,
};

pub struct Purchase<'a> {
  db: &'a DatabaseConnection,
}

impl<'a> Purchase<'a> {
  pub fn new(db: &'a DatabaseConnection) -> Self {
    Self { db }
  }

  pub async fn create_pending(
    &self,
    user_id: i32,
    product_id: i32,
    amount: i64,
  ) -> Result<purchase::Model> {
    let purchase = purchase::ActiveModel {
      user_id: Set(user_id),
      product_id: Set(product_id),
      amount: Set(amount),
      status: Set(PurchaseStatus::Pending),
      created_at: Set(Utc::now().naive_utc()),
      invoice_id: Set(None),
      pay_url: Set(None),
      paid_at: Set(None),
      ..Default::default()
    };

    Ok(purchase.insert(self.db).await?)
  }

  pub async fn attach_invoice(
    &self,
    id: i32,
    invoice_id: i64,
    pay_url: &str,
  ) -> Result<()> {
    purchase::Entity::update_many()
      .col_expr(purchase::Column::InvoiceId, Expr::value(invoice_id))
      .col_expr(purchase::Column::PayUrl, Expr::value(pay_url))
      .filter(purchase::Column::Id.eq(id))
      .exec(self.db)
      .await?;
    Ok(())
  }

  /// Drops a pending purchase whose invoice could not be created.
  /// Paid purchases are never removed.
  pub async fn discard(&self, id: i32) -> Result<bool> {
    let result = purchase::Entity::delete_many()
      .filter(purchase::Column::Id.eq(id))
      .filter(purchase::Column::Status.eq(PurchaseStatus::Pending))
      .exec(self.db)
      .await?;
    Ok(result.rows_affected == 1)
  }

  pub async fn by_id(&self, id: i32) -> Result<Option<purchase::Model>> {
    Ok(purchase::Entity::find_by_id(id).one(self.db).await?)
  }

  pub async fn by_invoice(
    &self,
    invoice_id: i64,
  ) -> Result<Option<purchase::Model>> {
    let purchase = purchase::Entity::find()
      .filter(purchase::Column::InvoiceId.eq(invoice_id))
      .one(self.db)
      .await?;
    Ok(purchase)
  }

  pub async fn latest_pending(
    &self,
    user_id: i32,
    product_id: i32,
  ) -> Result<Option<purchase::Model>> {
    let purchase = purchase::Entity::find()
      .filter(purchase::Column::UserId.eq(user_id))
      .filter(purchase::Column::ProductId.eq(product_id))
      .filter(purchase::Column::Status.eq(PurchaseStatus::Pending))
      .order_by_desc(purchase::Column::CreatedAt)
      .order_by_desc(purchase::Column::Id)
      .one(self.db)
      .await?;
    Ok(purchase)
  }

  pub async fn has_paid(&self, user_id: i32, product_id: i32) -> Result<bool> {
    let count = purchase::Entity::find()
      .filter(purchase::Column::UserId.eq(user_id))
      .filter(purchase::Column::ProductId.eq(product_id))
      .filter(purchase::Column::Status.eq(PurchaseStatus::Paid))
      .count(self.db)
      .await?;
    Ok(count > 0)
  }

  pub async fn count_by_status(&self, status: PurchaseStatus) -> Result<u64> {
    let count = purchase::Entity::find()
      .filter(purchase::Column::Status.eq(status))
      .count(self.db)
      .await?;
    Ok(count)
  }

  /// Flips `pending -> paid` in a single conditional statement.
  ///
  /// Returns `false` when the row was not pending anymore: another delivery
  /// of the same notification already won.
  pub async fn mark_paid<C: ConnectionTrait>(
    conn: &C,
    id: i32,
    now: DateTime,
  ) -> Result<bool> {
    let result = purchase::Entity::update_many()
      .col_expr(purchase::Column::Status, Expr::value(PurchaseStatus::Paid))
      .col_expr(purchase::Column::PaidAt, Expr::value(now))
      .filter(purchase::Column::Id.eq(id))
      .filter(purchase::Column::Status.eq(PurchaseStatus::Pending))
      .exec(conn)
      .await?;
    Ok(result.rows_affected == 1)
  }
}
