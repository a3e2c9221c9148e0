use sea_orm::sea_query::Expr;

use crate::{
  entity::{SubscriptionStatus, subscription, user},
  prelude::*,
};

pub struct Subscription<'a> {
  db: &'a DatabaseConnection,
}

/// Row inserted when a purchase becomes paid.
#[derive(Debug, Clone)]
pub struct Grant {
  pub user_id: i32,
  pub product_id: i32,
  pub purchase_id: i32,
  pub tradingview_username: String,
  pub duration_days: i32,
}

impl Grant {
  pub fn end_date(&self, now: DateTime) -> Result<DateTime, DataError> {
    TimeDelta::try_days(self.duration_days.into())
      .and_then(|days| now.checked_add_signed(days))
      .ok_or(DataError::Duration(self.product_id))
  }
}

impl<'a> Subscription<'a> {
  pub fn new(db: &'a DatabaseConnection) -> Self {
    Self { db }
  }

  pub async fn insert<C: ConnectionTrait>(
    conn: &C,
    grant: Grant,
    now: DateTime,
  ) -> Result<subscription::Model> {
    let end_date = grant.end_date(now)?;

    let subscription = subscription::ActiveModel {
      user_id: Set(grant.user_id),
      product_id: Set(grant.product_id),
      purchase_id: Set(grant.purchase_id),
      tradingview_username: Set(grant.tradingview_username),
      start_date: Set(now),
      end_date: Set(end_date),
      status: Set(SubscriptionStatus::Active),
      notified_expiring_soon: Set(false),
      notified_expired: Set(false),
      notify_failures: Set(0),
      ..Default::default()
    };

    Ok(subscription.insert(conn).await?)
  }

  pub async fn by_id(&self, id: i32) -> Result<Option<subscription::Model>> {
    Ok(subscription::Entity::find_by_id(id).one(self.db).await?)
  }

  pub async fn by_user(
    &self,
    user_id: i32,
  ) -> Result<Vec<subscription::Model>> {
    let subscriptions = subscription::Entity::find()
      .filter(subscription::Column::UserId.eq(user_id))
      .order_by_desc(subscription::Column::EndDate)
      .all(self.db)
      .await?;
    Ok(subscriptions)
  }

  /// Active, not yet reminded, ending within `(now, now + window]`.
  pub async fn expiring(
    &self,
    now: DateTime,
    window: TimeDelta,
  ) -> Result<Vec<(subscription::Model, Option<user::Model>)>> {
    let rows = subscription::Entity::find()
      .filter(subscription::Column::Status.eq(SubscriptionStatus::Active))
      .filter(subscription::Column::NotifiedExpiringSoon.eq(false))
      .filter(subscription::Column::EndDate.gt(now))
      .filter(subscription::Column::EndDate.lte(now + window))
      .order_by_asc(subscription::Column::EndDate)
      .find_also_related(user::Entity)
      .all(self.db)
      .await?;
    Ok(rows)
  }

  /// Active subscriptions whose end date has passed.
  pub async fn lapsed(
    &self,
    now: DateTime,
  ) -> Result<Vec<(subscription::Model, Option<user::Model>)>> {
    let rows = subscription::Entity::find()
      .filter(subscription::Column::Status.eq(SubscriptionStatus::Active))
      .filter(subscription::Column::EndDate.lte(now))
      .order_by_asc(subscription::Column::EndDate)
      .find_also_related(user::Entity)
      .all(self.db)
      .await?;
    Ok(rows)
  }

  /// Sets `notified_expiring_soon` once. `false` if it was already set or
  /// the subscription is no longer active.
  pub async fn claim_reminder(&self, id: i32) -> Result<bool> {
    let result = subscription::Entity::update_many()
      .col_expr(subscription::Column::NotifiedExpiringSoon, Expr::value(true))
      .filter(subscription::Column::Id.eq(id))
      .filter(subscription::Column::Status.eq(SubscriptionStatus::Active))
      .filter(subscription::Column::NotifiedExpiringSoon.eq(false))
      .exec(self.db)
      .await?;
    Ok(result.rows_affected == 1)
  }

  /// `active -> expired` together with `notified_expired`, once.
  pub async fn claim_expiry(&self, id: i32) -> Result<bool> {
    let result = subscription::Entity::update_many()
      .col_expr(
        subscription::Column::Status,
        Expr::value(SubscriptionStatus::Expired),
      )
      .col_expr(subscription::Column::NotifiedExpired, Expr::value(true))
      .filter(subscription::Column::Id.eq(id))
      .filter(subscription::Column::Status.eq(SubscriptionStatus::Active))
      .exec(self.db)
      .await?;
    Ok(result.rows_affected == 1)
  }

  pub async fn record_failures(&self, id: i32, failures: usize) -> Result<()> {
    if failures == 0 {
      return Ok(());
    }

    subscription::Entity::update_many()
      .col_expr(
        subscription::Column::NotifyFailures,
        Expr::col(subscription::Column::NotifyFailures).add(failures as i32),
      )
      .filter(subscription::Column::Id.eq(id))
      .exec(self.db)
      .await?;
    Ok(())
  }

  pub async fn count_active(&self) -> Result<u64> {
    let count = subscription::Entity::find()
      .filter(subscription::Column::Status.eq(SubscriptionStatus::Active))
      .count(self.db)
      .await?;
    Ok(count)
  }
}
