//! Time-driven subscription lifecycle.
//!
//! `active(soon=F, exp=F) -> active(T, F) -> expired(T, T)`, or straight to
//! `expired(F, T)` when no reminder window was ever observed. Each step is
//! claimed with a guarded single-row update before anything is sent, so a
//! step fires at most once even with overlapping sweeps.

use teloxide::utils::html;

use crate::{
  entity::{product, subscription, user},
  notify::{self, Notifier},
  prelude::*,
  sv,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
  pub reminded: usize,
  pub expired: usize,
  pub failed: usize,
}

pub struct Sweeper<'a> {
  db: &'a DatabaseConnection,
  notifier: &'a dyn Notifier,
  operators: &'a [i64],
  window: TimeDelta,
}

impl<'a> Sweeper<'a> {
  pub fn new(
    db: &'a DatabaseConnection,
    notifier: &'a dyn Notifier,
    operators: &'a [i64],
    window: TimeDelta,
  ) -> Self {
    Self { db, notifier, operators, window }
  }

  /// One sweep at `now`. Errors of individual subscriptions are logged and
  /// counted, only a failed scan query aborts the run.
  pub async fn run(&self, now: DateTime) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    for (sub, user) in
      sv::Subscription::new(self.db).expiring(now, self.window).await?
    {
      match self.remind(&sub, user, now).await {
        Ok(true) => report.reminded += 1,
        Ok(false) => {}
        Err(err) => {
          error!("Reminder for subscription #{} failed: {err}", sub.id);
          report.failed += 1;
        }
      }
    }

    for (sub, user) in sv::Subscription::new(self.db).lapsed(now).await? {
      match self.expire(&sub, user).await {
        Ok(true) => report.expired += 1,
        Ok(false) => {}
        Err(err) => {
          error!("Expiry of subscription #{} failed: {err}", sub.id);
          report.failed += 1;
        }
      }
    }

    Ok(report)
  }

  async fn product_name(&self, id: i32) -> Result<String> {
    let product: Option<product::Model> =
      sv::Product::new(self.db).by_id(id).await?;
    Ok(product.map(|p| p.name).unwrap_or_else(|| format!("#{id}")))
  }

  /// The step is already claimed, a lost counter update must not undo it.
  async fn record_failures(&self, id: i32, failures: usize) {
    if let Err(err) =
      sv::Subscription::new(self.db).record_failures(id, failures).await
    {
      error!(
        "Failed to record delivery failures for subscription #{id}: {err}"
      );
    }
  }

  async fn remind(
    &self,
    sub: &subscription::Model,
    user: Option<user::Model>,
    now: DateTime,
  ) -> Result<bool> {
    let subscriptions = sv::Subscription::new(self.db);
    if !subscriptions.claim_reminder(sub.id).await? {
      return Ok(false);
    }

    let user = user.ok_or(Error::UserNotFound)?;
    let name = html::escape(&self.product_name(sub.product_id).await?);
    let text = format!(
      "⏳ <b>Subscription ending soon</b>\n\n\
      Your access to <b>{name}</b> for <code>{}</code> ends on {} \
      (in {}).\n\
      Renew from the /catalog to keep it.",
      html::escape(&sub.tradingview_username),
      utils::format_date(sub.end_date),
      utils::format_duration(sub.end_date - now),
    );

    if let Err(err) = self.notifier.send(user.telegram_id, &text).await {
      warn!("Reminder to {} failed: {err}", user.telegram_id);
      self.record_failures(sub.id, 1).await;
    }

    info!("Subscription #{} reminded of expiry", sub.id);
    Ok(true)
  }

  async fn expire(
    &self,
    sub: &subscription::Model,
    user: Option<user::Model>,
  ) -> Result<bool> {
    let subscriptions = sv::Subscription::new(self.db);
    if !subscriptions.claim_expiry(sub.id).await? {
      return Ok(false);
    }

    let user = user.ok_or(Error::UserNotFound)?;
    let name = html::escape(&self.product_name(sub.product_id).await?);
    let tradingview = html::escape(&sub.tradingview_username);
    let mut failures = 0;

    let text = format!(
      "⌛ <b>Subscription expired</b>\n\n\
      Your access to <b>{name}</b> for <code>{tradingview}</code> has ended.\n\
      Buy it again from the /catalog any time."
    );
    if let Err(err) = self.notifier.send(user.telegram_id, &text).await {
      warn!("Expiry notice to {} failed: {err}", user.telegram_id);
      failures += 1;
    }

    let alert = format!(
      "🔒 <b>Subscription expired</b>\n\n\
      <b>Product:</b> {name}\n\
      <b>Buyer:</b> <code>{}</code>\n\
      <b>TradingView:</b> <code>{tradingview}</code>\n\
      Revoke the access.",
      user.telegram_id
    );
    failures += notify::broadcast(self.notifier, self.operators, &alert).await;
    self.record_failures(sub.id, failures).await;

    info!("Subscription #{} expired", sub.id);
    Ok(true)
  }
}
