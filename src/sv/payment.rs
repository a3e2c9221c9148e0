//! Payment reconciliation: turns an at-least-once `invoice_paid`
//! notification into exactly one paid purchase and one subscription.

use teloxide::utils::html;

use crate::{
  crypto_pay::{self, Correlation, PaidInvoice, PaymentProvider, Update},
  entity::{PurchaseStatus, product, purchase, subscription},
  notify::{self, Notifier},
  prelude::*,
  sv::{self, subscription::Grant},
};

/// Successful outcomes of a delivery. All of them stop provider retries.
#[derive(Debug, Clone, PartialEq)]
pub enum Ack {
  /// First delivery: the purchase is paid and the entitlement exists now.
  Granted(subscription::Model),
  /// Replay of a notification that was already applied.
  AlreadyProcessed,
  /// Update kinds other than `invoice_paid`.
  Ignored,
}

impl Ack {
  pub fn as_str(&self) -> &'static str {
    match self {
      Ack::Granted(_) => "granted",
      Ack::AlreadyProcessed => "already_processed",
      Ack::Ignored => "ignored",
    }
  }
}

enum Candidate {
  Pending(purchase::Model),
  Settled,
}

pub struct Payment<'a> {
  db: &'a DatabaseConnection,
  provider: &'a dyn PaymentProvider,
  notifier: &'a dyn Notifier,
  operators: &'a [i64],
}

impl<'a> Payment<'a> {
  pub fn new(
    db: &'a DatabaseConnection,
    provider: &'a dyn PaymentProvider,
    notifier: &'a dyn Notifier,
    operators: &'a [i64],
  ) -> Self {
    Self { db, provider, notifier, operators }
  }

  pub async fn reconcile(
    &self,
    body: &[u8],
    signature: Option<&str>,
    now: DateTime,
  ) -> Result<Ack> {
    let Some(signature) = signature.filter(|s| !s.is_empty()) else {
      warn!("Payment notification without signature rejected");
      return Err(Error::Auth);
    };
    if !self.provider.verify(body, signature) {
      warn!("Payment notification with invalid signature rejected");
      return Err(Error::Auth);
    }

    match self.apply(body, now).await {
      Err(Error::Data(err)) => {
        error!("Unreconcilable payment notification: {err}");
        let alert = format!(
          "🚨 <b>Payment needs manual reconciliation</b>\n\n\
          {}\n\n<code>{}</code>",
          html::escape(&err.to_string()),
          html::escape(&String::from_utf8_lossy(body)),
        );
        notify::broadcast(self.notifier, self.operators, &alert).await;
        Err(Error::Data(err))
      }
      other => other,
    }
  }

  async fn apply(&self, body: &[u8], now: DateTime) -> Result<Ack> {
    let update: Update = json::from_slice(body).map_err(DataError::from)?;

    if update.update_type != crypto_pay::INVOICE_PAID {
      debug!(
        "Ignoring update {} of type `{}`",
        update.update_id, update.update_type
      );
      return Ok(Ack::Ignored);
    }

    let requested_at = update.request_date.unwrap_or_default();
    let invoice: PaidInvoice =
      json::from_value(update.payload).map_err(DataError::from)?;
    let correlation = invoice.correlation()?;

    debug!(
      "Invoice {} {} at {requested_at} (amount {:?}): {correlation:?}",
      invoice.invoice_id, invoice.status, invoice.amount
    );

    let user = sv::User::new(self.db)
      .by_id(correlation.user_id)
      .await?
      .ok_or(DataError::UnknownUser(correlation.user_id))?;
    let product = sv::Product::new(self.db)
      .by_id(correlation.product_id)
      .await?
      .ok_or(DataError::UnknownProduct(correlation.product_id))?;

    let purchase =
      match self.candidate(&correlation, invoice.invoice_id).await? {
        Candidate::Pending(purchase) => purchase,
        Candidate::Settled => {
          info!("Invoice {} already processed", invoice.invoice_id);
          return Ok(Ack::AlreadyProcessed);
        }
      };

    let grant = Grant {
      user_id: user.id,
      product_id: product.id,
      purchase_id: purchase.id,
      tradingview_username: correlation.tradingview_username.clone(),
      duration_days: product.duration_days,
    };
    grant.end_date(now)?;

    let txn = self.db.begin().await?;
    if !sv::Purchase::mark_paid(&txn, purchase.id, now).await? {
      txn.rollback().await?;
      info!(
        "Purchase #{} was settled by a concurrent delivery",
        purchase.id
      );
      return Ok(Ack::AlreadyProcessed);
    }
    let subscription = sv::Subscription::insert(&txn, grant, now).await?;
    txn.commit().await?;

    info!(
      "Purchase #{} paid, subscription #{} for `{}` until {}",
      purchase.id,
      subscription.id,
      subscription.tradingview_username,
      subscription.end_date
    );

    self.announce(&subscription, &product, user.telegram_id, &purchase).await;

    Ok(Ack::Granted(subscription))
  }

  /// Finds the purchase a notification settles, strongest key first:
  /// the purchase id we issued, the provider's invoice id, then the most
  /// recent pending purchase of the same product by the same user.
  async fn candidate(
    &self,
    correlation: &Correlation,
    invoice_id: i64,
  ) -> Result<Candidate> {
    let purchases = sv::Purchase::new(self.db);

    let direct = match correlation.purchase_id {
      Some(id) => Some(
        purchases
          .by_id(id)
          .await?
          .ok_or(DataError::UnknownPurchase(invoice_id))?,
      ),
      None => purchases.by_invoice(invoice_id).await?,
    };

    if let Some(purchase) = direct {
      if purchase.user_id != correlation.user_id
        || purchase.product_id != correlation.product_id
      {
        return Err(DataError::Mismatch(purchase.id).into());
      }
      return Ok(match purchase.status {
        PurchaseStatus::Pending => Candidate::Pending(purchase),
        PurchaseStatus::Paid => Candidate::Settled,
      });
    }

    warn!(
      "Invoice {invoice_id} has no purchase reference, \
       falling back to the latest pending purchase"
    );

    if let Some(purchase) = purchases
      .latest_pending(correlation.user_id, correlation.product_id)
      .await?
    {
      return Ok(Candidate::Pending(purchase));
    }

    if purchases.has_paid(correlation.user_id, correlation.product_id).await? {
      Ok(Candidate::Settled)
    } else {
      Err(DataError::UnknownPurchase(invoice_id).into())
    }
  }

  /// Best-effort confirmations after the grant is committed.
  async fn announce(
    &self,
    subscription: &subscription::Model,
    product: &product::Model,
    buyer: i64,
    purchase: &purchase::Model,
  ) {
    let mut failures = 0;
    let name = html::escape(&product.name);

    let confirmation = format!(
      "✅ <b>Payment received!</b>\n\n\
      <b>{name}</b> is activated for TradingView user \
      <code>{}</code> until {}.\n\
      Access is usually shared within a few hours.",
      html::escape(&subscription.tradingview_username),
      utils::format_date(subscription.end_date),
    );
    if let Err(err) = self.notifier.send(buyer, &confirmation).await {
      warn!("Payment confirmation to {buyer} failed: {err}");
      failures += 1;
    }

    if let Some(file) = &product.file_ref {
      let caption = format!("📎 {name}");
      if let Err(err) =
        self.notifier.send_document(buyer, file, &caption).await
      {
        warn!("Deliverable for purchase #{} failed: {err}", purchase.id);
        failures += 1;
      }
    }

    let alert = format!(
      "💰 <b>New subscription</b>\n\n\
      <b>Product:</b> {name}\n\
      <b>Amount:</b> {}\n\
      <b>Buyer:</b> <code>{buyer}</code>\n\
      <b>TradingView:</b> <code>{}</code>\n\
      <b>Script:</b> {}\n\
      <b>Until:</b> {}",
      crypto_pay::format_amount(purchase.amount),
      html::escape(&subscription.tradingview_username),
      html::escape(product.tradingview_script.as_deref().unwrap_or("-")),
      utils::format_date(subscription.end_date),
    );
    failures += notify::broadcast(self.notifier, self.operators, &alert).await;

    if let Err(err) = sv::Subscription::new(self.db)
      .record_failures(subscription.id, failures)
      .await
    {
      error!(
        "Failed to record delivery failures for subscription #{}: {err}",
        subscription.id
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    entity::{SubscriptionStatus, user},
    sv::{
      invoice::{Buyer, IssuedInvoice},
      testing::*,
    },
  };

  struct Fixture {
    db: DatabaseConnection,
    provider: FakeProvider,
    notifier: RecordingNotifier,
    operators: Vec<i64>,
  }

  impl Fixture {
    async fn new() -> Self {
      Self::with_notifier(RecordingNotifier::new()).await
    }

    async fn with_notifier(notifier: RecordingNotifier) -> Self {
      Self {
        db: setup_test_db().await,
        provider: FakeProvider::new(),
        notifier,
        operators: vec![OPERATOR],
      }
    }

    fn payments(&self) -> Payment<'_> {
      Payment::new(&self.db, &self.provider, &self.notifier, &self.operators)
    }

    async fn issue(&self, product_id: i32, buyer: i64) -> IssuedInvoice {
      sv::Invoice::new(&self.db, &self.provider)
        .issue(product_id, &Buyer::new(buyer), "trader_joe")
        .await
        .unwrap()
    }

    /// Body that echoes the payload sent with the last created invoice.
    fn paid_body(&self, invoice_id: i64) -> Vec<u8> {
      let request = self
        .provider
        .requests()
        .into_iter()
        .last()
        .expect("no invoice was issued");
      let payload = json::to_string(&request.correlation).unwrap();
      paid_update(invoice_id, Some(&payload))
    }

    async fn deliver(&self, body: &[u8], now: DateTime) -> Result<Ack> {
      let signature = self.provider.sign(body);
      self.payments().reconcile(body, Some(&signature), now).await
    }

    async fn subscriptions(&self) -> u64 {
      subscription::Entity::find().count(&self.db).await.unwrap()
    }

    async fn paid(&self) -> u64 {
      purchase::Entity::find()
        .filter(purchase::Column::Status.eq(PurchaseStatus::Paid))
        .count(&self.db)
        .await
        .unwrap()
    }
  }

  #[tokio::test]
  async fn test_paid_notification_grants_subscription() {
    let fx = Fixture::new().await;
    let product = seed_product(&fx.db, 10, 30).await;
    let issued = fx.issue(product.id, 777).await;
    let now = Utc::now().naive_utc();

    let ack = fx.deliver(&fx.paid_body(issued.invoice_id), now).await.unwrap();

    let Ack::Granted(subscription) = ack else {
      panic!("expected a grant, got {ack:?}");
    };
    let purchase = sv::Purchase::new(&fx.db)
      .by_id(issued.purchase_id)
      .await
      .unwrap()
      .unwrap();

    assert_eq!(purchase.status, PurchaseStatus::Paid);
    assert_eq!(purchase.paid_at, Some(now));
    assert_eq!(subscription.purchase_id, purchase.id);
    assert_eq!(subscription.start_date, now);
    assert_eq!(subscription.end_date, now + TimeDelta::days(30));
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert_eq!(subscription.tradingview_username, "trader_joe");
    assert!(!subscription.notified_expiring_soon);
    assert!(!subscription.notified_expired);

    assert_eq!(fx.notifier.sent_to(777), 1);
    assert_eq!(fx.notifier.sent_to(OPERATOR), 1);
  }

  #[tokio::test]
  async fn test_duplicate_deliveries_grant_once() {
    let fx = Fixture::new().await;
    let product = seed_product(&fx.db, 10, 30).await;
    let issued = fx.issue(product.id, 777).await;
    let body = fx.paid_body(issued.invoice_id);
    let now = Utc::now().naive_utc();

    let mut granted = 0;
    for _ in 0..5 {
      match fx.deliver(&body, now).await.unwrap() {
        Ack::Granted(_) => granted += 1,
        Ack::AlreadyProcessed => {}
        Ack::Ignored => panic!("paid update ignored"),
      }
    }

    assert_eq!(granted, 1);
    assert_eq!(fx.paid().await, 1);
    assert_eq!(fx.subscriptions().await, 1);
    assert_eq!(fx.notifier.sent_to(777), 1);
  }

  #[tokio::test]
  async fn test_concurrent_deliveries_race() {
    let fx = Fixture::new().await;
    let product = seed_product(&fx.db, 10, 30).await;
    let issued = fx.issue(product.id, 777).await;
    let body = fx.paid_body(issued.invoice_id);
    let now = Utc::now().naive_utc();

    let (a, b) = tokio::join!(fx.deliver(&body, now), fx.deliver(&body, now));
    let mut acks = [a.unwrap(), b.unwrap()];
    acks.sort_by_key(|ack| ack.as_str());

    assert!(matches!(acks[0], Ack::AlreadyProcessed));
    assert!(matches!(acks[1], Ack::Granted(_)));
    assert_eq!(fx.paid().await, 1);
    assert_eq!(fx.subscriptions().await, 1);
  }

  #[tokio::test]
  async fn test_invalid_signature_changes_nothing() {
    let fx = Fixture::new().await;
    let product = seed_product(&fx.db, 10, 30).await;
    let issued = fx.issue(product.id, 777).await;
    let body = fx.paid_body(issued.invoice_id);
    let now = Utc::now().naive_utc();

    let forged = crate::crypto_pay::Signer::from_token("forged").sign(&body);
    let payments = fx.payments();

    for signature in [None, Some(""), Some("deadbeef"), Some(forged.as_str())] {
      let result = payments.reconcile(&body, signature, now).await;
      assert!(matches!(result, Err(Error::Auth)));
    }

    assert_eq!(fx.paid().await, 0);
    assert_eq!(fx.subscriptions().await, 0);
    assert!(fx.notifier.sent().is_empty());
  }

  #[tokio::test]
  async fn test_other_update_types_are_ignored() {
    let fx = Fixture::new().await;
    let body = br#"{"update_id":5,"update_type":"invoice_expired","payload":{}}"#;

    let ack = fx.deliver(body, Utc::now().naive_utc()).await.unwrap();

    assert_eq!(ack, Ack::Ignored);
  }

  #[tokio::test]
  async fn test_update_without_payload_is_ignored() {
    let fx = Fixture::new().await;
    let body = br#"{"update_id":5,"update_type":"invoice_expired"}"#;

    let ack = fx.deliver(body, Utc::now().naive_utc()).await.unwrap();

    assert_eq!(ack, Ack::Ignored);
    assert!(fx.notifier.sent().is_empty());
  }

  #[tokio::test]
  async fn test_duration_out_of_range_alerts_operator() {
    let fx = Fixture::new().await;
    let product = product::ActiveModel {
      name: Set("Forever".into()),
      price: Set(10),
      duration_days: Set(100_000_000),
      is_active: Set(true),
      created_at: Set(Utc::now().naive_utc()),
      ..Default::default()
    }
    .insert(&fx.db)
    .await
    .unwrap();
    let issued = fx.issue(product.id, 777).await;

    let body = fx.paid_body(issued.invoice_id);
    let result = fx.deliver(&body, Utc::now().naive_utc()).await;

    assert!(matches!(
      result,
      Err(Error::Data(DataError::Duration(id))) if id == product.id
    ));
    assert_eq!(fx.paid().await, 0);
    assert_eq!(fx.subscriptions().await, 0);
    assert_eq!(fx.notifier.sent_to(OPERATOR), 1);

    // the purchase stays pending, a later delivery is still reconcilable
    let purchase = sv::Purchase::new(&fx.db)
      .by_id(issued.purchase_id)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Pending);
  }

  #[tokio::test]
  async fn test_missing_payload_alerts_operator() {
    let fx = Fixture::new().await;
    let product = seed_product(&fx.db, 10, 30).await;
    fx.issue(product.id, 777).await;

    let body = paid_update(100, None);
    let result = fx.deliver(&body, Utc::now().naive_utc()).await;

    assert!(matches!(result, Err(Error::Data(DataError::MissingPayload(100)))));
    assert_eq!(fx.paid().await, 0);
    assert_eq!(fx.notifier.sent_to(OPERATOR), 1);
  }

  #[tokio::test]
  async fn test_unknown_references_are_data_errors() {
    let fx = Fixture::new().await;
    let product = seed_product(&fx.db, 10, 30).await;
    let now = Utc::now().naive_utc();

    let unknown_user = r#"{"product_id":1,"user_id":99,"telegram_id":5,"tradingview_username":"abc"}"#;
    let result = fx.deliver(&paid_update(1, Some(unknown_user)), now).await;
    assert!(matches!(result, Err(Error::Data(DataError::UnknownUser(99)))));

    let user = sv::User::new(&fx.db).get_or_create(5).await.unwrap();
    let no_purchase = format!(
      r#"{{"product_id":{},"user_id":{},"telegram_id":5,"tradingview_username":"abc"}}"#,
      product.id, user.id
    );
    let result = fx.deliver(&paid_update(2, Some(&no_purchase)), now).await;
    assert!(matches!(result, Err(Error::Data(DataError::UnknownPurchase(2)))));

    let dangling = format!(
      r#"{{"product_id":{},"user_id":{},"telegram_id":5,"tradingview_username":"abc","purchase_id":4242}}"#,
      product.id, user.id
    );
    let result = fx.deliver(&paid_update(3, Some(&dangling)), now).await;
    assert!(matches!(result, Err(Error::Data(DataError::UnknownPurchase(3)))));
    assert_eq!(fx.paid().await, 0);
  }

  #[tokio::test]
  async fn test_purchase_of_someone_else_is_rejected() {
    let fx = Fixture::new().await;
    let product = seed_product(&fx.db, 10, 30).await;
    let issued = fx.issue(product.id, 777).await;
    let other = sv::User::new(&fx.db).get_or_create(888).await.unwrap();

    let payload = format!(
      r#"{{"product_id":{},"user_id":{},"telegram_id":888,"tradingview_username":"abc","purchase_id":{}}}"#,
      product.id, other.id, issued.purchase_id
    );
    let body = paid_update(issued.invoice_id, Some(&payload));
    let result = fx.deliver(&body, Utc::now().naive_utc()).await;

    assert!(matches!(result, Err(Error::Data(DataError::Mismatch(_)))));
    assert_eq!(fx.paid().await, 0);
  }

  #[tokio::test]
  async fn test_legacy_payload_settles_latest_pending() {
    let fx = Fixture::new().await;
    let product = seed_product(&fx.db, 10, 30).await;
    let user = sv::User::new(&fx.db).get_or_create(777).await.unwrap();
    let purchases = sv::Purchase::new(&fx.db);
    let older = purchases.create_pending(user.id, product.id, 10).await.unwrap();
    let newer = purchases.create_pending(user.id, product.id, 10).await.unwrap();

    let payload = format!(
      r#"{{"product_id":{},"user_id":{},"telegram_id":777,"tradingview_username":"legacy"}}"#,
      product.id, user.id
    );
    let body = paid_update(5000, Some(&payload));
    let now = Utc::now().naive_utc();

    let Ack::Granted(subscription) = fx.deliver(&body, now).await.unwrap() else {
      panic!("expected a grant");
    };
    assert_eq!(subscription.purchase_id, newer.id);

    let older = purchases.by_id(older.id).await.unwrap().unwrap();
    assert_eq!(older.status, PurchaseStatus::Pending);
  }

  #[tokio::test]
  async fn test_delivery_failure_keeps_entitlement() {
    let fx = Fixture::with_notifier(RecordingNotifier::failing()).await;
    let product = seed_product(&fx.db, 10, 30).await;
    sv::Product::new(&fx.db).set_file(product.id, "BQACAgIAAxkBAAI").await.unwrap();
    let issued = fx.issue(product.id, 777).await;

    let ack = fx
      .deliver(&fx.paid_body(issued.invoice_id), Utc::now().naive_utc())
      .await
      .unwrap();

    let Ack::Granted(subscription) = ack else {
      panic!("expected a grant");
    };
    let stored = sv::Subscription::new(&fx.db)
      .by_id(subscription.id)
      .await
      .unwrap()
      .unwrap();

    assert_eq!(stored.status, SubscriptionStatus::Active);
    // confirmation, document, operator alert
    assert_eq!(stored.notify_failures, 3);
    assert_eq!(fx.paid().await, 1);
  }

  #[tokio::test]
  async fn test_renewal_creates_new_subscription() {
    let fx = Fixture::new().await;
    let product = seed_product(&fx.db, 10, 30).await;
    let now = Utc::now().naive_utc();

    let first = fx.issue(product.id, 777).await;
    fx.deliver(&fx.paid_body(first.invoice_id), now).await.unwrap();
    let second = fx.issue(product.id, 777).await;
    fx.deliver(&fx.paid_body(second.invoice_id), now).await.unwrap();

    let user = user::Entity::find()
      .filter(user::Column::TelegramId.eq(777))
      .one(&fx.db)
      .await
      .unwrap()
      .unwrap();
    let subscriptions =
      sv::Subscription::new(&fx.db).by_user(user.id).await.unwrap();

    assert_eq!(subscriptions.len(), 2);
    assert_eq!(fx.paid().await, 2);
  }
}
