use serde::Serialize;

use crate::{
  crypto_pay::{Correlation, InvoiceRequest, PaymentProvider},
  prelude::*,
  sv::{self, user::Profile},
};

const TRADINGVIEW_MIN_LEN: usize = 3;
const TRADINGVIEW_MAX_LEN: usize = 64;

/// The buyer as identified by the messaging platform.
#[derive(Debug, Clone, Default)]
pub struct Buyer {
  pub telegram_id: i64,
  pub profile: Option<Profile>,
}

impl Buyer {
  pub fn new(telegram_id: i64) -> Self {
    Self { telegram_id, profile: None }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedInvoice {
  pub purchase_id: i32,
  pub invoice_id: i64,
  pub pay_url: String,
}

pub fn validate_tradingview(username: &str) -> Result<&str> {
  let username = username.trim().trim_start_matches('@');

  if username.len() < TRADINGVIEW_MIN_LEN {
    return Err(Error::Validation(format!(
      "TradingView username must be at least {TRADINGVIEW_MIN_LEN} characters"
    )));
  }
  if username.len() > TRADINGVIEW_MAX_LEN {
    return Err(Error::Validation("TradingView username is too long".into()));
  }
  if !username
    .chars()
    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
  {
    return Err(Error::Validation(
      "TradingView username may contain only letters, digits, '_', '-' and '.'"
        .into(),
    ));
  }

  Ok(username)
}

pub struct Invoice<'a> {
  db: &'a DatabaseConnection,
  provider: &'a dyn PaymentProvider,
}

impl<'a> Invoice<'a> {
  pub fn new(
    db: &'a DatabaseConnection,
    provider: &'a dyn PaymentProvider,
  ) -> Self {
    Self { db, provider }
  }

  /// Records a pending purchase and opens the matching external invoice.
  ///
  /// The purchase only survives when the provider accepted the invoice, so
  /// every pending row has a pay link and every pay link has a row.
  pub async fn issue(
    &self,
    product_id: i32,
    buyer: &Buyer,
    tradingview_username: &str,
  ) -> Result<IssuedInvoice> {
    let tradingview = validate_tradingview(tradingview_username)?;

    let product = sv::Product::new(self.db)
      .by_id(product_id)
      .await?
      .filter(|p| p.is_active)
      .ok_or(Error::ProductNotFound)?;

    let users = sv::User::new(self.db);
    let user = users.get_or_create(buyer.telegram_id).await?;
    if let Some(profile) = &buyer.profile {
      users.set_profile(buyer.telegram_id, profile).await?;
    }
    users.set_tradingview(user.id, tradingview).await?;

    let purchases = sv::Purchase::new(self.db);
    let purchase =
      purchases.create_pending(user.id, product.id, product.price).await?;

    let request = InvoiceRequest {
      amount: product.price,
      description: product.name.clone(),
      correlation: Correlation {
        product_id: product.id,
        user_id: user.id,
        telegram_id: buyer.telegram_id,
        tradingview_username: tradingview.to_string(),
        purchase_id: Some(purchase.id),
      },
    };

    let invoice = match self.provider.create_invoice(&request).await {
      Ok(invoice) => invoice,
      Err(err) => {
        warn!(
          "Invoice for purchase #{} failed, discarding it: {err}",
          purchase.id
        );
        if let Err(discard) = purchases.discard(purchase.id).await {
          error!("Failed to discard purchase #{}: {discard}", purchase.id);
        }
        return Err(err);
      }
    };

    purchases
      .attach_invoice(purchase.id, invoice.invoice_id, &invoice.pay_url)
      .await?;

    info!(
      "Invoice {} issued: purchase #{} of `{}` for {}",
      invoice.invoice_id, purchase.id, product.name, buyer.telegram_id
    );

    Ok(IssuedInvoice {
      purchase_id: purchase.id,
      invoice_id: invoice.invoice_id,
      pay_url: invoice.pay_url,
    })
  }
}
