//! Crypto Pay (@CryptoBot) integration: invoice creation and webhook
//! authentication.
//!
//! Webhooks are signed with `HMAC-SHA256(SHA-256(api_token), body)` and the
//! hex digest is sent in the `crypto-pay-api-signature` header.

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::prelude::*;

pub const SIGNATURE_HEADER: &str = "crypto-pay-api-signature";
pub const INVOICE_PAID: &str = "invoice_paid";

type HmacSha256 = Hmac<Sha256>;

/// Application data echoed back verbatim on settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
  pub product_id: i32,
  pub user_id: i32,
  pub telegram_id: i64,
  pub tradingview_username: String,
  /// Absent in payloads issued before purchases were referenced directly
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub purchase_id: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct InvoiceRequest {
  /// Minor units of the configured fiat currency
  pub amount: i64,
  pub description: String,
  pub correlation: Correlation,
}

#[derive(Debug, Clone)]
pub struct Invoice {
  pub invoice_id: i64,
  pub pay_url: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
  async fn create_invoice(&self, req: &InvoiceRequest) -> Result<Invoice>;

  /// Checks `signature` against the exact bytes received.
  fn verify(&self, body: &[u8], signature: &str) -> bool;
}

/// Webhook envelope.
#[derive(Debug, Deserialize)]
pub struct Update {
  pub update_id: i64,
  pub update_type: String,
  #[serde(default)]
  pub request_date: Option<String>,
  #[serde(default)]
  pub payload: json::Value,
}

/// Invoice object carried by `invoice_paid` updates.
#[derive(Debug, Deserialize)]
pub struct PaidInvoice {
  pub invoice_id: i64,
  pub status: String,
  #[serde(default)]
  pub amount: Option<String>,
  #[serde(default)]
  pub payload: Option<String>,
}

impl PaidInvoice {
  pub fn correlation(&self) -> Result<Correlation, DataError> {
    let payload = self
      .payload
      .as_deref()
      .filter(|p| !p.trim().is_empty())
      .ok_or(DataError::MissingPayload(self.invoice_id))?;
    Ok(json::from_str(payload)?)
  }
}

#[derive(Clone)]
pub struct Signer {
  key: [u8; 32],
}

impl Signer {
  pub fn from_token(token: &str) -> Self {
    Self { key: Sha256::digest(token.as_bytes()).into() }
  }

  fn mac(&self, body: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(&self.key)
      .expect("HMAC can take key of any size");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
  }

  pub fn sign(&self, body: &[u8]) -> String {
    hex::encode(self.mac(body))
  }

  pub fn verify(&self, body: &[u8], signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
      return false;
    };
    self.mac(body).ct_eq(&provided).into()
  }
}

#[derive(Debug, Clone)]
pub struct Settings {
  pub base_url: String,
  pub fiat: String,
  pub accepted_assets: String,
  pub paid_button_url: Option<String>,
  pub timeout: Duration,
}

pub struct CryptoPay {
  client: Client,
  token: String,
  signer: Signer,
  settings: Settings,
}

#[derive(Debug, Serialize)]
struct CreateInvoice<'a> {
  currency_type: &'static str,
  fiat: &'a str,
  accepted_assets: &'a str,
  amount: String,
  description: &'a str,
  payload: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  paid_btn_name: Option<&'static str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  paid_btn_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
  ok: bool,
  result: Option<T>,
  error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
  code: i64,
  name: String,
}

#[derive(Debug, Deserialize)]
struct CreatedInvoice {
  invoice_id: i64,
  #[serde(default)]
  bot_invoice_url: Option<String>,
  #[serde(default)]
  pay_url: Option<String>,
}

/// `12345` kopecks -> `"123.45"`
pub fn format_amount(minor: i64) -> String {
  let sign = if minor < 0 { "-" } else { "" };
  let minor = minor.unsigned_abs();
  format!("{sign}{}.{:02}", minor / 100, minor % 100)
}

impl CryptoPay {
  pub fn new(token: String, settings: Settings) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(settings.timeout)
      .build()
      .context("Failed to build Crypto Pay HTTP client")?;

    Ok(Self { client, signer: Signer::from_token(&token), token, settings })
  }
}

#[async_trait]
impl PaymentProvider for CryptoPay {
  async fn create_invoice(&self, req: &InvoiceRequest) -> Result<Invoice> {
    let payload = json::to_string(&req.correlation)
      .map_err(|e| Error::Internal(e.to_string()))?;

    let body = CreateInvoice {
      currency_type: "fiat",
      fiat: &self.settings.fiat,
      accepted_assets: &self.settings.accepted_assets,
      amount: format_amount(req.amount),
      description: &req.description,
      payload,
      paid_btn_name: self.settings.paid_button_url.as_ref().map(|_| "callback"),
      paid_btn_url: self.settings.paid_button_url.as_deref(),
    };

    let url = format!("{}/createInvoice", self.settings.base_url);
    let response: ApiResponse<CreatedInvoice> = self
      .client
      .post(&url)
      .header("Crypto-Pay-API-Token", &self.token)
      .json(&body)
      .send()
      .await
      .map_err(|e| Error::Provider(e.to_string()))?
      .json()
      .await
      .map_err(|e| Error::Provider(e.to_string()))?;

    match response {
      ApiResponse { ok: true, result: Some(created), .. } => {
        let pay_url = created
          .bot_invoice_url
          .or(created.pay_url)
          .ok_or_else(|| Error::Provider("invoice has no pay url".into()))?;
        Ok(Invoice { invoice_id: created.invoice_id, pay_url })
      }
      ApiResponse { error: Some(err), .. } => {
        Err(Error::Provider(format!("{} ({})", err.name, err.code)))
      }
      _ => Err(Error::Provider("unexpected response".into())),
    }
  }

  fn verify(&self, body: &[u8], signature: &str) -> bool {
    self.signer.verify(body, signature)
  }
}
