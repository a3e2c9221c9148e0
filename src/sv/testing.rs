use std::sync::{
  Mutex,
  atomic::{AtomicBool, AtomicI64, Ordering},
};

use migration::Migrator;

use crate::{
  crypto_pay::{Invoice, InvoiceRequest, PaymentProvider, Signer},
  entity::product,
  notify::Notifier,
  prelude::*,
  sv::product::NewProduct,
};

pub const TOKEN: &str = "4242:test-token";
pub const OPERATOR: i64 = 1;

pub async fn setup_test_db() -> DatabaseConnection {
  let db = Database::connect("sqlite::memory:").await.unwrap();
  Migrator::up(&db, None).await.unwrap();
  db
}

pub async fn seed_product(
  db: &DatabaseConnection,
  price: i64,
  duration_days: i32,
) -> product::Model {
  crate::sv::Product::new(db)
    .create(NewProduct {
      name: "Test Indicator".into(),
      description: None,
      price,
      duration_days,
      tradingview_script: Some("PUB;test".into()),
    })
    .await
    .unwrap()
}

/// Records every message instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
  sent: Mutex<Vec<(i64, String)>>,
  failing: AtomicBool,
}

impl RecordingNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn failing() -> Self {
    let notifier = Self::default();
    notifier.failing.store(true, Ordering::SeqCst);
    notifier
  }

  pub fn sent(&self) -> Vec<(i64, String)> {
    self.sent.lock().unwrap().clone()
  }

  pub fn sent_to(&self, recipient: i64) -> usize {
    self.sent().iter().filter(|(to, _)| *to == recipient).count()
  }

  fn record(&self, recipient: i64, text: &str) -> Result<()> {
    self.sent.lock().unwrap().push((recipient, text.to_string()));
    if self.failing.load(Ordering::SeqCst) {
      return Err(Error::Notify("chat not found".into()));
    }
    Ok(())
  }
}

#[async_trait]
impl Notifier for RecordingNotifier {
  async fn send(&self, recipient: i64, text: &str) -> Result<()> {
    self.record(recipient, text)
  }

  async fn send_document(
    &self,
    recipient: i64,
    file: &str,
    caption: &str,
  ) -> Result<()> {
    self.record(recipient, &format!("[{file}] {caption}"))
  }
}

/// Payment provider that signs like Crypto Pay but never leaves the process.
pub struct FakeProvider {
  signer: Signer,
  next_invoice: AtomicI64,
  requests: Mutex<Vec<InvoiceRequest>>,
  failing: bool,
}

impl FakeProvider {
  pub fn new() -> Self {
    Self {
      signer: Signer::from_token(TOKEN),
      next_invoice: AtomicI64::new(100),
      requests: Mutex::new(Vec::new()),
      failing: false,
    }
  }

  pub fn failing() -> Self {
    Self { failing: true, ..Self::new() }
  }

  pub fn requests(&self) -> Vec<InvoiceRequest> {
    self.requests.lock().unwrap().clone()
  }

  pub fn sign(&self, body: &[u8]) -> String {
    self.signer.sign(body)
  }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
  async fn create_invoice(&self, req: &InvoiceRequest) -> Result<Invoice> {
    if self.failing {
      return Err(Error::Provider("timed out".into()));
    }

    self.requests.lock().unwrap().push(req.clone());
    let invoice_id = self.next_invoice.fetch_add(1, Ordering::SeqCst);
    Ok(Invoice {
      invoice_id,
      pay_url: format!("https://t.me/CryptoBot?start=IV{invoice_id}"),
    })
  }

  fn verify(&self, body: &[u8], signature: &str) -> bool {
    self.signer.verify(body, signature)
  }
}

/// `invoice_paid` webhook body as Crypto Pay sends it.
pub fn paid_update(invoice_id: i64, payload: Option<&str>) -> Vec<u8> {
  json::json!({
    "update_id": invoice_id * 10,
    "update_type": "invoice_paid",
    "request_date": "2026-01-20T10:00:00.000Z",
    "payload": {
      "invoice_id": invoice_id,
      "status": "paid",
      "amount": "10.00",
      "payload": payload,
    }
  })
  .to_string()
  .into_bytes()
}
