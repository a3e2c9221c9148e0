use axum::{
  Json,
  body::Bytes,
  extract::State,
  http::{HeaderMap, StatusCode},
};
use serde::Serialize;

use crate::{
  crypto_pay::SIGNATURE_HEADER, entity::product, prelude::*, state::AppState,
};

pub async fn health() -> &'static str {
  "OK"
}

pub async fn api_health() -> Json<json::Value> {
  Json(json::json!({ "status": "OK", "message": "Server is running" }))
}

pub async fn products(
  State(app): State<Arc<AppState>>,
) -> Result<Json<Vec<product::Model>>> {
  Ok(Json(app.sv().product.active().await?))
}

#[derive(Debug, Serialize)]
pub struct WebhookRes {
  pub ok: bool,
  pub result: &'static str,
}

/// Crypto Pay retries every non-2xx answer, so only authentication and
/// data errors are reported as failures.
pub async fn crypto_pay_webhook(
  State(app): State<Arc<AppState>>,
  headers: HeaderMap,
  body: Bytes,
) -> Result<(StatusCode, Json<WebhookRes>)> {
  let signature =
    headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());

  let ack = app
    .sv()
    .payment
    .reconcile(&body, signature, Utc::now().naive_utc())
    .await?;

  Ok((StatusCode::OK, Json(WebhookRes { ok: true, result: ack.as_str() })))
}

#[cfg(test)]
mod tests {
  use axum::{
    body::{Body, to_bytes},
    http::Request,
  };
  use teloxide::Bot;
  use tower::ServiceExt;

  use super::*;
  use crate::{
    crypto_pay::{self, Correlation},
    plugins::server::router,
    state::Config,
    sv::{invoice::Buyer, testing::*},
  };

  fn config() -> Config {
    Config {
      db_url: "sqlite::memory:".into(),
      bot_token: "0:test".into(),
      crypto_pay_token: TOKEN.into(),
      crypto_pay: crypto_pay::Settings {
        base_url: "http://localhost".into(),
        fiat: "RUB".into(),
        accepted_assets: "USDT".into(),
        paid_button_url: None,
        timeout: Duration::from_secs(1),
      },
      operators: vec![OPERATOR],
      port: 0,
      sweep_interval: Duration::from_secs(3600),
      sweep_warmup: Duration::from_secs(30),
      expiry_warning: TimeDelta::days(3),
      http_timeout: Duration::from_secs(1),
    }
  }

  async fn app() -> (Arc<AppState>, Arc<FakeProvider>, Arc<RecordingNotifier>) {
    let provider = Arc::new(FakeProvider::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let app = AppState::with_parts(
      setup_test_db().await,
      Bot::new("0:test"),
      config(),
      notifier.clone(),
      provider.clone(),
    );
    (Arc::new(app), provider, notifier)
  }

  async fn call(
    app: &Arc<AppState>,
    request: Request<Body>,
  ) -> (StatusCode, json::Value) {
    let response = router(app.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, json::from_slice(&body).unwrap_or(json::Value::Null))
  }

  fn webhook(body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut request = Request::post("/webhook/crypto-pay")
      .header("content-type", "application/json");
    if let Some(signature) = signature {
      request = request.header(SIGNATURE_HEADER, signature);
    }
    request.body(Body::from(body)).unwrap()
  }

  #[tokio::test]
  async fn test_products_lists_catalog() {
    let (app, ..) = app().await;

    let (status, body) = call(
      &app,
      Request::get("/api/products").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(3));
    assert!(body[0].get("file_ref").is_none());
  }

  #[tokio::test]
  async fn test_invoice_then_webhook() {
    let (app, provider, notifier) = app().await;

    let issued =
      app.sv().invoice.issue(1, &Buyer::new(42), "trader").await.unwrap();

    let correlation: Correlation =
      provider.requests().pop().map(|r| r.correlation).unwrap();
    let invoice_id = issued.invoice_id;
    let body = paid_update(
      invoice_id,
      Some(&json::to_string(&correlation).unwrap()),
    );
    let signature = provider.sign(&body);

    let (status, ack) =
      call(&app, webhook(body.clone(), Some(signature.clone()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["result"], "granted");

    let (status, ack) = call(&app, webhook(body, Some(signature))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["result"], "already_processed");

    assert_eq!(notifier.sent_to(42), 1);
  }

  #[tokio::test]
  async fn test_webhook_rejects_bad_signature() {
    let (app, ..) = app().await;
    let body = paid_update(1, Some("{}"));

    let (status, _) = call(&app, webhook(body.clone(), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) =
      call(&app, webhook(body, Some("00".repeat(32)))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn test_webhook_data_error_is_not_2xx() {
    let (app, provider, notifier) = app().await;
    let body = paid_update(1, None);
    let signature = provider.sign(&body);

    let (status, _) = call(&app, webhook(body, Some(signature))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(notifier.sent_to(OPERATOR), 1);
  }

  #[tokio::test]
  async fn test_invoices_are_not_issued_over_http() {
    let (app, provider, _) = app().await;
    let sv = app.sv();
    let victim = sv.user.get_or_create(42).await.unwrap();
    sv.user.set_tradingview(victim.id, "victim_tv").await.unwrap();

    let request = Request::post("/api/invoices")
      .header("content-type", "application/json")
      .body(Body::from(
        r#"{"product_id":1,"telegram_id":42,"tradingview_username":"attacker"}"#,
      ))
      .unwrap();
    let (status, _) = call(&app, request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(provider.requests().is_empty());
    let victim = sv.user.by_id(victim.id).await.unwrap().unwrap();
    assert_eq!(victim.tradingview_username.as_deref(), Some("victim_tv"));
  }
}
