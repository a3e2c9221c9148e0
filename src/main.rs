//! Storefront - TradingView indicator shop paid through Crypto Pay
//!
//! Architecture:
//! - SeaORM for database access (SQLite)
//! - Axum for the HTTP API and the payment webhook
//! - Teloxide for the Telegram storefront and notifications
//! - Plugins supervised on the Tokio runtime

mod crypto_pay;
mod entity;
mod error;
mod notify;
mod plugins;
mod prelude;
mod state;
mod sv;
mod utils;

use tracing_subscriber::{
  EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::{
  plugins::{App, cron, server, telegram},
  prelude::*,
  state::{AppState, Config},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
      "storefront=debug,tower_http=debug,sea_orm=warn".into()
    }))
    .with(tracing_subscriber::fmt::layer())
    .init();

  info!("Starting Storefront v{}", env!("CARGO_PKG_VERSION"));

  let config = Config::from_env()?;
  if config.operators.is_empty() {
    warn!("No operators configured, payment alerts will not be delivered");
  }

  let app = Arc::new(AppState::new(config).await?);

  let handles = App::new()
    .register(server::Plugin)
    .register(telegram::Plugin)
    .register(cron::Sweeper)
    .run(app);

  tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
  info!("Shutting down...");

  for handle in handles {
    handle.abort();
  }

  Ok(())
}
