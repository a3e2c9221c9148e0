use std::{env, str::FromStr};

use migration::Migrator;
use teloxide::Bot;

use crate::{
  crypto_pay::{self, CryptoPay, PaymentProvider},
  notify::{self, Notifier},
  prelude::*,
  sv,
};

#[derive(Debug, Clone)]
pub struct Config {
  pub db_url: String,
  pub bot_token: String,
  pub crypto_pay_token: String,
  pub crypto_pay: crypto_pay::Settings,
  pub operators: Vec<i64>,
  pub port: u16,
  pub sweep_interval: Duration,
  pub sweep_warmup: Duration,
  pub expiry_warning: TimeDelta,
  pub http_timeout: Duration,
}

fn required(key: &str) -> anyhow::Result<String> {
  env::var(key).with_context(|| format!("{key} not set"))
}

fn or_default<T: FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
  T::Err: std::fmt::Display,
{
  match env::var(key) {
    Ok(raw) => raw
      .trim()
      .parse()
      .map_err(|err| anyhow::anyhow!("Invalid {key} `{raw}`: {err}")),
    Err(_) => Ok(default),
  }
}

fn duration(key: &str, default: &str) -> anyhow::Result<Duration> {
  let raw = env::var(key).unwrap_or_else(|_| default.into());
  humantime::parse_duration(&raw)
    .with_context(|| format!("Invalid duration in {key}: `{raw}`"))
}

impl Config {
  pub fn from_env() -> anyhow::Result<Self> {
    let operators = required("ADMIN_IDS")?
      .split(',')
      .filter(|s| !s.trim().is_empty())
      .map(|id| id.trim().parse().context("Invalid Admin ID format"))
      .collect::<anyhow::Result<Vec<i64>>>()?;

    let http_timeout = duration("HTTP_TIMEOUT", "10s")?;
    let expiry_warning = TimeDelta::from_std(duration("EXPIRY_WARNING", "3days")?)
      .context("EXPIRY_WARNING is out of range")?;

    Ok(Self {
      db_url: or_default("DATABASE_URL", "sqlite:shop.db?mode=rwc".into())?,
      bot_token: required("TELOXIDE_TOKEN")?,
      crypto_pay_token: required("CRYPTO_PAY_TOKEN")?,
      crypto_pay: crypto_pay::Settings {
        base_url: or_default(
          "CRYPTO_PAY_URL",
          "https://pay.crypt.bot/api".to_string(),
        )?,
        fiat: or_default("CRYPTO_PAY_FIAT", "RUB".to_string())?,
        accepted_assets: or_default("CRYPTO_PAY_ASSETS", "USDT".to_string())?,
        paid_button_url: env::var("PAID_BUTTON_URL")
          .ok()
          .filter(|url| !url.trim().is_empty()),
        timeout: http_timeout,
      },
      operators,
      port: or_default("PORT", 3000)?,
      sweep_interval: duration("SWEEP_INTERVAL", "1h")?,
      sweep_warmup: duration("SWEEP_WARMUP", "30s")?,
      expiry_warning,
      http_timeout,
    })
  }
}

pub struct Services<'a> {
  pub user: sv::User<'a>,
  pub product: sv::Product<'a>,
  pub purchase: sv::Purchase<'a>,
  pub subscription: sv::Subscription<'a>,
  pub invoice: sv::Invoice<'a>,
  pub payment: sv::Payment<'a>,
  pub sweeper: sv::Sweeper<'a>,
}

pub struct AppState {
  pub db: DatabaseConnection,
  pub bot: Bot,
  pub config: Config,
  pub notifier: Arc<dyn Notifier>,
  pub provider: Arc<dyn PaymentProvider>,
  /// Chat id -> product waiting for a TradingView username
  pub awaiting: DashMap<i64, i32>,
}

impl AppState {
  pub async fn new(config: Config) -> anyhow::Result<Self> {
    info!("Connecting to database...");
    let db = Database::connect(&config.db_url)
      .await
      .context("Failed to connect to database")?;

    info!("Running migrations...");
    Migrator::up(&db, None).await.context("Failed to run migrations")?;

    let bot = Bot::new(&config.bot_token);
    let notifier = Arc::new(notify::Telegram::new(bot.clone(), config.http_timeout));
    let provider = Arc::new(CryptoPay::new(
      config.crypto_pay_token.clone(),
      config.crypto_pay.clone(),
    )?);

    Ok(Self::with_parts(db, bot, config, notifier, provider))
  }

  pub fn with_parts(
    db: DatabaseConnection,
    bot: Bot,
    config: Config,
    notifier: Arc<dyn Notifier>,
    provider: Arc<dyn PaymentProvider>,
  ) -> Self {
    Self { db, bot, config, notifier, provider, awaiting: DashMap::new() }
  }

  pub fn is_operator(&self, chat_id: i64) -> bool {
    self.config.operators.contains(&chat_id)
  }

  pub fn sv(&self) -> Services<'_> {
    let operators = self.config.operators.as_slice();

    Services {
      user: sv::User::new(&self.db),
      product: sv::Product::new(&self.db),
      purchase: sv::Purchase::new(&self.db),
      subscription: sv::Subscription::new(&self.db),
      invoice: sv::Invoice::new(&self.db, self.provider.as_ref()),
      payment: sv::Payment::new(
        &self.db,
        self.provider.as_ref(),
        self.notifier.as_ref(),
        operators,
      ),
      sweeper: sv::Sweeper::new(
        &self.db,
        self.notifier.as_ref(),
        operators,
        self.config.expiry_warning,
      ),
    }
  }
}
