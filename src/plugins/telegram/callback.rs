use reqwest::Url;
use teloxide::{
  prelude::*,
  types::{InlineKeyboardButton, InlineKeyboardMarkup},
  utils::html,
};

use super::ReplyBot;
use crate::{
  entity::{SubscriptionStatus, product},
  prelude::*,
  state::{AppState, Services},
};

pub const WELCOME: &str = "<b>TradingView Indicators</b>\n\n\
  Pick an indicator from the catalog. Access is granted to your TradingView \
  account right after the payment is confirmed.";

/// Callback data enum - provides type-safe callback handling
#[derive(Debug, Clone, PartialEq)]
pub enum Callback {
  Catalog,
  Product(i32),
  Buy(i32),
  Subs,
  Back,
}

impl Callback {
  /// Serialize callback to string for Telegram API
  pub fn to_data(&self) -> String {
    match self {
      Callback::Catalog => "catalog".to_string(),
      Callback::Product(id) => format!("product:{id}"),
      Callback::Buy(id) => format!("buy:{id}"),
      Callback::Subs => "subs".to_string(),
      Callback::Back => "back".to_string(),
    }
  }

  /// Parse callback from string received from Telegram API
  pub fn from_data(data: &str) -> Option<Self> {
    match data {
      "catalog" => Some(Callback::Catalog),
      "subs" => Some(Callback::Subs),
      "back" => Some(Callback::Back),
      _ => {
        let (kind, id) = data.split_once(':')?;
        let id = id.parse().ok()?;
        match kind {
          "product" => Some(Callback::Product(id)),
          "buy" => Some(Callback::Buy(id)),
          _ => None,
        }
      }
    }
  }
}

pub fn main_menu() -> InlineKeyboardMarkup {
  InlineKeyboardMarkup::new(vec![
    vec![InlineKeyboardButton::callback(
      "🛒 Catalog",
      Callback::Catalog.to_data(),
    )],
    vec![InlineKeyboardButton::callback(
      "📋 My Subscriptions",
      Callback::Subs.to_data(),
    )],
  ])
}

fn back_keyboard() -> InlineKeyboardMarkup {
  InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
    "« Back to Menu",
    Callback::Back.to_data(),
  )]])
}

pub fn catalog_keyboard(products: &[product::Model]) -> InlineKeyboardMarkup {
  let mut rows: Vec<_> = products
    .iter()
    .map(|product| {
      vec![InlineKeyboardButton::callback(
        format!("{} · {}", product.name, utils::format_price(product.price)),
        Callback::Product(product.id).to_data(),
      )]
    })
    .collect();

  rows.push(vec![InlineKeyboardButton::callback(
    "« Back to Menu",
    Callback::Back.to_data(),
  )]);

  InlineKeyboardMarkup::new(rows)
}

pub async fn handle(
  app: Arc<AppState>,
  bot: ReplyBot,
  data: &str,
) -> ResponseResult<()> {
  let sv = app.sv();

  let Some(callback) = Callback::from_data(data) else {
    return Ok(());
  };

  match callback {
    Callback::Catalog => match sv.product.active().await {
      Ok(products) if products.is_empty() => {
        bot
          .edit_with_keyboard("📭 The catalog is empty.", back_keyboard())
          .await?;
      }
      Ok(products) => {
        bot
          .edit_with_keyboard(
            "🛒 <b>Catalog</b>\n\nChoose an indicator:",
            catalog_keyboard(&products),
          )
          .await?;
      }
      Err(err) => {
        error!("Failed to load catalog: {err}");
        bot.edit_with_keyboard(err.user_message(), back_keyboard()).await?;
      }
    },
    Callback::Product(id) => {
      handle_product_view(&sv, &bot, id).await?;
    }
    Callback::Buy(id) => {
      handle_buy(&app, &bot, id).await?;
    }
    Callback::Subs => {
      let text = subscriptions_text(&sv, bot.user_id)
        .await
        .unwrap_or_else(|err| err.user_message());
      bot.edit_with_keyboard(text, back_keyboard()).await?;
    }
    Callback::Back => {
      app.awaiting.remove(&bot.user_id);
      bot.edit_with_keyboard(WELCOME, main_menu()).await?;
    }
  }

  Ok(())
}

async fn handle_product_view(
  sv: &Services<'_>,
  bot: &ReplyBot,
  id: i32,
) -> ResponseResult<()> {
  let product = match sv.product.by_id(id).await {
    Ok(Some(product)) if product.is_active => product,
    Ok(_) => {
      bot
        .edit_with_keyboard(
          Error::ProductNotFound.user_message(),
          back_keyboard(),
        )
        .await?;
      return Ok(());
    }
    Err(err) => {
      bot.edit_with_keyboard(err.user_message(), back_keyboard()).await?;
      return Ok(());
    }
  };

  let mut text = format!(
    "📈 <b>{}</b>\n\n\
    <b>Price:</b> {}\n\
    <b>Access:</b> {} days",
    html::escape(&product.name),
    utils::format_price(product.price),
    product.duration_days
  );
  if let Some(description) = &product.description {
    text.push_str(&format!("\n\n{}", html::escape(description)));
  }

  let kb = InlineKeyboardMarkup::new(vec![
    vec![InlineKeyboardButton::callback(
      "💳 Buy",
      Callback::Buy(product.id).to_data(),
    )],
    vec![InlineKeyboardButton::callback(
      "« Back",
      Callback::Catalog.to_data(),
    )],
  ]);

  bot.edit_with_keyboard(text, kb).await
}

/// Reuses the stored TradingView username, otherwise asks for one and parks
/// the product until the next text message.
async fn handle_buy(
  app: &AppState,
  bot: &ReplyBot,
  product_id: i32,
) -> ResponseResult<()> {
  let stored = match app.sv().user.by_telegram_id(bot.user_id).await {
    Ok(user) => user.and_then(|u| u.tradingview_username),
    Err(err) => {
      bot.reply_html(err.user_message()).await?;
      return Ok(());
    }
  };

  match stored {
    Some(tradingview) => checkout(app, bot, product_id, &tradingview).await,
    None => {
      app.awaiting.insert(bot.user_id, product_id);
      bot
        .reply_html(
          "✏️ Send your <b>TradingView username</b>.\n\
          Access to the indicator is granted to this account.",
        )
        .await?;
      Ok(())
    }
  }
}

pub async fn checkout(
  app: &AppState,
  bot: &ReplyBot,
  product_id: i32,
  tradingview: &str,
) -> ResponseResult<()> {
  let buyer = bot.buyer();
  let issued = match app.sv().invoice.issue(product_id, &buyer, tradingview).await
  {
    Ok(issued) => issued,
    Err(Error::Validation(msg)) => {
      app.awaiting.insert(bot.user_id, product_id);
      bot
        .reply_html(format!(
          "❌ {}\n\nSend your TradingView username again.",
          html::escape(&msg)
        ))
        .await?;
      return Ok(());
    }
    Err(err) => {
      warn!("Checkout of product {product_id} for {} failed: {err}", bot.user_id);
      bot.reply_html(format!("❌ {}", err.user_message())).await?;
      return Ok(());
    }
  };

  let text = format!(
    "🧾 <b>Invoice #{}</b>\n\n\
    TradingView: <code>{}</code>\n\n\
    Pay with the button below. Access is granted automatically once the \
    payment is confirmed.",
    issued.purchase_id,
    html::escape(tradingview.trim().trim_start_matches('@'))
  );

  match Url::parse(&issued.pay_url) {
    Ok(url) => {
      let kb = InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::url("💸 Pay", url),
      ]]);
      bot.reply_with_keyboard(text, kb).await?;
    }
    Err(_) => {
      let link = html::escape(&issued.pay_url);
      bot.reply_html(format!("{text}\n\n{link}")).await?;
    }
  }

  Ok(())
}

pub async fn subscriptions_text(
  sv: &Services<'_>,
  telegram_id: i64,
) -> Result<String> {
  let Some(user) = sv.user.by_telegram_id(telegram_id).await? else {
    return Ok("📭 You have no subscriptions yet.".into());
  };

  let subscriptions = sv.subscription.by_user(user.id).await?;
  if subscriptions.is_empty() {
    return Ok("📭 You have no subscriptions yet.".into());
  }

  let now = Utc::now().naive_utc();
  let mut text = String::from("📋 <b>Your Subscriptions:</b>\n");

  for sub in subscriptions {
    let name = match sv.product.by_id(sub.product_id).await? {
      Some(product) => html::escape(&product.name),
      None => format!("Product #{}", sub.product_id),
    };

    let status = match sub.status {
      SubscriptionStatus::Active if sub.end_date > now => {
        format!("⏳ {}", utils::format_duration(sub.end_date - now))
      }
      SubscriptionStatus::Active => "⌛ Ending".into(),
      SubscriptionStatus::Expired => "❌ Expired".into(),
    };

    text.push_str(&format!(
      "\n<b>{name}</b>\n{status}\nUntil: {}\n",
      utils::format_date(sub.end_date)
    ));
  }

  Ok(text)
}
