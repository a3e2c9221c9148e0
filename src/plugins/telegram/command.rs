use teloxide::{
  prelude::*,
  utils::{
    command::{BotCommands, ParseError},
    html,
  },
};

use super::{ReplyBot, callback};
use crate::{
  entity::PurchaseStatus,
  prelude::*,
  state::{AppState, Services},
  sv::{invoice::validate_tradingview, product::NewProduct},
};

fn parse_product(
  input: String,
) -> std::result::Result<(String, i32, String), ParseError> {
  let mut parts = input.trim().splitn(3, ' ');
  let price = parts.next().unwrap_or_default().to_string();
  let days = parts.next().unwrap_or_default();
  let name = parts.next().unwrap_or_default().trim().to_string();

  let usage = || {
    ParseError::IncorrectFormat(
      "Usage: /addproduct <price> <days> <name>".into(),
    )
  };

  let days = days.parse().map_err(|_| usage())?;
  if price.is_empty() || name.is_empty() {
    return Err(usage());
  }

  Ok((price, days, name))
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum Command {
  Start,
  Help,
  Catalog,
  Subs,
  /// Set the TradingView account that receives access
  Tv(String),
  // Admin commands below
  #[command(parse_with = parse_product)]
  AddProduct {
    price: String,
    days: i32,
    name: String,
  },
  #[command(parse_with = "split")]
  SetFile {
    product_id: i32,
    file_ref: String,
  },
  Stats,
}

const USER_HELP: &str = "\
<b>📋 Commands</b>

/start - Main menu
/catalog - Browse indicators
/subs - My subscriptions
/tv &lt;username&gt; - Set your TradingView username
/help - Show this message";

const ADMIN_HELP: &str = "\
<b>🛠 Admin Commands</b>

/addproduct &lt;price&gt; &lt;days&gt; &lt;name&gt; - Add product, price in ₽
/setfile &lt;product_id&gt; &lt;file&gt; - Attach file id, URL or path
/stats - Sales summary";

pub async fn handle(
  app: Arc<AppState>,
  bot: ReplyBot,
  cmd: Command,
) -> ResponseResult<()> {
  let sv = app.sv();

  if let Err(err) = touch_user(&sv, &bot).await {
    warn!("Failed to register user {}: {err}", bot.user_id);
  }

  match cmd {
    Command::Start => {
      app.awaiting.remove(&bot.user_id);
      bot.reply_with_keyboard(callback::WELCOME, callback::main_menu()).await?;
    }
    Command::Help if app.is_operator(bot.user_id) => {
      bot.reply_html(format!("{USER_HELP}\n\n{ADMIN_HELP}")).await?;
    }
    Command::Help => {
      bot.reply_html(USER_HELP).await?;
    }
    Command::Catalog => {
      let products = match sv.product.active().await {
        Ok(products) => products,
        Err(err) => {
          bot.reply_html(err.user_message()).await?;
          return Ok(());
        }
      };
      if products.is_empty() {
        bot.reply_html("📭 The catalog is empty.").await?;
      } else {
        bot
          .reply_with_keyboard(
            "🛒 <b>Catalog</b>\n\nChoose an indicator:",
            callback::catalog_keyboard(&products),
          )
          .await?;
      }
    }
    Command::Subs => {
      let text = callback::subscriptions_text(&sv, bot.user_id)
        .await
        .unwrap_or_else(|err| err.user_message());
      bot.reply_html_chunked(text).await?;
    }
    Command::Tv(username) => {
      let text = match set_tradingview(&sv, &bot, &username).await {
        Ok(username) => format!(
          "✅ TradingView username set to <code>{}</code>",
          html::escape(&username)
        ),
        Err(err) => format!("❌ {}", html::escape(&err.user_message())),
      };
      bot.reply_html(text).await?;
    }
    cmd if app.is_operator(bot.user_id) => {
      let text = match handle_admin_command(&sv, cmd).await {
        Ok(text) => text,
        Err(err) => format!("❌ {}", html::escape(&err.to_string())),
      };
      bot.reply_html_chunked(text).await?;
    }
    _ => {}
  }

  Ok(())
}

async fn touch_user(sv: &Services<'_>, bot: &ReplyBot) -> Result<()> {
  sv.user.get_or_create(bot.user_id).await?;
  if let Some(profile) = &bot.profile {
    sv.user.set_profile(bot.user_id, profile).await?;
  }
  Ok(())
}

async fn set_tradingview(
  sv: &Services<'_>,
  bot: &ReplyBot,
  input: &str,
) -> Result<String> {
  let username = validate_tradingview(input)?;
  let user = sv.user.get_or_create(bot.user_id).await?;
  sv.user.set_tradingview(user.id, username).await?;
  Ok(username.to_string())
}

async fn handle_admin_command(
  sv: &Services<'_>,
  cmd: Command,
) -> Result<String> {
  match cmd {
    Command::AddProduct { price, days, name } => {
      let price = utils::parse_price(&price).ok_or_else(|| {
        Error::InvalidArgs(format!("`{price}` is not a price"))
      })?;
      let product = sv
        .product
        .create(NewProduct {
          name,
          description: None,
          price,
          duration_days: days,
          tradingview_script: None,
        })
        .await?;
      info!("Product #{} `{}` added", product.id, product.name);

      Ok(format!(
        "✅ Product <b>#{}</b> {} added: {} for {} days",
        product.id,
        html::escape(&product.name),
        utils::format_price(product.price),
        product.duration_days
      ))
    }
    Command::SetFile { product_id, file_ref } => {
      sv.product.set_file(product_id, &file_ref).await?;
      Ok(format!("✅ File attached to product <b>#{product_id}</b>"))
    }
    Command::Stats => {
      let users = sv.user.count().await?;
      let active = sv.subscription.count_active().await?;
      let paid = sv.purchase.count_by_status(PurchaseStatus::Paid).await?;
      let pending =
        sv.purchase.count_by_status(PurchaseStatus::Pending).await?;

      Ok(format!(
        "📊 <b>Stats</b>\n\n\
        Users: {users}\n\
        Active subscriptions: {active}\n\
        Paid purchases: {paid}\n\
        Pending invoices: {pending}"
      ))
    }
    _ => Ok("Unknown command. Use /help".into()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_product() {
    let (price, days, name) =
      parse_product("500 30 RSI Pro Max".into()).unwrap();
    assert_eq!(price, "500");
    assert_eq!(days, 30);
    assert_eq!(name, "RSI Pro Max");

    assert!(parse_product("500 thirty RSI".into()).is_err());
    assert!(parse_product("500 30".into()).is_err());
    assert!(parse_product(String::new()).is_err());
  }
}
