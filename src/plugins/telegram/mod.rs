mod callback;
mod command;

use command::Command;
use teloxide::{
  Bot,
  dispatching::{Dispatcher, HandlerExt, UpdateFilterExt},
  prelude::*,
  types::{
    CallbackQuery, ChatId, InlineKeyboardMarkup, Message, MessageId, ParseMode,
    Update,
  },
};

use crate::{
  prelude::*,
  state::AppState,
  sv::{invoice::Buyer, user::Profile},
};

pub struct Plugin;

#[async_trait]
impl super::Plugin for Plugin {
  fn name(&self) -> &'static str {
    "telegram"
  }

  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    run_bot(app).await;
    Ok(())
  }
}

pub async fn run_bot(app: Arc<AppState>) {
  info!("Starting Telegram bot...");

  let bot = app.bot.clone();

  let handler = teloxide::dptree::entry()
    .branch(Update::filter_message().filter_command::<Command>().endpoint({
      let app = app.clone();
      move |bot: Bot, msg: Message, cmd: Command| {
        let app = app.clone();
        let bot = ReplyBot::from_message(bot, &msg);
        command::handle(app, bot, cmd)
      }
    }))
    .branch(Update::filter_message().endpoint({
      let app = app.clone();
      move |bot: Bot, msg: Message| {
        let app = app.clone();
        text_handle(app, bot, msg)
      }
    }))
    .branch(Update::filter_callback_query().endpoint({
      let app = app.clone();
      move |bot: Bot, query: CallbackQuery| {
        let app = app.clone();
        callback_handle(app, bot, query)
      }
    }));

  Dispatcher::builder(bot, handler).build().dispatch().await;
}

/// Plain text is only meaningful as the TradingView username a purchase is
/// waiting for.
async fn text_handle(
  app: Arc<AppState>,
  bot: Bot,
  msg: Message,
) -> ResponseResult<()> {
  let Some(text) = msg.text() else {
    return Ok(());
  };
  let bot = ReplyBot::from_message(bot, &msg);

  let Some((_, product_id)) = app.awaiting.remove(&bot.user_id) else {
    bot.reply_html("Use /start to open the catalog.").await?;
    return Ok(());
  };

  callback::checkout(&app, &bot, product_id, text).await
}

async fn callback_handle(
  app: Arc<AppState>,
  bot: Bot,
  query: CallbackQuery,
) -> ResponseResult<()> {
  if let Some(data) = query.data.as_deref()
    && let Some(msg) = query.message.as_ref()
  {
    let mut bot =
      ReplyBot::new(bot, query.from.id.0 as i64, msg.chat().id, msg.id());
    bot.profile = Some(profile(&query.from));

    // answer callback to remove loading state
    bot.inner.answer_callback_query(query.id.clone()).await?;

    callback::handle(app, bot, data).await
  } else {
    Ok(())
  }
}

fn profile(user: &teloxide::types::User) -> Profile {
  Profile {
    username: user.username.clone(),
    first_name: Some(user.first_name.clone()),
  }
}

#[derive(Debug, Clone)]
struct ReplyBot {
  inner: Bot,
  pub user_id: i64,
  pub chat_id: ChatId,
  pub message_id: MessageId,
  pub profile: Option<Profile>,
}

impl ReplyBot {
  pub fn new(
    inner: Bot,
    user_id: i64,
    chat_id: ChatId,
    message_id: MessageId,
  ) -> Self {
    Self { inner, user_id, chat_id, message_id, profile: None }
  }

  fn from_message(inner: Bot, msg: &Message) -> Self {
    let mut bot = Self::new(inner, msg.chat.id.0, msg.chat.id, msg.id);
    bot.profile = msg.from.as_ref().map(profile);
    bot
  }

  fn buyer(&self) -> Buyer {
    Buyer { telegram_id: self.user_id, profile: self.profile.clone() }
  }

  async fn reply_html(
    &self,
    text: impl Into<String>,
  ) -> ResponseResult<Message> {
    self
      .inner
      .send_message(self.chat_id, text.into())
      .parse_mode(ParseMode::Html)
      .await
  }

  /// Send a potentially long message by splitting it into chunks if needed.
  async fn reply_html_chunked(
    &self,
    text: impl Into<String>,
  ) -> ResponseResult<()> {
    for chunk in utils::chunk_message(&text.into(), 0) {
      self
        .inner
        .send_message(self.chat_id, chunk)
        .parse_mode(ParseMode::Html)
        .await?;
    }
    Ok(())
  }

  async fn reply_with_keyboard(
    &self,
    text: impl Into<String>,
    keyboard: InlineKeyboardMarkup,
  ) -> ResponseResult<Message> {
    self
      .inner
      .send_message(self.chat_id, text.into())
      .parse_mode(ParseMode::Html)
      .reply_markup(keyboard)
      .await
  }

  pub async fn edit_with_keyboard(
    &self,
    text: impl Into<String>,
    keyboard: InlineKeyboardMarkup,
  ) -> ResponseResult<()> {
    self
      .inner
      .edit_message_text(self.chat_id, self.message_id, text.into())
      .parse_mode(ParseMode::Html)
      .reply_markup(keyboard)
      .await?;
    Ok(())
  }
}
