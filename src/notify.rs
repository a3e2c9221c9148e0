//! Outbound delivery to buyers and operators.
//!
//! Every send is best-effort: callers log and count failures, they never
//! undo a committed state change because a message did not go through.

use reqwest::Url;
use teloxide::{
  Bot,
  prelude::*,
  types::{FileId, InputFile, ParseMode},
};

use crate::prelude::*;

#[async_trait]
pub trait Notifier: Send + Sync {
  /// Send an HTML-formatted text message.
  async fn send(&self, recipient: i64, text: &str) -> Result<()>;

  /// Send a deliverable. `file` is a Telegram file id, an URL or a path.
  async fn send_document(
    &self,
    recipient: i64,
    file: &str,
    caption: &str,
  ) -> Result<()>;
}

pub struct Telegram {
  bot: Bot,
  timeout: Duration,
}

impl Telegram {
  pub fn new(bot: Bot, timeout: Duration) -> Self {
    Self { bot, timeout }
  }
}

fn input_file(file: &str) -> InputFile {
  if let Ok(url) = Url::parse(file) {
    InputFile::url(url)
  } else if file.contains('/') || file.contains('.') {
    InputFile::file(file.to_owned())
  } else {
    InputFile::file_id(FileId(file.to_owned()))
  }
}

#[async_trait]
impl Notifier for Telegram {
  async fn send(&self, recipient: i64, text: &str) -> Result<()> {
    let request = self
      .bot
      .send_message(ChatId(recipient), text.to_owned())
      .parse_mode(ParseMode::Html);

    match time::timeout(self.timeout, request).await {
      Ok(Ok(_)) => Ok(()),
      Ok(Err(err)) => Err(Error::Notify(err.to_string())),
      Err(_) => Err(Error::Notify("timed out".into())),
    }
  }

  async fn send_document(
    &self,
    recipient: i64,
    file: &str,
    caption: &str,
  ) -> Result<()> {
    let request = self
      .bot
      .send_document(ChatId(recipient), input_file(file))
      .caption(caption.to_owned())
      .parse_mode(ParseMode::Html);

    match time::timeout(self.timeout, request).await {
      Ok(Ok(_)) => Ok(()),
      Ok(Err(err)) => Err(Error::Notify(err.to_string())),
      Err(_) => Err(Error::Notify("timed out".into())),
    }
  }
}

/// Sends `text` to every operator, returns how many deliveries failed.
pub async fn broadcast(
  notifier: &dyn Notifier,
  operators: &[i64],
  text: &str,
) -> usize {
  let sends = operators.iter().map(|&op| async move {
    let result = notifier.send(op, text).await;
    if let Err(err) = &result {
      warn!("Operator alert to {op} failed: {err}");
    }
    result.is_err()
  });

  futures::future::join_all(sends).await.into_iter().filter(|&f| f).count()
}
