use sea_orm::sea_query::{Expr, OnConflict};

use crate::{entity::user, prelude::*};

/// Telegram profile fields refreshed on contact.
#[derive(Debug, Clone, Default)]
pub struct Profile {
  pub username: Option<String>,
  pub first_name: Option<String>,
}

pub struct User<'a> {
  db: &'a DatabaseConnection,
}

impl<'a> User<'a> {
  pub fn new(db: &'a DatabaseConnection) -> Self {
    Self { db }
  }

  /// Idempotent: concurrent first contacts insert one row.
  pub async fn get_or_create(&self, telegram_id: i64) -> Result<user::Model> {
    let now = Utc::now().naive_utc();
    let user = user::ActiveModel {
      telegram_id: Set(telegram_id),
      created_at: Set(now),
      ..Default::default()
    };

    user::Entity::insert(user)
      .on_conflict(
        OnConflict::column(user::Column::TelegramId).do_nothing().to_owned(),
      )
      .exec_without_returning(self.db)
      .await?;

    self.by_telegram_id(telegram_id).await?.ok_or(Error::UserNotFound)
  }

  pub async fn by_telegram_id(
    &self,
    telegram_id: i64,
  ) -> Result<Option<user::Model>> {
    let user = user::Entity::find()
      .filter(user::Column::TelegramId.eq(telegram_id))
      .one(self.db)
      .await?;
    Ok(user)
  }

  pub async fn by_id(&self, id: i32) -> Result<Option<user::Model>> {
    Ok(user::Entity::find_by_id(id).one(self.db).await?)
  }

  pub async fn set_profile(
    &self,
    telegram_id: i64,
    profile: &Profile,
  ) -> Result<()> {
    user::Entity::update_many()
      .col_expr(user::Column::Username, Expr::value(profile.username.clone()))
      .col_expr(
        user::Column::FirstName,
        Expr::value(profile.first_name.clone()),
      )
      .filter(user::Column::TelegramId.eq(telegram_id))
      .exec(self.db)
      .await?;
    Ok(())
  }

  pub async fn set_tradingview(&self, id: i32, username: &str) -> Result<()> {
    let result = user::Entity::update_many()
      .col_expr(user::Column::TradingviewUsername, Expr::value(username))
      .filter(user::Column::Id.eq(id))
      .exec(self.db)
      .await?;

    if result.rows_affected == 0 {
      return Err(Error::UserNotFound);
    }
    Ok(())
  }

  pub async fn count(&self) -> Result<u64> {
    Ok(user::Entity::find().count(self.db).await?)
  }
}
