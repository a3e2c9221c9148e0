use sea_orm::sea_query::Expr;

use crate::{entity::product, prelude::*};

/// A hundred years.
pub const MAX_DURATION_DAYS: i32 = 36_500;

pub struct Product<'a> {
  db: &'a DatabaseConnection,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
  pub name: String,
  pub description: Option<String>,
  pub price: i64,
  pub duration_days: i32,
  pub tradingview_script: Option<String>,
}

impl<'a> Product<'a> {
  pub fn new(db: &'a DatabaseConnection) -> Self {
    Self { db }
  }

  pub async fn by_id(&self, id: i32) -> Result<Option<product::Model>> {
    Ok(product::Entity::find_by_id(id).one(self.db).await?)
  }

  /// Catalog ordered by price
  pub async fn active(&self) -> Result<Vec<product::Model>> {
    let products = product::Entity::find()
      .filter(product::Column::IsActive.eq(true))
      .order_by_asc(product::Column::Price)
      .order_by_asc(product::Column::Id)
      .all(self.db)
      .await?;
    Ok(products)
  }

  pub async fn create(&self, new: NewProduct) -> Result<product::Model> {
    if new.name.trim().is_empty() {
      return Err(Error::Validation("Product name is empty".into()));
    }
    if new.price <= 0 {
      return Err(Error::Validation("Price must be positive".into()));
    }
    if new.duration_days < 0 {
      return Err(Error::Validation("Duration cannot be negative".into()));
    }
    if new.duration_days > MAX_DURATION_DAYS {
      return Err(Error::Validation(format!(
        "Duration cannot exceed {MAX_DURATION_DAYS} days"
      )));
    }

    let product = product::ActiveModel {
      name: Set(new.name.trim().to_string()),
      description: Set(new.description),
      price: Set(new.price),
      duration_days: Set(new.duration_days),
      tradingview_script: Set(new.tradingview_script),
      file_ref: Set(None),
      is_active: Set(true),
      created_at: Set(Utc::now().naive_utc()),
      ..Default::default()
    };

    Ok(product.insert(self.db).await?)
  }

  pub async fn set_file(&self, id: i32, file_ref: &str) -> Result<()> {
    let result = product::Entity::update_many()
      .col_expr(product::Column::FileRef, Expr::value(file_ref))
      .filter(product::Column::Id.eq(id))
      .exec(self.db)
      .await?;

    if result.rows_affected == 0 {
      return Err(Error::ProductNotFound);
    }
    Ok(())
  }
}
