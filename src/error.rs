use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("Database error: {0}")]
  Database(#[from] sea_orm::DbErr),

  #[error("Invalid signature")]
  Auth,

  #[error("{0}")]
  Validation(String),

  #[error("Product not found")]
  ProductNotFound,

  #[error("User not found")]
  UserNotFound,

  #[error("Payment provider error: {0}")]
  Provider(String),

  #[error(transparent)]
  Data(#[from] DataError),

  #[error("Delivery failed: {0}")]
  Notify(String),

  #[error("Invalid arguments: {0}")]
  InvalidArgs(String),

  #[error("Internal error: {0}")]
  Internal(String),
}

/// Payment notification that cannot be matched to a purchase.
/// Money may have been received without an entitlement being granted.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
  #[error("malformed notification: {0}")]
  Malformed(#[from] json::Error),

  #[error("invoice {0} carries no correlation payload")]
  MissingPayload(i64),

  #[error("user {0} not found")]
  UnknownUser(i32),

  #[error("product {0} not found")]
  UnknownProduct(i32),

  #[error("no purchase matches invoice {0}")]
  UnknownPurchase(i64),

  #[error("purchase {0} does not belong to the correlated user and product")]
  Mismatch(i32),

  #[error("product {0} has a duration out of the calendar range")]
  Duration(i32),
}

impl Error {
  pub fn user_message(&self) -> String {
    match self {
      Error::Database(_) | Error::Internal(_) | Error::Data(_) => {
        "Internal error, please try again later.".into()
      }
      Error::Provider(_) => {
        "Payment service is unavailable, please try again later.".into()
      }
      other => other.to_string(),
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = match &self {
      Error::Auth => StatusCode::UNAUTHORIZED,
      Error::Validation(_) | Error::InvalidArgs(_) | Error::Data(_) => {
        StatusCode::BAD_REQUEST
      }
      Error::ProductNotFound | Error::UserNotFound => StatusCode::NOT_FOUND,
      Error::Provider(_) | Error::Notify(_) => StatusCode::BAD_GATEWAY,
      Error::Database(_) | Error::Internal(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    };

    let body = json::json!({
      "success": false,
      "error": self.user_message(),
    });

    (status, Json(body)).into_response()
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
