pub mod product;
pub mod purchase;
pub mod subscription;
pub mod user;

pub use purchase::PurchaseStatus;
pub use subscription::SubscriptionStatus;
