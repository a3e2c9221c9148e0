pub mod invoice;
pub mod payment;
pub mod product;
pub mod purchase;
pub mod subscription;
pub mod sweeper;
pub mod user;

pub use invoice::Invoice;
pub use payment::Payment;
pub use product::Product;
pub use purchase::Purchase;
pub use subscription::Subscription;
pub use sweeper::Sweeper;
pub use user::User;

#[cfg(test)]
pub(crate) mod testing;
