pub mod models;
pub mod postgres;
pub mod store;

pub use models::{Address, NewWithdrawal, Token, TokenKind, Withdrawal, WithdrawalStatus};
pub use postgres::PgStore;
pub use store::{MockStore, Store, StoreError};
