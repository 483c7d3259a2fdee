pub mod api;
pub mod config;
pub mod db;
pub mod fee;
pub mod gateway;
pub mod nonce;
pub mod signer;
pub mod tx;
pub mod workers;
