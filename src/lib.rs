pub mod macros;

pub mod chain;
pub mod chains;
pub mod config;
pub mod deposit_db;
pub mod error;
pub mod helpers;
pub mod logger;
pub mod rpc;
pub mod telegram;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;
