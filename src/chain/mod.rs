//! Everything to do with talking to one EVM chain (§4.1).

pub mod abi;
pub mod gas;
pub mod gateway;
pub mod retry;

pub use gateway::{ChainGateway, LogFilter, WatchHandle};
