//! Off-chain resolver for a cross-chain HTLC atomic swap (see `SPEC_FULL.md`).
//!
//! The six leaves-first components this crate wires together: the Chain
//! Gateway (`chain`), the Secret and Order Stores (`store`), the Source and
//! Destination Monitors (`monitor`), and the Resolver Core (`resolver_core`)
//! plus its Executor (`executor`) and cancellation Sweeper (`sweeper`).

pub mod address;
pub mod chain;
pub mod config;
pub mod error;
pub mod executor;
pub mod hashlock;
pub mod indexer;
pub mod monitor;
pub mod policy;
pub mod resolver_core;
pub mod store;
pub mod sweeper;
pub mod time;
pub mod types;
