//! Cosmos Database - memoized Azure Cosmos database handles
//!
//! Lazily creates database handles keyed by connection parameters, runs at
//! most one initialization per key at a time, retries after failures, and
//! evicts handles when their database is deleted.

pub mod cache;
pub mod config;
pub mod cosmos;
pub mod error;
pub mod registrar;
mod utils;

pub use cache::{CacheStats, EntryState, LazyCache};
pub use config::Config;
pub use cosmos::DatabaseUtil;
pub use error::{Error, Result};
pub use registrar::CosmosServices;
