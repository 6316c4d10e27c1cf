//! Cosmos Module
//!
//! Database handle memoization on top of the lazy cache, the collaborator
//! traits it drives, and an in-memory emulator backend.

mod client;
pub mod emulator;
mod key;
mod util;

pub use client::{ClientIdentity, ClientProvider, CosmosClient, Database, DatabaseSetup};
pub use emulator::{CosmosEmulator, EmulatorClientProvider, EmulatorDatabaseSetup};
pub use key::{DatabaseArgs, DatabaseKey};
pub use util::DatabaseUtil;
