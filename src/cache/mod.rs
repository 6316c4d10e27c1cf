//! Cache Module
//!
//! Keyed lazy cache with single-flight initialization.

mod entry;
mod stats;
mod store;


// Re-export public types
pub use entry::EntryState;
pub use stats::CacheStats;
pub use store::{Factory, FactoryFuture, LazyCache};
