//! Cache keys and factory arguments for database handles.

use std::fmt;
use std::sync::Arc;

use crate::cosmos::client::{ClientIdentity, CosmosClient};

// == Database Key ==
/// Identifies one database handle within the process.
///
/// The same database name on different endpoints, or reached through a
/// different explicit client, maps to a different key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseKey {
    pub endpoint: String,
    pub database_name: String,
    pub client: Option<ClientIdentity>,
}

impl fmt::Display for DatabaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.endpoint, self.database_name)?;
        if let Some(client) = &self.client {
            write!(f, "-{client}")?;
        }
        Ok(())
    }
}

// == Database Args ==
/// Everything the factory needs to produce one handle.
#[derive(Clone)]
pub struct DatabaseArgs {
    pub endpoint: String,
    pub account_key: String,
    pub database_name: String,
    /// Client to use instead of asking the provider
    pub client: Option<Arc<dyn CosmosClient>>,
}

impl DatabaseArgs {
    pub fn new(
        endpoint: impl Into<String>,
        account_key: impl Into<String>,
        database_name: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            account_key: account_key.into(),
            database_name: database_name.into(),
            client: None,
        }
    }

    /// Binds the request to an already open client.
    pub fn with_client(mut self, client: Arc<dyn CosmosClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Derives the cache key for these arguments.
    pub fn key(&self) -> DatabaseKey {
        DatabaseKey {
            endpoint: self.endpoint.clone(),
            database_name: self.database_name.clone(),
            client: self.client.as_deref().map(|client| ClientIdentity::of(client)),
        }
    }
}

impl fmt::Debug for DatabaseArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseArgs")
            .field("endpoint", &self.endpoint)
            .field("database_name", &self.database_name)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}
