//! Collaborator traits for the Cosmos service.
//!
//! Transport and authentication live behind these traits; the utility only
//! sequences calls to them.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Handle to a remote database, shared by every caller of the same key.
#[async_trait]
pub trait Database: Send + Sync + fmt::Debug {
    /// Database name.
    fn id(&self) -> &str;

    /// Deletes the database on the service.
    async fn delete(&self, cancel: &CancellationToken) -> Result<()>;
}

/// An open client bound to one account endpoint.
pub trait CosmosClient: Send + Sync + fmt::Debug {
    /// Endpoint the client talks to.
    fn endpoint(&self) -> &str;

    /// Discriminator that stays fixed for the life of this client and differs
    /// between clients opened against the same endpoint.
    fn instance_id(&self) -> u64;

    /// Returns a handle for `name` without contacting the service.
    fn database(&self, name: &str) -> Arc<dyn Database>;
}

/// Opens (and typically memoizes) clients per endpoint and account key.
#[async_trait]
pub trait ClientProvider: Send + Sync {
    async fn get_client(
        &self,
        endpoint: &str,
        account_key: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn CosmosClient>>;
}

/// Idempotent provisioning: creates the database if it does not exist.
#[async_trait]
pub trait DatabaseSetup: Send + Sync {
    async fn ensure(
        &self,
        endpoint: &str,
        account_key: &str,
        database_name: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

// == Client Identity ==
/// Stable identity of an externally supplied client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    pub endpoint: String,
    pub instance_id: u64,
}

impl ClientIdentity {
    pub fn of(client: &dyn CosmosClient) -> Self {
        Self {
            endpoint: client.endpoint().to_string(),
            instance_id: client.instance_id(),
        }
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.endpoint, self.instance_id)
    }
}
