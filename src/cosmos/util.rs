//! Database Utility
//!
//! Memoizes database handles per endpoint, database name and optional client,
//! and deletes databases together with their cache entries.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cache::{CacheStats, LazyCache};
use crate::config::Config;
use crate::cosmos::client::{ClientProvider, CosmosClient, Database, DatabaseSetup};
use crate::cosmos::key::{DatabaseArgs, DatabaseKey};
use crate::error::{Error, Result};

/// Connection parameters resolved from configuration at construction.
#[derive(Clone)]
struct Defaults {
    endpoint: String,
    account_key: String,
    database_name: String,
}

// == Database Util ==
/// Process-wide store of Cosmos database handles.
///
/// A handle is created the first time its key is requested; concurrent
/// requests for the same key share that single creation. Failed creations are
/// not remembered, so the next request tries again.
pub struct DatabaseUtil {
    databases: LazyCache<DatabaseKey, Arc<dyn Database>, DatabaseArgs>,
    defaults: Defaults,
}

impl DatabaseUtil {
    // == Constructor ==
    /// Creates the utility from resolved settings and its collaborators.
    ///
    /// Fails with [`Error::Config`] if a required setting is missing.
    pub fn new(
        config: &Config,
        client_provider: Arc<dyn ClientProvider>,
        setup: Arc<dyn DatabaseSetup>,
    ) -> Result<Self> {
        let config = config.clone().validate()?;
        let ensure_database = config.ensure_database_on_first_use;
        let databases = LazyCache::new(move |_key: DatabaseKey, args: DatabaseArgs, token| {
            let client_provider = Arc::clone(&client_provider);
            let setup = Arc::clone(&setup);
            async move {
                create_database(
                    client_provider.as_ref(),
                    setup.as_ref(),
                    ensure_database,
                    args,
                    &token,
                )
                .await
            }
        });

        Ok(Self {
            databases,
            defaults: Defaults {
                endpoint: config.endpoint,
                account_key: config.account_key,
                database_name: config.database_name,
            },
        })
    }

    /// Builds the utility from environment configuration.
    pub fn from_env(
        client_provider: Arc<dyn ClientProvider>,
        setup: Arc<dyn DatabaseSetup>,
    ) -> Result<Self> {
        Self::new(&Config::from_env()?, client_provider, setup)
    }

    fn default_args(&self, database_name: Option<&str>) -> DatabaseArgs {
        DatabaseArgs::new(
            self.defaults.endpoint.as_str(),
            self.defaults.account_key.as_str(),
            database_name.unwrap_or(&self.defaults.database_name),
        )
    }

    // == Get ==
    /// Returns the configured default database.
    pub async fn get(&self, cancel: &CancellationToken) -> Result<Arc<dyn Database>> {
        self.get_with(self.default_args(None), cancel).await
    }

    /// Returns `database_name` on the configured endpoint.
    pub async fn get_named(
        &self,
        database_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Database>> {
        self.get_with(self.default_args(Some(database_name)), cancel)
            .await
    }

    /// Returns `database_name` on an explicit endpoint.
    pub async fn get_at(
        &self,
        endpoint: &str,
        account_key: &str,
        database_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Database>> {
        self.get_with(DatabaseArgs::new(endpoint, account_key, database_name), cancel)
            .await
    }

    /// Returns `database_name` reached through `client`.
    ///
    /// `account_key` authorizes provisioning on the client's endpoint.
    /// Handles are keyed by the client's identity, so a different client for
    /// the same name never receives a handle bound to the previous one.
    pub async fn get_with_client(
        &self,
        database_name: &str,
        account_key: &str,
        client: Arc<dyn CosmosClient>,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Database>> {
        self.get_with(client_args(database_name, account_key, client), cancel)
            .await
    }

    /// Returns the handle for `args`, creating it on first use.
    pub async fn get_with(
        &self,
        args: DatabaseArgs,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Database>> {
        self.databases.get(args.key(), args, cancel).await
    }

    // == Delete ==
    /// Deletes the configured default database.
    pub async fn delete(&self, cancel: &CancellationToken) -> Result<()> {
        self.delete_with(self.default_args(None), cancel).await
    }

    /// Deletes `database_name` on the configured endpoint.
    pub async fn delete_named(&self, database_name: &str, cancel: &CancellationToken) -> Result<()> {
        self.delete_with(self.default_args(Some(database_name)), cancel)
            .await
    }

    /// Deletes `database_name` on an explicit endpoint.
    pub async fn delete_at(
        &self,
        endpoint: &str,
        account_key: &str,
        database_name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.delete_with(DatabaseArgs::new(endpoint, account_key, database_name), cancel)
            .await
    }

    /// Deletes `database_name` through `client`.
    pub async fn delete_with_client(
        &self,
        database_name: &str,
        account_key: &str,
        client: Arc<dyn CosmosClient>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.delete_with(client_args(database_name, account_key, client), cancel)
            .await
    }

    /// Deletes the database for `args` remotely, then forgets its handle.
    ///
    /// If the remote delete fails the cached handle is left in place.
    pub async fn delete_with(&self, args: DatabaseArgs, cancel: &CancellationToken) -> Result<()> {
        let key = args.key();
        error!(
            "Deleting database {} from endpoint {}...",
            args.database_name, args.endpoint
        );

        let database = self.get_with(args.clone(), cancel).await?;
        database.delete(cancel).await?;
        self.databases.remove(&key)?;

        warn!(
            "Finished deleting database {} from endpoint {}",
            args.database_name, args.endpoint
        );
        Ok(())
    }

    // == Lifecycle ==
    /// Disposes the underlying cache; later calls fail with [`Error::Disposed`].
    pub fn dispose(&self) {
        info!("Disposing database util");
        self.databases.dispose();
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.databases.stats()
    }

    /// Returns true if a handle for `args` is cached.
    pub fn is_cached(&self, args: &DatabaseArgs) -> bool {
        self.databases
            .state(&args.key())
            .is_some_and(|state| state.is_ready())
    }
}

impl std::fmt::Debug for DatabaseUtil {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseUtil")
            .field("endpoint", &self.defaults.endpoint)
            .field("database_name", &self.defaults.database_name)
            .field("databases", &self.databases)
            .finish()
    }
}

fn client_args(database_name: &str, account_key: &str, client: Arc<dyn CosmosClient>) -> DatabaseArgs {
    DatabaseArgs::new(client.endpoint(), account_key, database_name).with_client(client)
}

// == Factory ==
/// Opens the client, provisions the database if asked to, and returns its
/// handle. Failures are logged and reported against the endpoint.
async fn create_database(
    client_provider: &dyn ClientProvider,
    setup: &dyn DatabaseSetup,
    ensure_database: bool,
    args: DatabaseArgs,
    cancel: &CancellationToken,
) -> Result<Arc<dyn Database>> {
    let attempt = async {
        let client = match &args.client {
            Some(client) => Arc::clone(client),
            None => {
                client_provider
                    .get_client(&args.endpoint, &args.account_key, cancel)
                    .await?
            }
        };

        if ensure_database {
            setup
                .ensure(&args.endpoint, &args.account_key, &args.database_name, cancel)
                .await?;
        }

        Ok::<_, Error>(client.database(&args.database_name))
    };

    match attempt.await {
        Ok(database) => {
            info!(
                "Opened database {} on endpoint {}",
                args.database_name, args.endpoint
            );
            Ok(database)
        }
        Err(err) => {
            let failure = Error::Initialization {
                endpoint: args.endpoint.clone(),
                reason: err.to_string(),
            };
            error!("{}", failure);
            Err(failure)
        }
    }
}
