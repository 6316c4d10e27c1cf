//! In-memory Cosmos emulator.
//!
//! Keeps accounts and their databases in process so the utility can run
//! without a service. Endpoints can be switched offline to simulate outages.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::LazyCache;
use crate::cosmos::client::{ClientProvider, CosmosClient, Database, DatabaseSetup};
use crate::error::{Error, Result};

#[derive(Debug)]
struct Account {
    account_key: String,
    databases: HashSet<String>,
    online: bool,
}

// == Emulator ==
/// Shared state of all emulated accounts.
#[derive(Debug, Default)]
pub struct CosmosEmulator {
    accounts: RwLock<HashMap<String, Account>>,
    next_client_id: AtomicU64,
}

impl CosmosEmulator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers an account, replacing any previous one at `endpoint`.
    pub fn add_account(&self, endpoint: impl Into<String>, account_key: impl Into<String>) {
        let endpoint = endpoint.into();
        debug!("Emulator: adding account {}", endpoint);
        self.accounts.write().insert(
            endpoint,
            Account {
                account_key: account_key.into(),
                databases: HashSet::new(),
                online: true,
            },
        );
    }

    /// Takes an endpoint offline or brings it back.
    pub fn set_online(&self, endpoint: &str, online: bool) {
        if let Some(account) = self.accounts.write().get_mut(endpoint) {
            account.online = online;
        }
    }

    pub fn database_exists(&self, endpoint: &str, name: &str) -> bool {
        self.accounts
            .read()
            .get(endpoint)
            .is_some_and(|account| account.databases.contains(name))
    }

    /// Names of all databases at `endpoint`, sorted.
    pub fn databases(&self, endpoint: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .accounts
            .read()
            .get(endpoint)
            .map(|account| account.databases.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn authorize(&self, endpoint: &str, account_key: &str) -> Result<()> {
        let accounts = self.accounts.read();
        let account = reachable(&accounts, endpoint)?;
        if account.account_key != account_key {
            return Err(Error::Remote(format!("unauthorized for {endpoint}")));
        }
        Ok(())
    }

    fn create_database_if_not_exists(&self, endpoint: &str, name: &str) -> Result<bool> {
        let mut accounts = self.accounts.write();
        reachable(&accounts, endpoint)?;
        let account = accounts
            .get_mut(endpoint)
            .ok_or_else(|| Error::Remote(format!("unknown endpoint {endpoint}")))?;
        Ok(account.databases.insert(name.to_string()))
    }

    fn delete_database(&self, endpoint: &str, name: &str) -> Result<()> {
        let mut accounts = self.accounts.write();
        reachable(&accounts, endpoint)?;
        let removed = accounts
            .get_mut(endpoint)
            .is_some_and(|account| account.databases.remove(name));
        if removed {
            Ok(())
        } else {
            Err(Error::NotFound(format!("database {name} at {endpoint}")))
        }
    }

    fn open_client(self: &Arc<Self>, endpoint: &str) -> EmulatorClient {
        EmulatorClient {
            emulator: Arc::clone(self),
            endpoint: endpoint.to_string(),
            instance_id: self.next_client_id.fetch_add(1, Ordering::Relaxed),
        }
    }
}

fn reachable<'a>(accounts: &'a HashMap<String, Account>, endpoint: &str) -> Result<&'a Account> {
    match accounts.get(endpoint) {
        Some(account) if account.online => Ok(account),
        Some(_) => Err(Error::Remote(format!("{endpoint} is unavailable"))),
        None => Err(Error::Remote(format!("unknown endpoint {endpoint}"))),
    }
}

// == Client ==
/// Client opened against one emulated endpoint.
#[derive(Debug)]
pub struct EmulatorClient {
    emulator: Arc<CosmosEmulator>,
    endpoint: String,
    instance_id: u64,
}

impl CosmosClient for EmulatorClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn instance_id(&self) -> u64 {
        self.instance_id
    }

    fn database(&self, name: &str) -> Arc<dyn Database> {
        Arc::new(EmulatorDatabase {
            emulator: Arc::clone(&self.emulator),
            endpoint: self.endpoint.clone(),
            name: name.to_string(),
        })
    }
}

/// Database handle inside the emulator.
#[derive(Debug)]
pub struct EmulatorDatabase {
    emulator: Arc<CosmosEmulator>,
    endpoint: String,
    name: String,
}

#[async_trait]
impl Database for EmulatorDatabase {
    fn id(&self) -> &str {
        &self.name
    }

    async fn delete(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.emulator.delete_database(&self.endpoint, &self.name)
    }
}

// == Client Provider ==
/// Clients are shared per endpoint and account key.
#[derive(Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    endpoint: String,
    account_key: String,
}

impl fmt::Debug for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientKey")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Opens emulator clients, one per endpoint and account key.
pub struct EmulatorClientProvider {
    clients: LazyCache<ClientKey, Arc<dyn CosmosClient>, ()>,
}

impl EmulatorClientProvider {
    pub fn new(emulator: Arc<CosmosEmulator>) -> Self {
        let clients = LazyCache::new(move |key: ClientKey, _args: (), _token| {
            let emulator = Arc::clone(&emulator);
            async move {
                emulator.authorize(&key.endpoint, &key.account_key)?;
                info!("Emulator: opened client for {}", key.endpoint);
                let client: Arc<dyn CosmosClient> = Arc::new(emulator.open_client(&key.endpoint));
                Ok::<_, Error>(client)
            }
        });
        Self { clients }
    }
}

#[async_trait]
impl ClientProvider for EmulatorClientProvider {
    async fn get_client(
        &self,
        endpoint: &str,
        account_key: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn CosmosClient>> {
        let key = ClientKey {
            endpoint: endpoint.to_string(),
            account_key: account_key.to_string(),
        };
        self.clients.get(key, (), cancel).await
    }
}

// == Database Setup ==
/// Creates emulated databases on demand and counts provisioning calls.
#[derive(Debug)]
pub struct EmulatorDatabaseSetup {
    emulator: Arc<CosmosEmulator>,
    calls: AtomicU64,
}

impl EmulatorDatabaseSetup {
    pub fn new(emulator: Arc<CosmosEmulator>) -> Self {
        Self {
            emulator,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of `ensure` calls received.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseSetup for EmulatorDatabaseSetup {
    async fn ensure(
        &self,
        endpoint: &str,
        account_key: &str,
        database_name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.emulator.authorize(endpoint, account_key)?;
        if self
            .emulator
            .create_database_if_not_exists(endpoint, database_name)?
        {
            info!("Emulator: created database {} at {}", database_name, endpoint);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINT: &str = "https://emulator.local";

    fn emulator() -> Arc<CosmosEmulator> {
        let emulator = CosmosEmulator::new();
        emulator.add_account(ENDPOINT, "key");
        emulator
    }

    #[tokio::test]
    async fn test_client_provider_memoizes_per_key() {
        let provider = EmulatorClientProvider::new(emulator());
        let cancel = CancellationToken::new();

        let a = provider.get_client(ENDPOINT, "key", &cancel).await.unwrap();
        let b = provider.get_client(ENDPOINT, "key", &cancel).await.unwrap();

        assert_eq!(a.instance_id(), b.instance_id());
    }

    #[tokio::test]
    async fn test_client_provider_rejects_bad_key() {
        let provider = EmulatorClientProvider::new(emulator());
        let result = provider
            .get_client(ENDPOINT, "wrong", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::Remote(_))));
    }

    #[tokio::test]
    async fn test_client_provider_retries_after_outage() {
        let emulator = emulator();
        let provider = EmulatorClientProvider::new(Arc::clone(&emulator));
        let cancel = CancellationToken::new();

        emulator.set_online(ENDPOINT, false);
        assert!(provider.get_client(ENDPOINT, "key", &cancel).await.is_err());

        emulator.set_online(ENDPOINT, true);
        assert!(provider.get_client(ENDPOINT, "key", &cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_setup_is_idempotent() {
        let emulator = emulator();
        let setup = EmulatorDatabaseSetup::new(Arc::clone(&emulator));
        let cancel = CancellationToken::new();

        setup.ensure(ENDPOINT, "key", "orders", &cancel).await.unwrap();
        setup.ensure(ENDPOINT, "key", "orders", &cancel).await.unwrap();

        assert_eq!(emulator.databases(ENDPOINT), vec!["orders".to_string()]);
        assert_eq!(setup.calls(), 2);
    }

    #[tokio::test]
    async fn test_delete_missing_database() {
        let emulator = emulator();
        let client = emulator.open_client(ENDPOINT);
        let result = client
            .database("ghost")
            .delete(&CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_clients_get_distinct_instance_ids() {
        let emulator = emulator();
        let a = emulator.open_client(ENDPOINT);
        let b = emulator.open_client(ENDPOINT);
        assert_ne!(a.instance_id(), b.instance_id());
    }
}
