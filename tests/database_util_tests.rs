//! Integration Tests for the Database Utility
//!
//! Exercises handle memoization, provisioning, deletion and disposal against
//! the in-memory emulator.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use cosmos_database::cosmos::{
    ClientProvider, CosmosClient, CosmosEmulator, Database, DatabaseArgs, DatabaseUtil,
    EmulatorClientProvider, EmulatorDatabaseSetup,
};
use cosmos_database::{Config, Error, Result};

const ENDPOINT: &str = "https://orders-acct.documents.azure.com";
const ACCOUNT_KEY: &str = "primary-key";

// == Helper Functions ==

struct Harness {
    emulator: Arc<CosmosEmulator>,
    setup: Arc<EmulatorDatabaseSetup>,
    util: DatabaseUtil,
}

fn harness(ensure_database: bool) -> Harness {
    let emulator = CosmosEmulator::new();
    emulator.add_account(ENDPOINT, ACCOUNT_KEY);
    let provider = Arc::new(EmulatorClientProvider::new(Arc::clone(&emulator)));
    harness_with_provider(emulator, provider, ensure_database)
}

fn harness_with_provider(
    emulator: Arc<CosmosEmulator>,
    provider: Arc<dyn ClientProvider>,
    ensure_database: bool,
) -> Harness {
    let setup = Arc::new(EmulatorDatabaseSetup::new(Arc::clone(&emulator)));
    let config = Config::new(ENDPOINT, ACCOUNT_KEY, "app")
        .with_ensure_database_on_first_use(ensure_database);
    let util = DatabaseUtil::new(&config, provider, setup.clone()).unwrap();
    Harness {
        emulator,
        setup,
        util,
    }
}

fn args(name: &str) -> DatabaseArgs {
    DatabaseArgs::new(ENDPOINT, ACCOUNT_KEY, name)
}

/// Client provider that blocks until released.
struct GatedProvider {
    inner: EmulatorClientProvider,
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl ClientProvider for GatedProvider {
    async fn get_client(
        &self,
        endpoint: &str,
        account_key: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn CosmosClient>> {
        self.started.notify_one();
        self.release.notified().await;
        self.inner.get_client(endpoint, account_key, cancel).await
    }
}

fn gated_harness() -> (Arc<Harness>, Arc<Notify>, Arc<Notify>) {
    let emulator = CosmosEmulator::new();
    emulator.add_account(ENDPOINT, ACCOUNT_KEY);
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let provider = Arc::new(GatedProvider {
        inner: EmulatorClientProvider::new(Arc::clone(&emulator)),
        started: Arc::clone(&started),
        release: Arc::clone(&release),
    });
    let harness = harness_with_provider(emulator, provider, true);
    (Arc::new(harness), started, release)
}

// == Provisioning ==

#[tokio::test]
async fn test_ensure_disabled_never_provisions() {
    let h = harness(false);
    let cancel = CancellationToken::new();

    let database = assert_ok!(h.util.get_named("orders", &cancel).await);

    assert_eq!(database.id(), "orders");
    assert_eq!(h.setup.calls(), 0);
    assert!(!h.emulator.database_exists(ENDPOINT, "orders"));
}

#[tokio::test]
async fn test_ensure_enabled_provisions_once() {
    let h = harness(true);
    let cancel = CancellationToken::new();

    let first = assert_ok!(h.util.get_named("orders", &cancel).await);
    let second = assert_ok!(h.util.get_named("orders", &cancel).await);

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.setup.calls(), 1);
    assert!(h.emulator.database_exists(ENDPOINT, "orders"));
}

#[tokio::test]
async fn test_default_database_from_config() {
    let h = harness(true);

    let database = assert_ok!(h.util.get(&CancellationToken::new()).await);

    assert_eq!(database.id(), "app");
    assert!(h.util.is_cached(&args("app")));
}

// == Memoization ==

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_gets_share_one_handle() {
    let h = harness(true);
    let cancel = CancellationToken::new();

    let handles = join_all((0..16).map(|_| h.util.get_named("orders", &cancel))).await;
    let handles: Vec<_> = handles.into_iter().map(|r| r.unwrap()).collect();

    assert!(handles.iter().all(|db| Arc::ptr_eq(db, &handles[0])));
    assert_eq!(h.setup.calls(), 1);
    assert_eq!(h.util.stats().misses, 1);
}

#[tokio::test]
async fn test_same_name_on_two_endpoints() {
    let h = harness(true);
    let cancel = CancellationToken::new();
    let west = "https://west-acct.documents.azure.com";
    h.emulator.add_account(west, "west-key");

    let east_db = assert_ok!(h.util.get_named("orders", &cancel).await);
    let west_db = assert_ok!(h.util.get_at(west, "west-key", "orders", &cancel).await);

    assert!(!Arc::ptr_eq(&east_db, &west_db));
    assert!(h.emulator.database_exists(ENDPOINT, "orders"));
    assert!(h.emulator.database_exists(west, "orders"));
    assert_eq!(h.util.stats().total_entries, 2);
}

#[tokio::test]
async fn test_explicit_client_is_part_of_the_key() {
    let h = harness(false);
    let cancel = CancellationToken::new();

    // Separate providers open separate client instances.
    let client_a = assert_ok!(
        EmulatorClientProvider::new(Arc::clone(&h.emulator))
            .get_client(ENDPOINT, ACCOUNT_KEY, &cancel)
            .await
    );
    let client_b = assert_ok!(
        EmulatorClientProvider::new(Arc::clone(&h.emulator))
            .get_client(ENDPOINT, ACCOUNT_KEY, &cancel)
            .await
    );

    let a1 = assert_ok!(
        h.util
            .get_with_client("orders", ACCOUNT_KEY, Arc::clone(&client_a), &cancel)
            .await
    );
    let a2 = assert_ok!(
        h.util
            .get_with_client("orders", ACCOUNT_KEY, Arc::clone(&client_a), &cancel)
            .await
    );
    let b = assert_ok!(h.util.get_with_client("orders", ACCOUNT_KEY, client_b, &cancel).await);

    assert!(Arc::ptr_eq(&a1, &a2));
    assert!(!Arc::ptr_eq(&a1, &b));
    assert_eq!(h.util.stats().misses, 2);
}

#[tokio::test]
async fn test_explicit_client_for_another_account_provisions() {
    let h = harness(true);
    let cancel = CancellationToken::new();
    let west = "https://west-acct.documents.azure.com";
    h.emulator.add_account(west, "west-key");

    let west_client = assert_ok!(
        EmulatorClientProvider::new(Arc::clone(&h.emulator))
            .get_client(west, "west-key", &cancel)
            .await
    );

    let database = assert_ok!(
        h.util
            .get_with_client("orders", "west-key", Arc::clone(&west_client), &cancel)
            .await
    );
    assert_eq!(database.id(), "orders");
    assert!(h.emulator.database_exists(west, "orders"));
    assert!(!h.emulator.database_exists(ENDPOINT, "orders"));

    assert_ok!(
        h.util
            .delete_with_client("orders", "west-key", west_client, &cancel)
            .await
    );
    assert!(!h.emulator.database_exists(west, "orders"));
}

// == Failures ==

#[test]
fn test_missing_settings_fail_construction() {
    let emulator = CosmosEmulator::new();
    let provider = Arc::new(EmulatorClientProvider::new(Arc::clone(&emulator)));
    let setup = Arc::new(EmulatorDatabaseSetup::new(emulator));

    let result = DatabaseUtil::new(&Config::new("", "", ""), provider, setup);

    assert!(matches!(result, Err(Error::Config(_))));
}


#[tokio::test]
async fn test_failure_is_retried_on_next_request() {
    let h = harness(true);
    let cancel = CancellationToken::new();

    h.emulator.set_online(ENDPOINT, false);
    let failed = h.util.get_named("orders", &cancel).await;
    match failed {
        Err(Error::Initialization { endpoint, .. }) => assert_eq!(endpoint, ENDPOINT),
        other => panic!("expected initialization error, got {other:?}"),
    }
    assert!(!h.util.is_cached(&args("orders")));

    h.emulator.set_online(ENDPOINT, true);
    assert_ok!(h.util.get_named("orders", &cancel).await);

    let stats = h.util.stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.failures, 1);
}

#[tokio::test]
async fn test_wrong_account_key_fails_without_caching() {
    let h = harness(true);
    let cancel = CancellationToken::new();

    let result = h.util.get_at(ENDPOINT, "stale-key", "orders", &cancel).await;

    assert!(matches!(result, Err(Error::Initialization { .. })));
    assert_eq!(h.util.stats().total_entries, 0);
}

// == Delete ==

#[tokio::test]
async fn test_delete_then_get_recreates() {
    let h = harness(true);
    let cancel = CancellationToken::new();

    let before = assert_ok!(h.util.get_named("orders", &cancel).await);
    assert_ok!(h.util.delete_named("orders", &cancel).await);

    assert!(!h.emulator.database_exists(ENDPOINT, "orders"));
    assert!(!h.util.is_cached(&args("orders")));

    let after = assert_ok!(h.util.get_named("orders", &cancel).await);
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(h.setup.calls(), 2);
    assert!(h.emulator.database_exists(ENDPOINT, "orders"));
}

#[tokio::test]
async fn test_failed_remote_delete_keeps_entry() {
    let h = harness(true);
    let cancel = CancellationToken::new();

    let before = assert_ok!(h.util.get_named("orders", &cancel).await);

    h.emulator.set_online(ENDPOINT, false);
    assert_err!(h.util.delete_named("orders", &cancel).await);
    assert!(h.util.is_cached(&args("orders")));

    h.emulator.set_online(ENDPOINT, true);
    let after = assert_ok!(h.util.get_named("orders", &cancel).await);
    assert!(Arc::ptr_eq(&before, &after));
    assert!(h.emulator.database_exists(ENDPOINT, "orders"));
}

#[tokio::test]
async fn test_delete_default_database() {
    let h = harness(true);
    let cancel = CancellationToken::new();

    assert_ok!(h.util.delete(&cancel).await);

    assert!(!h.emulator.database_exists(ENDPOINT, "app"));
    assert_eq!(h.util.stats().evictions, 1);
}

#[tokio::test]
async fn test_delete_waits_for_in_flight_get() {
    let (h, started, release) = gated_harness();

    let getter = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.util.get_named("orders", &CancellationToken::new()).await })
    };
    started.notified().await;

    let deleter = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.util.delete_named("orders", &CancellationToken::new()).await })
    };
    release.notify_one();

    let database = getter.await.unwrap().unwrap();
    assert_eq!(database.id(), "orders");
    assert_ok!(deleter.await.unwrap());

    assert!(!h.util.is_cached(&args("orders")));
    assert!(!h.emulator.database_exists(ENDPOINT, "orders"));
}

// == Cancellation & Disposal ==

#[tokio::test]
async fn test_cancelled_caller_does_not_affect_others() {
    let (h, started, release) = gated_harness();
    let cancel = CancellationToken::new();

    let cancelled = {
        let h = Arc::clone(&h);
        let cancel = cancel.clone();
        tokio::spawn(async move { h.util.get_named("orders", &cancel).await })
    };
    started.notified().await;

    let patient = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.util.get_named("orders", &CancellationToken::new()).await })
    };

    cancel.cancel();
    assert!(matches!(cancelled.await.unwrap(), Err(Error::Cancelled)));

    release.notify_one();
    assert_ok!(patient.await.unwrap());
    assert!(h.util.is_cached(&args("orders")));
}

#[tokio::test]
async fn test_dispose_fails_fast() {
    let h = harness(true);
    let cancel = CancellationToken::new();
    assert_ok!(h.util.get_named("orders", &cancel).await);

    h.util.dispose();

    assert!(matches!(h.util.get_named("orders", &cancel).await, Err(Error::Disposed)));
    assert!(matches!(h.util.delete_named("orders", &cancel).await, Err(Error::Disposed)));
    assert!(h.emulator.database_exists(ENDPOINT, "orders"));
}
