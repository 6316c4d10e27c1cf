//! Lazy Cache Module
//!
//! Keyed single-flight memoization. The first caller for a key installs an
//! in-flight placeholder and spawns the factory; concurrent callers join that
//! placeholder. Success is published as a ready entry, failure clears the slot
//! so the next call retries.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::entry::{CacheEntry, Channel, EntryState};
use crate::cache::stats::{CacheStats, StatsRecorder};
use crate::error::{Error, Result};
use crate::utils::CallOnDrop;

/// Future returned by a cache factory.
pub type FactoryFuture<V> = BoxFuture<'static, Result<V>>;

/// Produces the value for a key from its arguments.
///
/// The token is cancelled when the cache is disposed, never by an individual
/// caller.
pub type Factory<K, A, V> = Arc<dyn Fn(K, A, CancellationToken) -> FactoryFuture<V> + Send + Sync>;

// == Table ==
struct Table<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    disposed: bool,
}

/// State shared between the cache and its running initialization tasks.
struct Inner<K, V> {
    table: RwLock<Table<K, V>>,
    stats: StatsRecorder,
    shutdown: CancellationToken,
}

impl<K, V> Inner<K, V> {
    /// Marks the table disposed and releases all waiters.
    ///
    /// Returns the number of entries dropped, or `None` if already disposed.
    fn dispose(&self) -> Option<usize> {
        let drained = {
            let mut table = self.table.write();
            if table.disposed {
                return None;
            }
            table.disposed = true;
            std::mem::take(&mut table.entries)
        };
        self.shutdown.cancel();
        Some(drained.len())
    }
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
{
    /// Publishes the outcome of `attempt` if its placeholder is still current.
    fn complete(&self, key: &K, attempt: u64, result: &Result<V>) {
        let mut table = self.table.write();
        let current = table
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_attempt(attempt));

        if !current {
            debug!(
                "Discarding result of superseded initialization for {:?} (attempt {})",
                key, attempt
            );
            return;
        }

        match result {
            Ok(value) => {
                table.entries.insert(key.clone(), CacheEntry::ready(value.clone()));
                debug!("Initialized {:?} (attempt {})", key, attempt);
            }
            Err(err) => {
                table.entries.remove(key);
                self.stats.record_failure();
                debug!(
                    "Initialization of {:?} failed, slot cleared for retry: {}",
                    key, err
                );
            }
        }
    }

    /// Clears the placeholder of an attempt that ended without publishing.
    fn abandon(&self, key: &K, attempt: u64) {
        let mut table = self.table.write();
        if table
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_attempt(attempt))
        {
            table.entries.remove(key);
            self.stats.record_failure();
            warn!(
                "Initialization of {:?} ended without a result, slot cleared",
                key
            );
        }
    }
}

enum Lookup<V> {
    Ready(V),
    Wait(Channel<V>),
}

// == Lazy Cache ==
/// Keyed single-flight memoization cache.
///
/// For each key at most one factory invocation runs at a time and a
/// successful value is produced once until it is removed. Factories run as
/// tokio tasks, so [`get`](Self::get) must be called within a tokio runtime.
///
/// Dropping the cache disposes it.
pub struct LazyCache<K, V, A> {
    inner: Arc<Inner<K, V>>,
    factory: Factory<K, A, V>,
    next_attempt: AtomicU64,
}

impl<K, V, A> LazyCache<K, V, A>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    // == Constructor ==
    /// Creates an empty cache backed by `factory`.
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn(K, A, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let factory: Factory<K, A, V> = Arc::new(
            move |key: K, args: A, token: CancellationToken| -> FactoryFuture<V> {
                factory(key, args, token).boxed()
            },
        );

        Self {
            inner: Arc::new(Inner {
                table: RwLock::new(Table {
                    entries: HashMap::new(),
                    disposed: false,
                }),
                stats: StatsRecorder::default(),
                shutdown: CancellationToken::new(),
            }),
            factory,
            next_attempt: AtomicU64::new(0),
        }
    }

    // == Get ==
    /// Returns the value for `key`, running the factory with `args` if no
    /// value is cached and no attempt is in flight.
    ///
    /// `args` is dropped when the call joins an existing attempt. Cancelling
    /// `cancel` abandons this caller's wait only; the attempt keeps running
    /// for everyone else.
    ///
    /// # Errors
    /// - the factory's error, shared by every caller of the failed attempt
    /// - [`Error::Cancelled`] if `cancel` fires first
    /// - [`Error::Disposed`] if the cache is or becomes disposed
    /// - [`Error::Interrupted`] if the factory panicked
    /// - [`Error::NoRuntime`] if an initialization is needed outside a tokio
    ///   runtime
    pub async fn get(&self, key: K, args: A, cancel: &CancellationToken) -> Result<V> {
        if let Some(value) = self.lookup_ready(&key)? {
            return Ok(value);
        }

        match self.join_or_start(key, args)? {
            Lookup::Ready(value) => Ok(value),
            Lookup::Wait(channel) => self.wait(channel, cancel).await,
        }
    }

    /// Fast path: a ready value under the read lock.
    fn lookup_ready(&self, key: &K) -> Result<Option<V>> {
        let table = self.inner.table.read();
        if table.disposed {
            return Err(Error::Disposed);
        }
        match table.entries.get(key) {
            Some(CacheEntry::Ready { value, .. }) => {
                self.inner.stats.record_hit();
                Ok(Some(value.clone()))
            }
            _ => Ok(None),
        }
    }

    /// Slow path: re-check under the write lock, then join or start.
    fn join_or_start(&self, key: K, args: A) -> Result<Lookup<V>> {
        let mut table = self.inner.table.write();
        if table.disposed {
            return Err(Error::Disposed);
        }

        match table.entries.get(&key) {
            Some(CacheEntry::Ready { value, .. }) => {
                self.inner.stats.record_hit();
                return Ok(Lookup::Ready(value.clone()));
            }
            Some(CacheEntry::InFlight { channel, .. }) => {
                self.inner.stats.record_coalesced();
                debug!("Joining in-flight initialization of {:?}", key);
                return Ok(Lookup::Wait(channel.clone()));
            }
            None => {}
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = futures::channel::oneshot::channel();
        let channel: Channel<V> = receiver.shared();
        table
            .entries
            .insert(key.clone(), CacheEntry::in_flight(attempt, channel.clone()));
        self.inner.stats.record_miss();
        drop(table);

        self.spawn_attempt(&runtime, key, args, attempt, sender);
        Ok(Lookup::Wait(channel))
    }

    /// Spawns the factory for `attempt`, whose placeholder is already in
    /// the table.
    ///
    /// Must be called without the table lock: a task dropped before it runs
    /// clears its slot from this thread.
    fn spawn_attempt(
        &self,
        runtime: &tokio::runtime::Handle,
        key: K,
        args: A,
        attempt: u64,
        sender: futures::channel::oneshot::Sender<Result<V>>,
    ) {
        let inner = Arc::clone(&self.inner);
        let factory = Arc::clone(&self.factory);
        let shutdown = self.inner.shutdown.clone();

        let abandon_token = CallOnDrop::new({
            let inner = Arc::clone(&inner);
            let key = key.clone();
            move || inner.abandon(&key, attempt)
        });

        debug!("Starting initialization of {:?} (attempt {})", key, attempt);
        runtime.spawn(async move {
            // Dropped in reverse order: the slot is cleared before waiters
            // observe a dropped sender.
            let sender = sender;
            let _abandon_token = abandon_token;
            let computation = factory(key.clone(), args, shutdown.child_token());

            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => Err(Error::Disposed),
                result = computation => result,
            };

            inner.complete(&key, attempt, &result);
            sender.send(result).ok();
        });
    }

    async fn wait(&self, channel: Channel<V>, cancel: &CancellationToken) -> Result<V> {
        tokio::select! {
            biased;
            outcome = channel => outcome.unwrap_or(Err(Error::Interrupted)),
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = self.inner.shutdown.cancelled() => Err(Error::Disposed),
        }
    }

    // == Remove ==
    /// Forgets any entry for `key`.
    ///
    /// An in-flight attempt is not cancelled: its current waiters still
    /// receive its result, but the result is not stored. Returns whether an
    /// entry existed.
    pub fn remove(&self, key: &K) -> Result<bool> {
        let mut table = self.inner.table.write();
        if table.disposed {
            return Err(Error::Disposed);
        }

        match table.entries.remove(key) {
            Some(entry) => {
                self.inner.stats.record_eviction();
                if entry.is_ready() {
                    debug!("Evicted {:?}", key);
                } else {
                    debug!("Forgot in-flight initialization of {:?}", key);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // == Introspection ==
    /// Returns the state of `key`, if any.
    pub fn state(&self, key: &K) -> Option<EntryState> {
        self.inner.table.read().entries.get(key).map(CacheEntry::state)
    }

    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let ready = self
            .inner
            .table
            .read()
            .entries
            .values()
            .filter(|entry| entry.is_ready())
            .count();
        self.inner.stats.snapshot(ready)
    }
}

impl<K, V, A> LazyCache<K, V, A> {
    // == Dispose ==
    /// Terminates the cache.
    ///
    /// Running factories are dropped, current waiters receive
    /// [`Error::Disposed`] and later calls fail fast. Idempotent.
    pub fn dispose(&self) {
        if let Some(released) = self.inner.dispose() {
            debug!("Lazy cache disposed, released {} entries", released);
        }
    }

    /// Returns true once [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.table.read().disposed
    }

    /// Returns the number of entries in any state.
    pub fn len(&self) -> usize {
        self.inner.table.read().entries.len()
    }

    /// Returns true if no entry is cached or in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V, A> Drop for LazyCache<K, V, A> {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl<K, V, A> fmt::Debug for LazyCache<K, V, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.inner.table.read();
        f.debug_struct("LazyCache")
            .field("entries", &table.entries.len())
            .field("disposed", &table.disposed)
            .finish()
    }
}
