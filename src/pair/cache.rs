//! SharedStreamCache: one upstream execution per key
//!
//! The first subscription for a key registers an entry and spawns a driver
//! task that runs the upstream factory exactly once and fans values out
//! through a broadcast channel. Later subscriptions for the same key attach
//! to that entry instead of building a new upstream.
//!
//! # Entry lifecycle
//!
//! ```text
//! subscribe(key) ── absent ──▶ register + spawn driver
//!       │                          │
//!    present                       ▼
//!       │                   upstream values ──▶ broadcast (+ latest slot)
//!       ▼                          │
//!    attach ◀──────────────────────┘
//!
//! terminal: completion | error | idle timeout | shutdown
//!       ──▶ remove entry ──▶ deliver error (if any) ──▶ close channel
//! ```
//!
//! Entries are retired on terminal signals only. With `idle_timeout_ms`
//! set, an entry left without subscribers for that long is torn down too.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

use crate::config::PairCacheConfig;
use crate::error::PairError;
use crate::stream::broadcast_stream;

type Item<T> = Result<T, PairError>;
type EntryMap<T> = Mutex<HashMap<String, Arc<CacheEntry<T>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct EntryState<T> {
    tx: Option<broadcast::Sender<Item<T>>>,
    latest: Option<T>,
}

struct CacheEntry<T> {
    key: String,
    replay_latest: bool,
    state: Mutex<EntryState<T>>,
    /// Signalled whenever a subscription is dropped.
    released: Notify,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<T> CacheEntry<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new(key: &str, config: &PairCacheConfig) -> Arc<Self> {
        let (tx, _) = broadcast::channel(config.channel_capacity);
        Arc::new(Self {
            key: key.to_string(),
            replay_latest: config.replay_latest,
            state: Mutex::new(EntryState {
                tx: Some(tx),
                latest: None,
            }),
            released: Notify::new(),
            driver: Mutex::new(None),
        })
    }

    fn attach(self: &Arc<Self>) -> SharedSubscription<T> {
        let id = Uuid::new_v4();
        let state = lock(&self.state);
        let inner = match &state.tx {
            Some(tx) => {
                let rx = tx.subscribe();
                let replay = if self.replay_latest {
                    state.latest.clone().map(Ok)
                } else {
                    None
                };
                stream::iter(replay).chain(broadcast_stream(rx)).boxed()
            }
            None => stream::empty().boxed(),
        };
        log::debug!("Subscription {} attached to {}", id, self.key);
        SharedSubscription {
            id,
            inner: Some(inner),
            entry: Arc::downgrade(self),
        }
    }

    fn publish(&self, value: T) {
        let mut state = lock(&self.state);
        if self.replay_latest {
            state.latest = Some(value.clone());
        }
        if let Some(tx) = &state.tx {
            // Zero receivers is not an error; the value stays in `latest`.
            let _ = tx.send(Ok(value));
        }
    }

    fn receiver_count(&self) -> usize {
        lock(&self.state)
            .tx
            .as_ref()
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl<T> CacheEntry<T> {
    /// Deliver the terminal error, if any, then close the channel.
    fn close(&self, error: Option<PairError>) {
        let mut state = lock(&self.state);
        if let (Some(tx), Some(error)) = (&state.tx, error) {
            let _ = tx.send(Err(error));
        }
        state.tx = None;
        state.latest = None;
    }
}

enum Terminal {
    Completed,
    Failed(PairError),
    Idle,
}

/// A registry of shared upstream executions keyed by string.
///
/// Owned, not global: independent caches never observe each other's entries.
/// Dropping the cache shuts it down.
pub struct SharedStreamCache<T> {
    config: PairCacheConfig,
    entries: Arc<EntryMap<T>>,
}

impl<T> SharedStreamCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Fails with [`PairError::Config`] if `config` does not validate.
    pub fn new(config: PairCacheConfig) -> Result<Self, PairError> {
        config.validate()?;
        Ok(Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Subscribe to the shared execution for `key`, registering it with
    /// `factory` if none is running.
    ///
    /// `factory` runs at most once, on the spawned driver task, and only when
    /// this call registers the entry. Must be called within a tokio runtime.
    pub fn subscribe<F, S>(&self, key: &str, factory: F) -> SharedSubscription<T>
    where
        F: FnOnce() -> S + Send + 'static,
        S: Stream<Item = Item<T>> + Send + 'static,
    {
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get(key) {
            return entry.attach();
        }

        let entry = CacheEntry::new(key, &self.config);
        entries.insert(key.to_string(), Arc::clone(&entry));
        // Attach before the driver starts so no early value is missed.
        let subscription = entry.attach();

        log::debug!("Starting shared stream for {}", key);
        let driver = tokio::spawn(drive(
            Arc::clone(&entry),
            Arc::downgrade(&self.entries),
            factory,
            self.config.idle_timeout(),
        ));
        *lock(&entry.driver) = Some(driver);

        subscription
    }

    pub fn contains_key(&self, key: &str) -> bool {
        lock(&self.entries).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Tear down every entry. Current subscriptions end; later subscriptions
    /// start fresh executions.
    pub fn shutdown(&self) {
        let count = teardown(&self.entries);
        if count > 0 {
            log::info!("Shut down {} shared streams", count);
        }
    }
}

impl<T> Drop for SharedStreamCache<T> {
    fn drop(&mut self) {
        teardown(&self.entries);
    }
}

/// Abort every driver and close every entry. Returns how many were removed.
fn teardown<T>(entries: &EntryMap<T>) -> usize {
    let drained: Vec<Arc<CacheEntry<T>>> =
        lock(entries).drain().map(|(_, entry)| entry).collect();
    for entry in &drained {
        if let Some(driver) = lock(&entry.driver).take() {
            driver.abort();
        }
        entry.close(None);
    }
    drained.len()
}

/// Remove `entry` from the registry if it is still the registered one.
fn retire<T>(entries: &Weak<EntryMap<T>>, entry: &Arc<CacheEntry<T>>) {
    let Some(entries) = entries.upgrade() else {
        return;
    };
    let mut entries = lock(&entries);
    if entries
        .get(&entry.key)
        .is_some_and(|current| Arc::ptr_eq(current, entry))
    {
        entries.remove(&entry.key);
    }
}

async fn drive<T, F, S>(
    entry: Arc<CacheEntry<T>>,
    entries: Weak<EntryMap<T>>,
    factory: F,
    idle_timeout: Option<Duration>,
) where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> S,
    S: Stream<Item = Item<T>> + Send + 'static,
{
    let mut upstream = factory().boxed();
    let mut idle_deadline: Option<Instant> = None;

    let terminal = loop {
        tokio::select! {
            item = upstream.next() => match item {
                Some(Ok(value)) => entry.publish(value),
                Some(Err(e)) => break Terminal::Failed(e),
                None => break Terminal::Completed,
            },
            _ = entry.released.notified(), if idle_timeout.is_some() => {
                if entry.receiver_count() == 0 {
                    idle_deadline = idle_timeout.map(|timeout| Instant::now() + timeout);
                }
            }
            _ = sleep_until(idle_deadline.unwrap_or_else(Instant::now)), if idle_deadline.is_some() => {
                if entry.receiver_count() == 0 {
                    break Terminal::Idle;
                }
                idle_deadline = None;
            }
        }
    };

    // Drop the upstream first so its external subscriptions are released.
    drop(upstream);
    retire(&entries, &entry);
    match terminal {
        Terminal::Completed => {
            log::debug!("Shared stream for {} completed", entry.key);
            entry.close(None);
        }
        Terminal::Failed(e) => {
            log::debug!("Shared stream for {} failed: {}", entry.key, e);
            entry.close(Some(e));
        }
        Terminal::Idle => {
            log::info!("Shared stream for {} idle, tearing down", entry.key);
            entry.close(None);
        }
    }
    lock(&entry.driver).take();
}

/// One subscriber's view of a shared stream.
pub struct SharedSubscription<T> {
    id: Uuid,
    inner: Option<BoxStream<'static, Item<T>>>,
    entry: Weak<CacheEntry<T>>,
}

impl<T> Stream for SharedSubscription<T> {
    type Item = Item<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut() {
            Some(inner) => inner.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}

impl<T> Drop for SharedSubscription<T> {
    fn drop(&mut self) {
        // Release the receiver before signalling so the driver sees the
        // updated subscriber count.
        self.inner.take();
        if let Some(entry) = self.entry.upgrade() {
            log::debug!("Subscription {} released from {}", self.id, entry.key);
            entry.released.notify_one();
        }
    }
}
