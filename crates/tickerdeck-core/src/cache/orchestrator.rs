//! Consumer-facing cache orchestration.
//!
//! A panel attaches to the orchestrator with a key, a category, and a
//! fetcher; it gets back a [`CacheHandle`] publishing the panel's view of
//! that key: current data, load/fetch phase, and the last fetch error.
//! Internally the handle coordinates the persistent store, the freshness
//! predicate, and the fetch coordinator, and optionally owns an interval
//! timer for background revalidation.
//!
//! Several handles may observe the same key. They share one store entry and
//! one in-flight fetch, and a successful fetch triggered by any of them is
//! broadcast so every observer converges on the new value.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::coordinator::{FetchCoordinator, FetchedPayload};
use super::entry::{is_fresh, PayloadCodec};
use super::error::CacheError;
use super::store::CacheStore;

// ============================================================================
// Constants
// ============================================================================

/// Default time-to-live for cached entries, in minutes.
/// Quote and forum panels revalidate on this horizon unless configured.
const DEFAULT_TTL_MINUTES: i64 = 10;

/// Capacity of the cross-attachment update channel
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Consumer-supplied fetch function: must resolve with the typed payload or
/// reject; silently returning partial data would make a failed fetch
/// indistinguishable from an empty result.
pub type Fetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// A successful fetch for one key, broadcast to every live attachment
/// observing that key.
#[derive(Debug, Clone)]
pub struct EntryUpdate {
    pub key: String,
    pub payload: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

/// Shared cache plumbing: the persistent store, the in-flight fetch
/// registry, and the update bus. Explicitly constructed and injected so
/// tests can run isolated instances side by side.
#[derive(Clone)]
pub struct CacheContext {
    store: Arc<CacheStore>,
    coordinator: Arc<FetchCoordinator>,
    updates: broadcast::Sender<EntryUpdate>,
}

impl CacheContext {
    pub fn new(store: Arc<CacheStore>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            store,
            coordinator: Arc::new(FetchCoordinator::new()),
            updates,
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<FetchCoordinator> {
        &self.coordinator
    }
}

/// The public entry point consumers attach to
pub struct CacheOrchestrator {
    ctx: CacheContext,
}

impl CacheOrchestrator {
    pub fn new(ctx: CacheContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &CacheContext {
        &self.ctx
    }

    /// Attach a consumer to a key. Must be called from within a tokio
    /// runtime; background work is spawned onto it.
    pub fn attach<T>(&self, options: CacheOptions<T>) -> CacheHandle<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        CacheHandle::new(self.ctx.clone(), options)
    }
}

// ============================================================================
// Attachment state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePhase {
    /// Not activated (disabled or just constructed)
    Idle,
    /// No value has ever been delivered for this key; a fetch is in flight
    Loading,
    /// Current value delivered and within its TTL at delivery time
    Fresh,
    /// An expired value is displayed; the last revalidation, if any, failed
    Stale,
    /// A value is displayed while a background fetch is in flight
    Revalidating,
    /// A fetch failed and no value is available to show
    Error,
}

/// One attachment's view of a key, published on every change.
#[derive(Debug, Clone)]
pub struct CacheState<T> {
    pub data: Option<T>,
    pub phase: CachePhase,
    pub error: Option<Arc<CacheError>>,
}

impl<T> CacheState<T> {
    fn idle() -> Self {
        Self {
            data: None,
            phase: CachePhase::Idle,
            error: None,
        }
    }

    /// True only while no value, fresh or stale, has ever been delivered
    /// for the current key
    pub fn is_loading(&self) -> bool {
        self.phase == CachePhase::Loading
    }

    /// True whenever a fetch for the current key is in flight, even if
    /// stale data is already shown
    pub fn is_fetching(&self) -> bool {
        matches!(self.phase, CachePhase::Loading | CachePhase::Revalidating)
    }
}

/// Per-attachment configuration
pub struct CacheOptions<T> {
    pub key: String,
    pub category: String,
    pub fetcher: Fetcher<T>,
    pub ttl: Duration,
    pub enabled: bool,
    pub refetch_interval: Option<std::time::Duration>,
    pub stale_while_revalidate: bool,
    pub codec: PayloadCodec<T>,
}

impl<T: serde::Serialize + serde::de::DeserializeOwned> CacheOptions<T> {
    pub fn new(
        key: impl Into<String>,
        category: impl Into<String>,
        fetcher: Fetcher<T>,
    ) -> Self {
        Self {
            key: key.into(),
            category: category.into(),
            fetcher,
            ttl: Duration::minutes(DEFAULT_TTL_MINUTES),
            enabled: true,
            refetch_interval: None,
            stale_while_revalidate: true,
            codec: PayloadCodec::json(),
        }
    }
}

impl<T> CacheOptions<T> {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_refetch_interval(mut self, interval: std::time::Duration) -> Self {
        self.refetch_interval = Some(interval);
        self
    }

    pub fn with_stale_while_revalidate(mut self, swr: bool) -> Self {
        self.stale_while_revalidate = swr;
        self
    }

    pub fn with_codec(mut self, codec: PayloadCodec<T>) -> Self {
        self.codec = codec;
        self
    }
}

// ============================================================================
// Handle internals
// ============================================================================

/// Mutable per-attachment bookkeeping. `generation` increments whenever the
/// key, fetcher, or enablement changes; a settling fetch whose generation no
/// longer matches is discarded without touching consumer-visible state.
struct Current<T> {
    key: String,
    generation: u64,
    enabled: bool,
    /// `stored_at` of the newest value applied to state, deduplicating the
    /// direct fetch result against the broadcast of the same write
    last_applied: Option<DateTime<Utc>>,
    fetcher: Fetcher<T>,
}

struct HandleShared<T> {
    ctx: CacheContext,
    category: String,
    ttl: Duration,
    swr: bool,
    codec: PayloadCodec<T>,
    current: Mutex<Current<T>>,
    state_tx: watch::Sender<CacheState<T>>,
}

impl<T> HandleShared<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Synchronous activation: consult the store, deliver what it holds,
    /// and start a fetch if the entry is missing or expired. Runs inline so
    /// a warm attachment's very first observable state already carries data.
    fn activate_from_store(self: Arc<Self>, generation: u64) {
        let key = {
            let cur = self.current.lock().unwrap();
            if cur.generation != generation || !cur.enabled {
                return;
            }
            cur.key.clone()
        };

        let now = Utc::now();
        if let Some(entry) = self.ctx.store.get(&key) {
            let fresh = is_fresh(&entry, self.ttl, now);
            match (self.codec.deserialize)(&entry.payload) {
                Ok(value) if fresh => {
                    self.publish_value(generation, value, entry.stored_at);
                    return;
                }
                Ok(value) if self.swr => {
                    // Expired entry: deliver it immediately and revalidate
                    // behind it
                    {
                        let mut cur = self.current.lock().unwrap();
                        if cur.generation != generation || !cur.enabled {
                            return;
                        }
                        cur.last_applied = Some(entry.stored_at);
                    }
                    self.state_tx.send_replace(CacheState {
                        data: Some(value),
                        phase: CachePhase::Revalidating,
                        error: None,
                    });
                    self.spawn_fetch(generation);
                    return;
                }
                Ok(_) => {
                    // Expired and stale-while-revalidate is off: fall
                    // through to a foreground load
                }
                Err(e) => {
                    debug!(key = %key, error = %e, "Cached payload failed to decode, treating as miss");
                }
            }
        }

        self.state_tx.send_replace(CacheState {
            data: None,
            phase: CachePhase::Loading,
            error: None,
        });
        self.spawn_fetch(generation);
    }

    fn spawn_fetch(self: Arc<Self>, generation: u64) {
        tokio::spawn(async move {
            self.run_fetch(generation).await;
        });
    }

    /// Fetch through the coordinator and apply the outcome, unless the
    /// attachment moved on while the fetch was pending.
    async fn run_fetch(self: Arc<Self>, generation: u64) {
        let (key, fetcher) = {
            let cur = self.current.lock().unwrap();
            if cur.generation != generation || !cur.enabled {
                return;
            }
            (cur.key.clone(), Arc::clone(&cur.fetcher))
        };

        let job = self.fetch_job(&key, fetcher);
        let result = self.ctx.coordinator.fetch(&key, job).await;
        self.apply_fetch_outcome(generation, result);
    }

    /// Build the shared fetch job for `key`. The store write and the
    /// cross-attachment broadcast happen inside the job, before settlement,
    /// so every waiter and any later reader observes the persisted value.
    fn fetch_job(
        &self,
        key: &str,
        fetcher: Fetcher<T>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<FetchedPayload, CacheError>> {
        let serialize = self.codec.serialize;
        let store = Arc::clone(&self.ctx.store);
        let updates = self.ctx.updates.clone();
        let category = self.category.clone();
        let key = key.to_string();

        move || {
            async move {
                let value = fetcher().await.map_err(CacheError::FetchFailed)?;
                let payload =
                    serialize(&value).map_err(|e| CacheError::Codec(e.to_string()))?;
                let stored_at = Utc::now();

                if let Err(e) = store.put(&key, &category, payload.clone(), stored_at) {
                    warn!(key = %key, error = %e, "Cache write failed, serving fetched value uncached");
                }
                let _ = updates.send(EntryUpdate {
                    key,
                    payload: payload.clone(),
                    stored_at,
                });

                Ok(FetchedPayload { payload, stored_at })
            }
            .boxed()
        }
    }

    fn apply_fetch_outcome(
        &self,
        generation: u64,
        result: Result<FetchedPayload, Arc<CacheError>>,
    ) {
        match result {
            Ok(fetched) => match (self.codec.deserialize)(&fetched.payload) {
                Ok(value) => self.publish_value(generation, value, fetched.stored_at),
                Err(e) => self.fail(generation, Arc::new(CacheError::Codec(e.to_string()))),
            },
            Err(err) => self.fail(generation, err),
        }
    }

    /// Mark the attachment as fetching without touching delivered data
    fn begin_revalidate(&self, generation: u64) {
        {
            let cur = self.current.lock().unwrap();
            if cur.generation != generation || !cur.enabled {
                return;
            }
        }
        self.state_tx.send_modify(|state| {
            state.phase = if state.data.is_some() {
                CachePhase::Revalidating
            } else {
                CachePhase::Loading
            };
        });
    }

    /// Apply a successfully fetched value, if this attachment still cares
    fn publish_value(&self, generation: u64, value: T, stored_at: DateTime<Utc>) {
        {
            let mut cur = self.current.lock().unwrap();
            if cur.generation != generation || !cur.enabled {
                debug!(key = %cur.key, "Discarding fetch result for superseded attachment");
                return;
            }
            if cur.last_applied.map_or(false, |t| stored_at <= t) {
                return;
            }
            cur.last_applied = Some(stored_at);
        }
        self.state_tx.send_replace(CacheState {
            data: Some(value),
            phase: CachePhase::Fresh,
            error: None,
        });
    }

    /// Surface a fetch failure. Shown data survives: a failed revalidation
    /// leaves the stale value in place with the error set beside it.
    fn fail(&self, generation: u64, err: Arc<CacheError>) {
        {
            let cur = self.current.lock().unwrap();
            if cur.generation != generation || !cur.enabled {
                debug!(key = %cur.key, "Discarding fetch failure for superseded attachment");
                return;
            }
        }
        self.state_tx.send_modify(|state| {
            state.error = Some(err);
            state.phase = if state.data.is_some() {
                CachePhase::Stale
            } else {
                CachePhase::Error
            };
        });
    }

    /// Apply a broadcast write from any attachment observing this key
    fn apply_update(&self, update: EntryUpdate) {
        let generation = {
            let cur = self.current.lock().unwrap();
            if !cur.enabled || cur.key != update.key {
                return;
            }
            cur.generation
        };
        match (self.codec.deserialize)(&update.payload) {
            Ok(value) => self.publish_value(generation, value, update.stored_at),
            Err(e) => {
                debug!(key = %update.key, error = %e, "Ignoring broadcast update with undecodable payload");
            }
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// One consumer's live attachment to a cache key.
///
/// Dropping the handle cancels its timer and listener and stops all writes
/// to its state; an in-flight fetch shared with other attachments keeps
/// running and still persists its result for them.
pub struct CacheHandle<T> {
    shared: Arc<HandleShared<T>>,
    refetch_interval: Option<std::time::Duration>,
    timer: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<T> CacheHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new(ctx: CacheContext, options: CacheOptions<T>) -> Self {
        let CacheOptions {
            key,
            category,
            fetcher,
            ttl,
            enabled,
            refetch_interval,
            stale_while_revalidate,
            codec,
        } = options;

        let (state_tx, _) = watch::channel(CacheState::idle());
        let shared = Arc::new(HandleShared {
            ctx,
            category,
            ttl,
            swr: stale_while_revalidate,
            codec,
            current: Mutex::new(Current {
                key,
                generation: 0,
                enabled,
                last_applied: None,
                fetcher,
            }),
            state_tx,
        });

        let handle = Self {
            shared,
            refetch_interval,
            timer: Mutex::new(None),
            listener: Mutex::new(None),
        };
        if enabled {
            handle.activate();
        }
        handle
    }

    /// Current view of the key
    pub fn state(&self) -> CacheState<T> {
        self.shared.state_tx.borrow().clone()
    }

    /// Watch for state changes
    pub fn subscribe(&self) -> watch::Receiver<CacheState<T>> {
        self.shared.state_tx.subscribe()
    }

    /// Revalidate now. With `force`, the stored entry is invalidated first
    /// so the fetch cannot be satisfied by TTL (pull-to-refresh).
    ///
    /// Never returns an error: fetch failures are delivered through the
    /// `error` field of the state.
    pub async fn refresh(&self, force: bool) {
        let (generation, key) = {
            let cur = self.shared.current.lock().unwrap();
            if !cur.enabled {
                return;
            }
            (cur.generation, cur.key.clone())
        };

        if force {
            if let Err(e) = self.shared.ctx.store.invalidate(&key) {
                warn!(key = %key, error = %e, "Failed to invalidate entry for forced refresh");
            }
        }

        self.shared.begin_revalidate(generation);
        Arc::clone(&self.shared).run_fetch(generation).await;
    }

    /// Re-point the attachment at a new key and fetcher (e.g. the user
    /// switched forum categories). A fetch still pending for the old key
    /// runs to completion and persists, but its result is never applied to
    /// this attachment's state.
    pub fn set_key(&self, key: impl Into<String>, fetcher: Fetcher<T>) {
        let key = key.into();
        let generation = {
            let mut cur = self.shared.current.lock().unwrap();
            cur.key = key;
            cur.fetcher = fetcher;
            cur.generation += 1;
            cur.last_applied = None;
            if !cur.enabled {
                return;
            }
            cur.generation
        };
        self.shared.state_tx.send_replace(CacheState::idle());
        Arc::clone(&self.shared).activate_from_store(generation);
    }

    /// Enable or disable the attachment. Disabled attachments perform no
    /// reads, no writes, and run no timers; panels use this to defer
    /// fetching until a tab is actually opened.
    pub fn set_enabled(&self, enabled: bool) {
        {
            let mut cur = self.shared.current.lock().unwrap();
            if cur.enabled == enabled {
                return;
            }
            cur.enabled = enabled;
            cur.generation += 1;
            cur.last_applied = None;
        }
        if enabled {
            self.activate();
        } else {
            self.stop_tasks();
            self.shared.state_tx.send_replace(CacheState::idle());
        }
    }

    fn activate(&self) {
        let generation = self.shared.current.lock().unwrap().generation;
        self.start_listener();
        self.start_timer();
        Arc::clone(&self.shared).activate_from_store(generation);
    }

    fn start_listener(&self) {
        let mut slot = self.listener.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let mut rx = shared.ctx.updates.subscribe();
        *slot = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(update) => shared.apply_update(update),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped = skipped, "Cache update listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Interval revalidation fires on schedule regardless of staleness.
    /// The key and generation are re-read at each firing, so the timer
    /// follows re-keying without restarting.
    fn start_timer(&self) {
        let Some(interval) = self.refetch_interval else {
            return;
        };
        let mut slot = self.timer.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let generation = {
                    let cur = shared.current.lock().unwrap();
                    if !cur.enabled {
                        break;
                    }
                    cur.generation
                };
                shared.begin_revalidate(generation);
                Arc::clone(&shared).run_fetch(generation).await;
            }
        }));
    }
}

impl<T> CacheHandle<T> {
    fn stop_tasks(&self) {
        if let Ok(mut slot) = self.timer.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        if let Ok(mut slot) = self.listener.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

impl<T> Drop for CacheHandle<T> {
    fn drop(&mut self) {
        if let Ok(mut cur) = self.shared.current.lock() {
            cur.enabled = false;
            cur.generation += 1;
        }
        self.stop_tasks();
    }
}

// ============================================================================
// Tests
// ============================================================================
