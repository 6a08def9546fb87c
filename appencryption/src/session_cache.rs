//! Session caching implementation for the application encryption library
//!
//! Sessions are pinned while in use: `get` increments a per-entry use count and
//! `close` (called on the returned `Encryption`) decrements it. Eviction — by
//! TTL or by size — only ever removes an entry whose use count has dropped to
//! zero; a session under active use survives both its TTL and cache pressure.
//! If every cached entry is pinned when a new partition is requested, the
//! cache grows past `max_size` rather than blocking or dropping work, and logs
//! a warning so operators can see the overflow.

use crate::error::Result;
use crate::session::EnvelopeSession;
use crate::Encryption;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Interface for session caching
pub trait SessionCache: Send + Sync {
    /// Get a session for the given partition ID
    fn get(&self, id: &str) -> Result<Arc<EnvelopeSession>>;

    /// Returns the number of sessions in the cache
    fn count(&self) -> usize;

    /// Close the session cache and all sessions
    fn close(&self);
}

/// Shared encryption wrapper tracking concurrent session usage so the cache
/// knows when a session is safe to evict.
pub struct SharedEncryption {
    /// Inner encryption implementation
    inner: Arc<dyn Encryption>,

    /// Creation time
    created: Instant,

    /// Use-count pin: incremented on `get`, decremented on `close`.
    use_count: Mutex<usize>,

    /// Last time this entry was handed out, used to pick an LRU victim
    /// among entries with `use_count == 0` and to drive TTL expiry.
    last_used: Mutex<Instant>,

    /// Signalled whenever `use_count` reaches zero.
    drained: Condvar,
}

impl SharedEncryption {
    /// Create a new shared encryption wrapper
    pub fn new(encryption: Arc<dyn Encryption>) -> Self {
        let now = Instant::now();
        Self {
            inner: encryption,
            created: now,
            use_count: Mutex::new(0),
            last_used: Mutex::new(now),
            drained: Condvar::new(),
        }
    }

    /// Pins the entry for a caller and marks it as just-used.
    fn pin(&self) {
        *self.use_count.lock().unwrap() += 1;
        *self.last_used.lock().unwrap() = Instant::now();
    }

    fn use_count(&self) -> usize {
        *self.use_count.lock().unwrap()
    }

    fn last_used(&self) -> Instant {
        *self.last_used.lock().unwrap()
    }

    /// Closes the underlying session. Only called once the cache has already
    /// confirmed `use_count == 0`, so this never blocks in practice; the wait
    /// loop is a safety net against a pin racing the eviction decision.
    fn close_underlying(&self) {
        let mut count = self.use_count.lock().unwrap();
        while *count > 0 {
            count = self.drained.wait(count).unwrap();
        }
        let _ = futures::executor::block_on(self.inner.close());
    }
}

#[async_trait]
impl Encryption for SharedEncryption {
    async fn encrypt_payload(&self, data: &[u8]) -> Result<crate::envelope::DataRowRecord> {
        self.inner.encrypt_payload(data).await
    }

    async fn decrypt_data_row_record(
        &self,
        drr: &crate::envelope::DataRowRecord,
    ) -> Result<Vec<u8>> {
        self.inner.decrypt_data_row_record(drr).await
    }

    async fn close(&self) -> Result<()> {
        let mut count = self.use_count.lock().unwrap();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
        Ok(())
    }

    fn as_any(&self) -> &(dyn std::any::Any + Send + Sync) {
        self
    }
}

impl fmt::Debug for SharedEncryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEncryption")
            .field("created", &self.created)
            .field("use_count", &self.use_count())
            .finish()
    }
}

fn shared_of(session: &Arc<EnvelopeSession>) -> Option<&SharedEncryption> {
    session.encryption.as_any().downcast_ref::<SharedEncryption>()
}

/// Session loader function type
type SessionLoaderFn = Arc<dyn Fn(&str) -> Result<Arc<EnvelopeSession>> + Send + Sync>;

/// Use-count-pinned, TTL-expiring cache of per-partition sessions (C9).
pub struct CacheWrapper {
    loader: SessionLoaderFn,
    max_size: usize,
    ttl: Option<Duration>,
    entries: Mutex<HashMap<String, Arc<EnvelopeSession>>>,
}

impl CacheWrapper {
    /// Create a new cache wrapper
    pub fn new(loader: SessionLoaderFn, max_size: usize, ttl: Option<Duration>) -> Self {
        Self {
            loader,
            max_size,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Ensure the session uses SharedEncryption, so usage can be pinned.
    fn ensure_shared(&self, session: Arc<EnvelopeSession>) -> Arc<EnvelopeSession> {
        if shared_of(&session).is_some() {
            return session;
        }
        let shared = Arc::new(SharedEncryption::new(session.encryption.clone()));
        Arc::new(EnvelopeSession::new(shared))
    }

    /// Removes entries with `use_count == 0` whose TTL has elapsed. Must be
    /// called with `entries` already locked.
    fn sweep_expired_locked(&self, entries: &mut HashMap<String, Arc<EnvelopeSession>>) {
        let Some(ttl) = self.ttl else { return };

        let expired: Vec<String> = entries
            .iter()
            .filter_map(|(id, session)| {
                let shared = shared_of(session)?;
                if shared.use_count() == 0 && shared.last_used().elapsed() >= ttl {
                    Some(id.clone())
                } else {
                    None
                }
            })
            .collect();

        for id in expired {
            if let Some(session) = entries.remove(&id) {
                if let Some(shared) = shared_of(&session) {
                    shared.close_underlying();
                }
            }
        }
    }

    /// Evicts the least-recently-used entry among those with `use_count == 0`
    /// to make room for a new entry. If every entry is pinned, inserts anyway
    /// and logs a warning rather than blocking or rejecting the request —
    /// the spec fixes this "pinned overflow" case as grow-with-warn.
    fn make_room_locked(&self, entries: &mut HashMap<String, Arc<EnvelopeSession>>) {
        if entries.len() < self.max_size {
            return;
        }

        let victim = entries
            .iter()
            .filter_map(|(id, session)| {
                let shared = shared_of(session)?;
                (shared.use_count() == 0).then(|| (id.clone(), shared.last_used()))
            })
            .min_by_key(|(_, last_used)| *last_used)
            .map(|(id, _)| id);

        match victim {
            Some(id) => {
                if let Some(session) = entries.remove(&id) {
                    if let Some(shared) = shared_of(&session) {
                        shared.close_underlying();
                    }
                }
            }
            None => {
                log::warn!(
                    "session cache: all {} cached sessions are pinned, growing past max_size {}",
                    entries.len(),
                    self.max_size
                );
            }
        }
    }

    fn get_or_add(&self, id: &str) -> Result<Arc<EnvelopeSession>> {
        let mut entries = self.entries.lock().unwrap();

        self.sweep_expired_locked(&mut entries);

        if let Some(session) = entries.get(id) {
            if let Some(shared) = shared_of(session) {
                shared.pin();
            }
            return Ok(Arc::clone(session));
        }

        // Building a session is pure object construction (no I/O), so it's
        // safe to build under the lock: concurrent misses for the same `id`
        // serialize here and every caller but the first observes a cache hit,
        // satisfying the single-flight guarantee for session construction.
        let session = self.ensure_shared((self.loader)(id)?);

        self.make_room_locked(&mut entries);

        if let Some(shared) = shared_of(&session) {
            shared.pin();
        }
        entries.insert(id.to_string(), Arc::clone(&session));

        Ok(session)
    }
}

impl SessionCache for CacheWrapper {
    fn get(&self, id: &str) -> Result<Arc<EnvelopeSession>> {
        self.get_or_add(id)
    }

    fn count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    fn close(&self) {
        let mut entries = self.entries.lock().unwrap();
        for (_, session) in entries.drain() {
            if let Some(shared) = shared_of(&session) {
                shared.close_underlying();
            }
        }
    }
}

/// Create a new session cache with default configuration
pub fn new_session_cache(
    loader: impl Fn(&str) -> Result<Arc<EnvelopeSession>> + Send + Sync + 'static,
    max_size: usize,
    expiry: Option<Duration>,
) -> Arc<dyn SessionCache> {
    Arc::new(CacheWrapper::new(Arc::new(loader), max_size, expiry))
}
