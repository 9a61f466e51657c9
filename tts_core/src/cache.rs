//! Per-voice conditioning state, built once and shared.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use lru::LruCache;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::backend::InferenceBackend;
use crate::error::{BackendError, TtsError, TtsResult};
use crate::voice::VoiceKey;

type Slot<S> = Arc<OnceCell<Arc<S>>>;

/// Cache counters, exposed through the service metrics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub lookups: u64,
    pub constructions: u64,
    pub failures: u64,
}

/// Load-or-create cache of voice states keyed by [`VoiceKey`].
///
/// The map lock is held only to find or insert a key's slot. Construction runs
/// on the blocking pool inside that slot's `OnceCell`, so concurrent misses on
/// one key share a single build while other keys proceed independently.
pub struct VoiceCache<B: InferenceBackend> {
    backend: Arc<B>,
    entries: Mutex<LruCache<VoiceKey, Slot<B::State>>>,
    lookups: AtomicU64,
    constructions: AtomicU64,
    failures: AtomicU64,
}

impl<B: InferenceBackend> VoiceCache<B> {
    /// `capacity` of `None` keeps every voice for the process lifetime.
    pub fn new(backend: Arc<B>, capacity: Option<NonZeroUsize>) -> Self {
        let entries = match capacity {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self {
            backend,
            entries: Mutex::new(entries),
            lookups: AtomicU64::new(0),
            constructions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<VoiceKey, Slot<B::State>>> {
        // Entries stay consistent even if a holder panicked; the lock never spans a build.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, key: &VoiceKey) -> Slot<B::State> {
        let mut entries = self.lock();
        if let Some(slot) = entries.get(key) {
            return Arc::clone(slot);
        }
        let slot: Slot<B::State> = Arc::new(OnceCell::new());
        if let Some((evicted, _)) = entries.push(key.clone(), Arc::clone(&slot)) {
            debug!(voice = %evicted, "evicted voice state");
        }
        slot
    }

    /// Return the cached state for `key`, building it on first use.
    pub async fn get_or_create(&self, key: &VoiceKey) -> TtsResult<Arc<B::State>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let slot = self.slot(key);
        if let Some(state) = slot.get() {
            return Ok(Arc::clone(state));
        }

        let result = slot
            .get_or_try_init(|| async move {
                self.constructions.fetch_add(1, Ordering::Relaxed);
                self.build(key).await
            })
            .await;

        match result {
            Ok(state) => Ok(Arc::clone(state)),
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.forget_failed(key, &slot);
                Err(err)
            }
        }
    }

    async fn build(&self, key: &VoiceKey) -> TtsResult<Arc<B::State>> {
        let started = Instant::now();
        let backend = Arc::clone(&self.backend);
        let resource = key.clone();
        let built = tokio::task::spawn_blocking(move || backend.build_state(&resource))
            .await
            .map_err(|e| TtsError::Worker(e.to_string()))?;

        match built {
            Ok(state) => {
                info!(voice = %key, elapsed_ms = started.elapsed().as_millis() as u64, "loaded voice state");
                Ok(Arc::new(state))
            }
            Err(source) => {
                warn!(voice = %key, error = %source, "failed to load voice state");
                Err(voice_load_error(key, source))
            }
        }
    }

    // A failed build must not poison the key: drop the empty slot so the next
    // request retries. A slot that was replaced or filled meanwhile is left alone.
    fn forget_failed(&self, key: &VoiceKey, slot: &Slot<B::State>) {
        let mut entries = self.lock();
        let stale = entries
            .peek(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized());
        if stale {
            entries.pop(key);
        }
    }

    /// True when a built state is held for `key`.
    pub fn contains(&self, key: &VoiceKey) -> bool {
        self.lock().peek(key).is_some_and(|slot| slot.initialized())
    }

    /// Drop the entry for `key` so the next lookup rebuilds it. Returns true
    /// when a built state was dropped.
    pub fn invalidate(&self, key: &VoiceKey) -> bool {
        let removed = self.lock().pop(key).is_some_and(|slot| slot.initialized());
        if removed {
            debug!(voice = %key, "invalidated voice state");
        }
        removed
    }

    /// Drop every entry at once.
    pub fn clear(&self) {
        let mut entries = self.lock();
        let dropped = entries.len();
        entries.clear();
        info!(dropped, "voice cache cleared");
    }

    pub fn len(&self) -> usize {
        self.lock().iter().filter(|(_, slot)| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            lookups: self.lookups.load(Ordering::Relaxed),
            constructions: self.constructions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

fn voice_load_error(key: &VoiceKey, source: BackendError) -> TtsError {
    TtsError::VoiceLoad {
        voice: key.to_string(),
        source,
    }
}
