//! Content-addressed speech cache
//!
//! Maps (text, voice, options) to generated audio plus its word timings.
//! Entries are evicted least-recently-used first once the byte budget is
//! exceeded, or when unused for longer than the configured age. A pinned
//! entry (the one backing the playing session) is never evicted.
//!
//! At most one generation per key is in flight: later requests for a key
//! that is still generating join the pending result instead of calling the
//! engine again.

use crate::config::{SpeechOptions, VoiceConfig};
use crate::engines::{AudioHandle, SpeechOutput};
use crate::error::SpeechError;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use lectern_core::WordTiming;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// SHA-256 over text, voice and options
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(text: &str, voice: &VoiceConfig, options: &SpeechOptions) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update([0u8]);
        hasher.update(voice.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(voice.language.as_bytes());
        hasher.update([0u8]);
        // Struct field order is fixed, so the encoding is deterministic
        if let Ok(encoded) = serde_json::to_vec(options) {
            hasher.update(&encoded);
        }
        CacheKey(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0[..12.min(self.0.len())])
    }
}

/// Cached audio and timings for one key
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub audio: AudioHandle,
    pub word_timings: Vec<WordTiming>,
    pub size_bytes: usize,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(audio: AudioHandle, word_timings: Vec<WordTiming>) -> Self {
        let now = Utc::now();
        let size_bytes = audio.size_bytes()
            + word_timings
                .iter()
                .map(|t| t.text.len() + std::mem::size_of::<WordTiming>())
                .sum::<usize>();
        Self {
            audio,
            word_timings,
            size_bytes,
            created_at: now,
            last_used: now,
        }
    }
}

impl From<SpeechOutput> for CacheEntry {
    fn from(output: SpeechOutput) -> Self {
        CacheEntry::new(output.audio, output.word_timings)
    }
}

/// How a request was served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOrigin {
    /// Served from a stored entry
    Hit,
    /// Joined a generation already in flight
    Joined,
    /// Triggered a new engine call
    Generated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub count: usize,
    pub approx_size_bytes: usize,
    pub pending: usize,
}

type PendingResult = Shared<BoxFuture<'static, Result<CacheEntry, SpeechError>>>;

struct CacheState {
    entries: LruCache<CacheKey, CacheEntry>,
    total_bytes: usize,
    pinned: HashSet<CacheKey>,
}

struct CacheInner {
    state: Mutex<CacheState>,
    pending: Mutex<HashMap<CacheKey, PendingResult>>,
    max_bytes: usize,
    max_age: Option<chrono::Duration>,
    store_results: bool,
    /// Bumped by `clear`; results of generations started before are not stored
    epoch: AtomicU64,
}

/// Shared speech cache. Cloning gives another handle to the same store.
#[derive(Clone)]
pub struct SpeechCache {
    inner: Arc<CacheInner>,
}

impl SpeechCache {
    pub fn new(max_bytes: usize) -> Self {
        Self::with_policy(max_bytes, None, true)
    }

    /// `store_results = false` keeps request de-duplication but stores nothing
    pub fn with_policy(max_bytes: usize, max_age_secs: Option<u64>, store_results: bool) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState {
                    entries: LruCache::unbounded(),
                    total_bytes: 0,
                    pinned: HashSet::new(),
                }),
                pending: Mutex::new(HashMap::new()),
                max_bytes,
                max_age: max_age_secs
                    .and_then(|secs| i64::try_from(secs).ok())
                    .map(chrono::Duration::seconds),
                store_results,
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Look up by content
    pub fn lookup(&self, text: &str, voice: &VoiceConfig, options: &SpeechOptions) -> Option<CacheEntry> {
        self.get(&CacheKey::new(text, voice, options))
    }

    /// Look up by key, refreshing the entry's recency
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.get(key)
    }

    pub fn put(&self, key: CacheKey, entry: CacheEntry) {
        self.inner.insert(key, entry);
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.state.lock().entries.contains(key)
    }

    /// Drop every entry immediately. Returns the bytes released from the cache.
    ///
    /// Audio already handed out (e.g. to the playing session) stays alive
    /// until its last holder drops it.
    pub fn clear(&self) -> usize {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let freed = {
            let mut state = self.inner.state.lock();
            let freed = state.total_bytes;
            state.entries.clear();
            state.total_bytes = 0;
            freed
        };
        info!("Cleared speech cache ({} bytes)", freed);
        freed
    }

    pub fn stats(&self) -> CacheStats {
        // Lock order is pending before state.
        let pending = self.inner.pending.lock().len();
        let state = self.inner.state.lock();
        CacheStats {
            count: state.entries.len(),
            approx_size_bytes: state.total_bytes,
            pending,
        }
    }

    /// Exempt `key` from eviction while it backs the playing session
    pub fn pin(&self, key: &CacheKey) {
        self.inner.state.lock().pinned.insert(key.clone());
    }

    pub fn unpin(&self, key: &CacheKey) {
        let mut state = self.inner.state.lock();
        state.pinned.remove(key);
        self.inner.evict(&mut state);
    }

    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.inner.pending.lock().contains_key(key)
    }

    /// Serve `key` from the cache, from a pending generation, or by running
    /// `generate`. The generation runs as its own task, so it completes and
    /// fills the cache even if every waiter goes away.
    pub async fn get_or_generate<F, Fut>(
        &self,
        key: CacheKey,
        generate: F,
    ) -> Result<(CacheEntry, CacheOrigin), SpeechError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SpeechOutput, SpeechError>> + Send + 'static,
    {
        if let Some(entry) = self.get(&key) {
            debug!("Speech cache hit for {}", key);
            return Ok((entry, CacheOrigin::Hit));
        }

        let (pending, origin) = {
            let mut pending = self.inner.pending.lock();
            match pending.get(&key) {
                Some(existing) => {
                    debug!("Joining pending generation for {}", key);
                    (existing.clone(), CacheOrigin::Joined)
                }
                None => {
                    // A generation may have finished between the lookup above
                    // and taking the pending lock.
                    if let Some(entry) = self.inner.get(&key) {
                        debug!("Speech cache hit for {}", key);
                        return Ok((entry, CacheOrigin::Hit));
                    }

                    let inner = Arc::clone(&self.inner);
                    let epoch = inner.epoch.load(Ordering::SeqCst);
                    let task_key = key.clone();
                    let generation = generate();

                    let handle = tokio::spawn(async move {
                        let result = generation.await.map(CacheEntry::from);
                        if let Ok(ref entry) = result {
                            if inner.store_results && inner.epoch.load(Ordering::SeqCst) == epoch {
                                inner.insert(task_key.clone(), entry.clone());
                            }
                        }
                        inner.pending.lock().remove(&task_key);
                        result
                    });

                    let shared = async move {
                        handle.await.unwrap_or_else(|e| {
                            Err(SpeechError::Engine(format!("Generation task failed: {}", e)))
                        })
                    }
                    .boxed()
                    .shared();

                    pending.insert(key.clone(), shared.clone());
                    (shared, CacheOrigin::Generated)
                }
            }
        };

        pending.await.map(|entry| (entry, origin))
    }
}

impl CacheInner {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut state = self.state.lock();
        let now = Utc::now();

        let expired = match (state.entries.peek(key), self.max_age) {
            (Some(entry), Some(max_age)) => now - entry.last_used > max_age,
            _ => false,
        };
        if expired && !state.pinned.contains(key) {
            if let Some(entry) = state.entries.pop(key) {
                state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
                debug!("Speech cache entry {} expired", key);
            }
            return None;
        }

        state.entries.get_mut(key).map(|entry| {
            entry.last_used = now;
            entry.clone()
        })
    }

    fn insert(&self, key: CacheKey, mut entry: CacheEntry) {
        let mut state = self.state.lock();
        entry.last_used = Utc::now();
        let size = entry.size_bytes;
        if let Some(old) = state.entries.put(key, entry) {
            state.total_bytes = state.total_bytes.saturating_sub(old.size_bytes);
        }
        state.total_bytes = state.total_bytes.saturating_add(size);
        self.evict(&mut state);
    }

    /// Drop expired entries, then least recently used ones until within budget.
    /// Pinned entries are skipped.
    fn evict(&self, state: &mut CacheState) {
        if let Some(max_age) = self.max_age {
            let now = Utc::now();
            let expired: Vec<CacheKey> = state
                .entries
                .iter()
                .filter(|(key, entry)| now - entry.last_used > max_age && !state.pinned.contains(*key))
                .map(|(key, _)| key.clone())
                .collect();
            for key in expired {
                if let Some(entry) = state.entries.pop(&key) {
                    state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
                }
            }
        }

        while state.total_bytes > self.max_bytes {
            let victim = state
                .entries
                .iter()
                .rev()
                .map(|(key, _)| key)
                .find(|key| !state.pinned.contains(*key))
                .cloned();

            match victim {
                Some(key) => {
                    if let Some(entry) = state.entries.pop(&key) {
                        state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
                        debug!("Evicted speech cache entry {} ({} bytes)", key, entry.size_bytes);
                    }
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn entry(size: usize) -> CacheEntry {
        CacheEntry::new(AudioHandle::new(Bytes::from(vec![0u8; size]), "audio/wav"), Vec::new())
    }

    fn key(text: &str) -> CacheKey {
        CacheKey::new(text, &VoiceConfig::default(), &SpeechOptions::default())
    }

    #[test]
    fn test_key_depends_on_every_input() {
        let voice = VoiceConfig::default();
        let options = SpeechOptions::default();
        let base = CacheKey::new("hello", &voice, &options);

        assert_eq!(base, CacheKey::new("hello", &voice, &options));
        assert_ne!(base, CacheKey::new("hello!", &voice, &options));
        assert_ne!(base, CacheKey::new("hello", &VoiceConfig::new("nova"), &options));

        let mut faster = options.clone();
        faster.speed = 1.5;
        assert_ne!(base, CacheKey::new("hello", &voice, &faster));
    }

    #[test]
    fn test_lru_eviction_over_budget() {
        let cache = SpeechCache::new(250);
        cache.put(key("a"), entry(100));
        cache.put(key("b"), entry(100));
        assert!(cache.get(&key("a")).is_some());

        cache.put(key("c"), entry(100));
        assert!(cache.contains(&key("a")));
        assert!(!cache.contains(&key("b")));
        assert!(cache.contains(&key("c")));
        assert_eq!(cache.stats().count, 2);
        assert_eq!(cache.stats().approx_size_bytes, 200);
    }

    #[test]
    fn test_pinned_entry_survives_eviction() {
        let cache = SpeechCache::new(150);
        cache.put(key("playing"), entry(100));
        cache.pin(&key("playing"));

        cache.put(key("next"), entry(100));
        assert!(cache.contains(&key("playing")));
        assert!(!cache.contains(&key("next")));

        cache.unpin(&key("playing"));
        cache.put(key("later"), entry(100));
        assert!(!cache.contains(&key("playing")));
        assert!(cache.contains(&key("later")));
    }

    #[test]
    fn test_clear_reports_freed_bytes() {
        let cache = SpeechCache::new(10_000);
        cache.put(key("a"), entry(100));
        cache.put(key("b"), entry(300));
        let held = cache.get(&key("a")).unwrap();

        assert_eq!(cache.clear(), 400);
        assert_eq!(cache.stats(), CacheStats::default());
        assert_eq!(held.audio.size_bytes(), 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_staggered_callers_generate_once() {
        use std::sync::atomic::AtomicUsize;

        let cache = SpeechCache::new(10_000);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..64 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tasks.push(tokio::spawn(async move {
                for _ in 0..(i % 8) {
                    tokio::task::yield_now().await;
                }
                cache
                    .get_or_generate(key("shared"), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Ok(SpeechOutput::audio_only(AudioHandle::new(
                            Bytes::from(vec![0u8; 10]),
                            "audio/wav",
                        )))
                    })
                    .await
            }));
        }

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().count, 1);
        assert_eq!(cache.stats().pending, 0);
    }

    #[test]
    fn test_replacing_entry_keeps_size_accounting() {
        let cache = SpeechCache::new(10_000);
        cache.put(key("a"), entry(100));
        cache.put(key("a"), entry(40));
        assert_eq!(cache.stats().approx_size_bytes, 40);
    }
}
