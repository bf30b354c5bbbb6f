//! Key-value persistence for digests, share links, translations and custom
//! feed sources.
//!
//! [`Store`] owns the typed operations; the bytes live behind a [`KvBackend`].
//! Keys are namespaced:
//!
//! ```text
//! digest:<YYYY-MM-DD>   Digest
//! share:<token>         date the token points at
//! translation:<url>     Translation
//! rss-sources           Vec<FeedSource>
//! ```

use crate::models::{Digest, DigestListing, DigestStats, DigestStatus, FeedSource, Translation};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::{fs, io};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

const DIGEST_PREFIX: &str = "digest:";
const SHARE_PREFIX: &str = "share:";
const TRANSLATION_PREFIX: &str = "translation:";
const RSS_SOURCES_KEY: &str = "rss-sources";

/// How often [`Store::spawn_flusher`] writes pending changes.
pub const FLUSH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Digest history length returned by [`Store::list_digests`] by default.
pub const DEFAULT_LIST_LIMIT: usize = 30;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, StoreError>;

/// Minimal key-value contract the store needs.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    /// Returns whether the key existed.
    fn delete(&self, key: &str) -> Result<bool>;
    /// All entries whose key starts with `prefix`, sorted by key.
    fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>>;
    /// Persist pending writes; returns whether anything was written.
    fn flush(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Process-local backend, used by tests and `--data-dir`-less runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    map: Mutex<BTreeMap<String, Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn prefixed(map: &BTreeMap<String, Value>, prefix: &str) -> Vec<(String, Value)> {
    map.range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        map.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(map.remove(key).is_some())
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(prefixed(&map, prefix))
    }
}

/// Single JSON document on disk.
///
/// Mutations only touch the in-memory map and mark it dirty; [`flush`]
/// writes a snapshot atomically (temp file + rename). [`Store::spawn_flusher`]
/// calls it periodically, and dropping the backend flushes once more.
///
/// [`flush`]: KvBackend::flush
#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
    map: Mutex<BTreeMap<String, Value>>,
    dirty: AtomicBool,
    /// Held for a whole flush so an older snapshot never lands after a newer one.
    writing: Mutex<()>,
}

impl JsonFileBackend {
    /// Open `path`, starting empty when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), keys = map.len(), "Opened store");
        Ok(Self {
            path,
            map: Mutex::new(map),
            dirty: AtomicBool::new(false),
            writing: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_snapshot(&self) -> Result<()> {
        let bytes = serde_json::to_vec(&*self.lock())?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KvBackend for JsonFileBackend {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.lock().insert(key.to_string(), value);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.lock().remove(key).is_some();
        if existed {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(existed)
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        Ok(prefixed(&self.lock(), prefix))
    }

    fn flush(&self) -> Result<bool> {
        let _writing = self.writing.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        if let Err(e) = self.write_snapshot() {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        debug!(path = %self.path.display(), "Flushed store");
        Ok(true)
    }
}

impl Drop for JsonFileBackend {
    fn drop(&mut self) {
        if let Err(e) = KvBackend::flush(self) {
            error!(path = %self.path.display(), error = %e, "Could not flush store on drop");
        }
    }
}

/// Typed persistence operations.
#[derive(Clone)]
pub struct Store {
    kv: Arc<dyn KvBackend>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    pub fn new(kv: Arc<dyn KvBackend>) -> Self {
        Self { kv }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// File-backed store at `<data_dir>/store.json`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let backend = JsonFileBackend::open(data_dir.join("store.json"))?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// Write pending changes now. Blocking; call it off the async workers
    /// or at shutdown.
    pub fn flush(&self) -> Result<bool> {
        self.kv.flush()
    }

    /// Flush every `period` on the blocking pool until the backend is dropped.
    pub fn spawn_flusher(&self, period: std::time::Duration) -> JoinHandle<()> {
        let kv: Weak<dyn KvBackend> = Arc::downgrade(&self.kv);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(kv) = kv.upgrade() else { break };
                match tokio::task::spawn_blocking(move || kv.flush()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!(error = %e, "Periodic store flush failed"),
                    Err(e) => error!(error = %e, "Store flush task panicked"),
                }
            }
        })
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv.get(key)? {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.kv.set(key, serde_json::to_value(value)?)
    }

    /// Entries under `prefix`; entries that no longer deserialize are skipped.
    fn read_all<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, T)>> {
        Ok(self
            .kv
            .list(prefix)?
            .into_iter()
            .filter_map(|(k, v)| match serde_json::from_value(v) {
                Ok(t) => Some((k, t)),
                Err(e) => {
                    warn!(key = %k, error = %e, "Skipping unreadable entry");
                    None
                }
            })
            .collect())
    }

    // ── Digests ──

    /// Persist a `generating` placeholder, keeping the creation time and
    /// share token of an earlier digest for the same date.
    pub fn begin_digest(&self, placeholder: Digest) -> Result<()> {
        self.put_digest(placeholder)
    }

    /// Persist the finished digest.
    pub fn finish_digest(&self, digest: Digest) -> Result<()> {
        self.put_digest(digest)
    }

    fn put_digest(&self, mut digest: Digest) -> Result<()> {
        let key = format!("{DIGEST_PREFIX}{}", digest.date);
        if let Some(existing) = self.read::<Digest>(&key)? {
            digest.created_at = existing.created_at;
            if digest.share_token.is_none() {
                digest.share_token = existing.share_token;
            }
        }
        self.write(&key, &digest)
    }

    /// Flip a stored digest to `error`. Missing digests are ignored.
    pub fn fail_digest(&self, date: &str, now: DateTime<Utc>) -> Result<()> {
        let key = format!("{DIGEST_PREFIX}{date}");
        if let Some(mut digest) = self.read::<Digest>(&key)? {
            digest.status = DigestStatus::Error;
            digest.updated_at = now;
            self.write(&key, &digest)?;
        }
        Ok(())
    }

    pub fn get_digest(&self, date: &str) -> Result<Option<Digest>> {
        self.read(&format!("{DIGEST_PREFIX}{date}"))
    }

    /// The digest with the greatest date, whatever its status.
    pub fn latest_digest(&self) -> Result<Option<Digest>> {
        Ok(self.read_all::<Digest>(DIGEST_PREFIX)?.pop().map(|(_, d)| d))
    }

    /// Newest first.
    pub fn list_digests(&self, limit: usize) -> Result<Vec<DigestListing>> {
        Ok(self
            .read_all::<Digest>(DIGEST_PREFIX)?
            .iter()
            .rev()
            .take(limit)
            .map(|(_, d)| DigestListing::from(d))
            .collect())
    }

    pub fn stats(&self) -> Result<DigestStats> {
        let digests = self.read_all::<Digest>(DIGEST_PREFIX)?;
        let done = digests.iter().filter(|(_, d)| d.status == DigestStatus::Done);
        let latest = digests.last().map(|(_, d)| d);
        Ok(DigestStats {
            total_digests: done.clone().count(),
            total_articles: done.map(|(_, d)| d.articles.len()).sum(),
            latest_date: latest.map(|d| d.date.clone()),
            latest_status: latest.map(|d| d.status),
        })
    }

    // ── Share links ──

    /// The digest's share token, minting one on first use.
    ///
    /// `None` when no digest exists for `date`.
    #[instrument(level = "debug", skip(self))]
    pub fn create_share_token(&self, date: &str) -> Result<Option<String>> {
        let key = format!("{DIGEST_PREFIX}{date}");
        let Some(mut digest) = self.read::<Digest>(&key)? else {
            return Ok(None);
        };
        if let Some(token) = digest.share_token {
            return Ok(Some(token));
        }
        let token = hex::encode(rand::random::<[u8; 16]>());
        self.write(&format!("{SHARE_PREFIX}{token}"), &date)?;
        digest.share_token = Some(token.clone());
        self.write(&key, &digest)?;
        debug!(%token, "Minted share token");
        Ok(Some(token))
    }

    pub fn digest_by_share_token(&self, token: &str) -> Result<Option<Digest>> {
        let Some(date) = self.read::<String>(&format!("{SHARE_PREFIX}{token}"))? else {
            return Ok(None);
        };
        self.get_digest(&date)
    }

    // ── Translations ──

    pub fn get_translation(&self, url: &str) -> Result<Option<Translation>> {
        self.read(&format!("{TRANSLATION_PREFIX}{url}"))
    }

    /// Last write wins.
    pub fn save_translation(&self, translation: &Translation) -> Result<()> {
        self.write(&format!("{TRANSLATION_PREFIX}{}", translation.url), translation)
    }

    pub fn delete_translation(&self, url: &str) -> Result<bool> {
        self.kv.delete(&format!("{TRANSLATION_PREFIX}{url}"))
    }

    /// Cached translations for whichever of `urls` have one.
    pub fn translation_map(&self, urls: &[String]) -> Result<HashMap<String, Translation>> {
        let mut out = HashMap::new();
        for url in urls {
            if let Some(t) = self.get_translation(url)? {
                out.insert(url.clone(), t);
            }
        }
        Ok(out)
    }

    /// Delete translations older than `days`; returns how many went.
    pub fn prune_translations(&self, days: u32, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::days(i64::from(days));
        let mut pruned = 0usize;
        for (key, t) in self.read_all::<Translation>(TRANSLATION_PREFIX)? {
            if t.created_at < cutoff && self.kv.delete(&key)? {
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    // ── Feed sources ──

    pub fn rss_sources(&self) -> Result<Option<Vec<FeedSource>>> {
        self.read(RSS_SOURCES_KEY)
    }

    pub fn save_rss_sources(&self, sources: &[FeedSource]) -> Result<()> {
        self.write(RSS_SOURCES_KEY, &sources)
    }
}
