//! Managed per-series contexts: a deriver, a composer and a Dress memo per
//! series, held in a bounded LRU+TTL cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::dress::{AttributeDeriver, Dress, PromptComposer, Seed, sanitize_file_name};
use crate::errors::GenerationError;
use crate::series::{Series, SeriesStore};
use crate::wordbank::WordbankCache;

/// Default cap on resident contexts.
pub const DEFAULT_MAX_CONTEXTS: usize = 16;
/// Default inactivity TTL before a context is evicted.
pub const DEFAULT_CONTEXT_TTL: Duration = Duration::from_secs(30 * 60);

/// Everything needed to derive dresses for one series.
///
/// Dresses are memoized by address for the lifetime of the context; evicting
/// the context drops the memo but never touches persisted artifacts.
pub struct SeriesContext {
    pub series: Series,
    deriver: AttributeDeriver,
    composer: PromptComposer,
    config: Arc<Config>,
    dresses: Mutex<HashMap<String, Arc<Mutex<Dress>>>>,
}

impl SeriesContext {
    fn new(series: Series, config: Arc<Config>, wordbank: Arc<WordbankCache>) -> Self {
        Self {
            series,
            deriver: AttributeDeriver::new(wordbank),
            composer: PromptComposer::new(config.clone()),
            config,
            dresses: Mutex::new(HashMap::new()),
        }
    }

    pub fn composer(&self) -> &PromptComposer {
        &self.composer
    }

    /// The memoized Dress for an address, derived on first request.
    ///
    /// Derivation renders all prompt variants, writes their sidecars and a
    /// selector snapshot. Repeat requests return the same instance and cause
    /// no further writes.
    pub fn dress_for(&self, address: &str) -> Result<Arc<Mutex<Dress>>, GenerationError> {
        let mut memo = self.dresses.lock().expect("dress memo lock poisoned");
        if let Some(dress) = memo.get(address) {
            return Ok(dress.clone());
        }

        let seed = Seed::derive(address)?;
        let attributes = self.deriver.derive(&seed, &self.series.filters)?;
        let mut prompts = PromptComposer::render(&attributes);
        let file_name = sanitize_file_name(address);
        prompts.enhanced = self.composer.load_enhanced(&self.series.suffix, &file_name);
        self.composer
            .write_sidecars(&self.series.suffix, &file_name, &prompts);

        let dress = Dress {
            identifier: address.to_string(),
            file_name,
            seed: seed.as_str().to_string(),
            attributes,
            prompts,
            generated_path: None,
            annotated_path: None,
            download_mode: None,
            completed: false,
            cache_hit: false,
            series: self.series.suffix.clone(),
        };
        self.write_snapshot(&dress);

        let dress = Arc::new(Mutex::new(dress));
        memo.insert(address.to_string(), dress.clone());
        Ok(dress)
    }

    /// Persist the Dress snapshot under `selector/`. Best-effort.
    pub fn write_snapshot(&self, dress: &Dress) {
        let path = self.config.selector_path(&dress.series, &dress.file_name);
        let result = (|| -> anyhow::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, serde_json::to_string_pretty(dress)?)?;
            Ok(())
        })();
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to write dress snapshot");
        }
    }
}

struct ManagedContext {
    context: Arc<SeriesContext>,
    last_used: Instant,
}

struct Inner {
    entries: HashMap<String, ManagedContext>,
    /// Access order, most recently used last.
    order: Vec<String>,
    max_contexts: usize,
    ttl: Duration,
}

/// Bounded cache of [`SeriesContext`]s.
///
/// Single-lock design: every access touches the entry, sweeps TTL-expired
/// entries, and evicts least-recently-used entries past the cap.
pub struct ContextManager {
    config: Arc<Config>,
    wordbank: Arc<WordbankCache>,
    store: SeriesStore,
    inner: Mutex<Inner>,
}

impl ContextManager {
    pub fn new(config: Arc<Config>, wordbank: Arc<WordbankCache>) -> Self {
        Self {
            store: SeriesStore::new(config.clone()),
            config,
            wordbank,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: Vec::new(),
                max_contexts: DEFAULT_MAX_CONTEXTS,
                ttl: DEFAULT_CONTEXT_TTL,
            }),
        }
    }

    pub fn configure_limits(&self, max_contexts: usize, ttl: Duration) {
        let mut inner = self.inner.lock().expect("context lock poisoned");
        inner.max_contexts = max_contexts.max(1);
        inner.ttl = ttl;
        let now = Instant::now();
        evict(&mut inner, now);
    }

    /// The context for a series, created on first reference.
    ///
    /// Creating a context loads (or creates) the persisted series and bumps
    /// its last-used counter.
    pub fn get(&self, series: &str) -> Result<Arc<SeriesContext>, GenerationError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("context lock poisoned");

        sweep_expired(&mut inner, now);

        if let Some(entry) = inner.entries.get_mut(series) {
            entry.last_used = now;
            let context = entry.context.clone();
            touch_order(&mut inner.order, series);
            return Ok(context);
        }

        // Make room before admitting.
        evict(&mut inner, now);

        let loaded = self.store.load_or_create(series)?;
        let context = Arc::new(SeriesContext::new(
            loaded,
            self.config.clone(),
            self.wordbank.clone(),
        ));
        inner.entries.insert(
            series.to_string(),
            ManagedContext {
                context: context.clone(),
                last_used: now,
            },
        );
        inner.order.push(series.to_string());
        Ok(context)
    }

    pub fn resident(&self) -> usize {
        self.inner.lock().expect("context lock poisoned").entries.len()
    }

    pub fn contains(&self, series: &str) -> bool {
        self.inner
            .lock()
            .expect("context lock poisoned")
            .entries
            .contains_key(series)
    }
}

fn touch_order(order: &mut Vec<String>, series: &str) {
    if let Some(pos) = order.iter().position(|s| s == series) {
        let key = order.remove(pos);
        order.push(key);
    }
}

fn sweep_expired(inner: &mut Inner, now: Instant) {
    let ttl = inner.ttl;
    let expired: Vec<String> = inner
        .entries
        .iter()
        .filter(|(_, e)| now.duration_since(e.last_used) > ttl)
        .map(|(k, _)| k.clone())
        .collect();
    for key in expired {
        tracing::debug!(series = %key, "evicting idle context");
        inner.entries.remove(&key);
        inner.order.retain(|s| s != &key);
    }
}

/// TTL sweep, then LRU eviction until one slot is free.
fn evict(inner: &mut Inner, now: Instant) {
    sweep_expired(inner, now);
    while inner.entries.len() >= inner.max_contexts {
        let Some(victim) = inner.order.first().cloned() else {
            break;
        };
        tracing::debug!(series = %victim, "evicting least-recently-used context");
        inner.entries.remove(&victim);
        inner.order.remove(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const ADDRESS: &str = "0x71c7656ec7ab88b098defb751b7401b5f6d8976f";

    fn make_manager() -> (ContextManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = Arc::new(Config::with_data_root(dir.path()));
        let wordbank = Arc::new(WordbankCache::new(config.cache_dir()));
        (ContextManager::new(config, wordbank), dir)
    }

    #[test]
    fn test_get_creates_then_reuses_context() {
        let (manager, _dir) = make_manager();
        let first = manager.get("wild").unwrap();
        let second = manager.get("wild").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.resident(), 1);
    }

    #[test]
    fn test_max_contexts_is_never_exceeded() {
        let (manager, _dir) = make_manager();
        manager.configure_limits(2, Duration::from_secs(3600));
        for series in ["a", "b", "c", "d", "e"] {
            manager.get(series).unwrap();
            assert!(manager.resident() <= 2);
        }
    }

    #[test]
    fn test_lru_evicts_least_recently_used_first() {
        let (manager, _dir) = make_manager();
        manager.configure_limits(2, Duration::from_secs(3600));
        manager.get("a").unwrap();
        manager.get("b").unwrap();
        // Touch "a" so "b" becomes the eviction victim.
        manager.get("a").unwrap();
        manager.get("c").unwrap();
        assert!(manager.contains("a"));
        assert!(!manager.contains("b"));
        assert!(manager.contains("c"));
    }

    #[test]
    fn test_ttl_expiry_evicts_on_next_access() {
        let (manager, _dir) = make_manager();
        manager.configure_limits(8, Duration::from_millis(10));
        manager.get("a").unwrap();
        std::thread::sleep(Duration::from_millis(30));
        // Accessing a different series sweeps the idle one.
        manager.get("b").unwrap();
        assert!(!manager.contains("a"));
        assert!(manager.contains("b"));
    }

    #[test]
    fn test_eviction_keeps_persisted_series_file() {
        let (manager, dir) = make_manager();
        manager.configure_limits(1, Duration::from_secs(3600));
        manager.get("a").unwrap();
        manager.get("b").unwrap();
        assert!(!manager.contains("a"));
        assert!(dir.path().join("series/a.json").exists());
    }

    #[test]
    fn test_dress_is_memoized_per_address() {
        let (manager, _dir) = make_manager();
        let context = manager.get("wild").unwrap();
        let first = context.dress_for(ADDRESS).unwrap();
        let second = context.dress_for(ADDRESS).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_dress_writes_sidecars_and_snapshot_once() {
        let (manager, dir) = make_manager();
        let context = manager.get("wild").unwrap();
        let dress = context.dress_for(ADDRESS).unwrap();
        let file_name = dress.lock().unwrap().file_name.clone();

        let terse = dir.path().join(format!("output/wild/terse/{file_name}.txt"));
        let snapshot = dir
            .path()
            .join(format!("output/wild/selector/{file_name}.json"));
        assert!(terse.exists());
        assert!(snapshot.exists());

        // A second derivation must not rewrite the sidecar.
        let before = std::fs::metadata(&terse).unwrap().modified().unwrap();
        context.dress_for(ADDRESS).unwrap();
        let after = std::fs::metadata(&terse).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_dress_respects_series_filters() {
        let (manager, dir) = make_manager();
        let config = Arc::new(Config::with_data_root(dir.path()));
        let store = SeriesStore::new(config);
        let mut series = Series::new("narrow");
        series
            .filters
            .insert("colors".to_string(), vec!["crimson".to_string()]);
        store.create(&series).unwrap();

        let context = manager.get("narrow").unwrap();
        let dress = context.dress_for(ADDRESS).unwrap();
        let dress = dress.lock().unwrap();
        for attr in dress.attributes.iter().filter(|a| a.database == "colors") {
            assert_eq!(attr.selected, "crimson");
        }
    }

    #[test]
    fn test_hostile_series_name_is_rejected() {
        let (manager, _dir) = make_manager();
        assert!(manager.get("../escape").is_err());
    }
}
