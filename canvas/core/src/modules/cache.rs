//! Session-wide module cache
//!
//! Maps each visualization path to its load state and, once loaded, its
//! compiled unit. Entries live for the whole session and are only dropped in
//! bulk by [`ModuleCache::clear`] when the active identity changes.
//!
//! # Generations
//!
//! Every clear bumps a generation counter in the same write that empties the
//! map. Loads capture the generation when they start and pass it back on
//! every mutation; a mismatch means the identity changed underneath the load
//! and the mutation is rejected. This keeps a slow fetch for the previous
//! identity from repopulating the cache after a switch.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::compiler::CompiledUnit;
use crate::error::{CanvasError, Result};
use crate::messages::VizPath;

/// Cache generation, bumped on every clear
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(pub u64);

/// Load state of one path
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    /// Never requested in this generation
    #[default]
    Unloaded,
    /// Fetch or compile in progress
    Loading,
    /// Compiled unit available
    Loaded,
    /// Retries exhausted or compile failed
    Failed,
}

impl LoadState {
    /// Human-readable label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Failed => "failed",
        }
    }

    /// Whether a new load may be started from this state
    #[must_use]
    pub fn is_loadable(&self) -> bool {
        matches!(self, Self::Unloaded | Self::Failed)
    }
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Cached record for one visualization path
#[derive(Clone, Debug)]
pub struct VisualizationRef {
    /// Path key
    pub path: VizPath,
    /// Current load state
    pub load_state: LoadState,
    /// Present only when `load_state` is `Loaded`
    pub unit: Option<CompiledUnit>,
    /// Retries made by the current or last load
    pub retry_count: u32,
    /// Error that moved the entry to `Failed`
    pub last_error: Option<CanvasError>,
    /// When the entry was created
    pub created_at: Instant,
    /// When the entry was last read
    pub last_accessed: Instant,
}

impl VisualizationRef {
    fn new(path: VizPath) -> Self {
        let now = Instant::now();
        Self {
            path,
            load_state: LoadState::Unloaded,
            unit: None,
            retry_count: 0,
            last_error: None,
            created_at: now,
            last_accessed: now,
        }
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

/// Cache counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries in any state
    pub entries: usize,
    /// Entries holding a compiled unit
    pub loaded: usize,
    /// Entries with a load in progress
    pub loading: usize,
    /// Entries whose last load failed
    pub failed: usize,
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that needed a load
    pub misses: u64,
    /// Current generation
    pub generation: u64,
}

#[derive(Default)]
struct CacheInner {
    generation: u64,
    entries: HashMap<VizPath, VisualizationRef>,
    hits: u64,
    misses: u64,
}

impl CacheInner {
    fn check(&self, path: &VizPath, generation: Generation) -> Result<()> {
        if self.generation == generation.0 {
            Ok(())
        } else {
            Err(CanvasError::Superseded { path: path.clone() })
        }
    }
}

/// Process-lifetime store of compiled modules
#[derive(Default)]
pub struct ModuleCache {
    inner: RwLock<CacheInner>,
}

impl ModuleCache {
    /// Create an empty cache at generation zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation
    #[must_use]
    pub fn generation(&self) -> Generation {
        Generation(self.inner.read().generation)
    }

    /// Compiled unit for `path` if loaded, counting a hit or miss
    pub fn get_loaded(&self, path: &VizPath) -> Option<CompiledUnit> {
        let mut inner = self.inner.write();
        let found = inner.entries.get_mut(path).and_then(|entry| {
            entry.touch();
            entry.unit.clone()
        });
        if found.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        found
    }

    /// Compiled unit for `path` without touching counters
    #[must_use]
    pub fn peek_unit(&self, path: &VizPath) -> Option<CompiledUnit> {
        self.inner
            .read()
            .entries
            .get(path)
            .and_then(|entry| entry.unit.clone())
    }

    /// Load state of `path`
    #[must_use]
    pub fn state(&self, path: &VizPath) -> LoadState {
        self.inner
            .read()
            .entries
            .get(path)
            .map_or(LoadState::Unloaded, |entry| entry.load_state)
    }

    /// Snapshot of the entry for `path`
    #[must_use]
    pub fn entry(&self, path: &VizPath) -> Option<VisualizationRef> {
        self.inner.read().entries.get(path).cloned()
    }

    /// Move `path` to `Loading`
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::Superseded`] if `generation` is stale.
    pub fn mark_loading(&self, path: &VizPath, generation: Generation) -> Result<()> {
        let mut inner = self.inner.write();
        inner.check(path, generation)?;
        let entry = inner
            .entries
            .entry(path.clone())
            .or_insert_with(|| VisualizationRef::new(path.clone()));
        entry.load_state = LoadState::Loading;
        entry.unit = None;
        entry.retry_count = 0;
        entry.last_error = None;
        Ok(())
    }

    /// Record that a retry is about to be made
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::Superseded`] if `generation` is stale.
    pub fn record_retry(&self, path: &VizPath, generation: Generation, retries: u32) -> Result<()> {
        let mut inner = self.inner.write();
        inner.check(path, generation)?;
        if let Some(entry) = inner.entries.get_mut(path) {
            entry.retry_count = retries;
        }
        Ok(())
    }

    /// Store a compiled unit for `path`
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::Superseded`] if `generation` is stale; the
    /// cache is left untouched.
    pub fn commit_loaded(
        &self,
        path: &VizPath,
        generation: Generation,
        unit: CompiledUnit,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        inner.check(path, generation)?;
        let entry = inner
            .entries
            .entry(path.clone())
            .or_insert_with(|| VisualizationRef::new(path.clone()));
        entry.load_state = LoadState::Loaded;
        entry.unit = Some(unit);
        entry.retry_count = 0;
        entry.last_error = None;
        entry.touch();
        Ok(())
    }

    /// Mark `path` as failed with `error`
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::Superseded`] if `generation` is stale.
    pub fn commit_failed(
        &self,
        path: &VizPath,
        generation: Generation,
        error: CanvasError,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        inner.check(path, generation)?;
        let entry = inner
            .entries
            .entry(path.clone())
            .or_insert_with(|| VisualizationRef::new(path.clone()));
        entry.load_state = LoadState::Failed;
        entry.unit = None;
        entry.last_error = Some(error);
        Ok(())
    }

    /// Drop every entry and start a new generation
    pub fn clear(&self) -> Generation {
        let mut inner = self.inner.write();
        inner.generation += 1;
        inner.entries.clear();
        tracing::debug!(generation = inner.generation, "Module cache cleared");
        Generation(inner.generation)
    }

    /// Number of entries in any state
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the cache has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        let count = |state: LoadState| {
            inner
                .entries
                .values()
                .filter(|entry| entry.load_state == state)
                .count()
        };
        CacheStats {
            entries: inner.entries.len(),
            loaded: count(LoadState::Loaded),
            loading: count(LoadState::Loading),
            failed: count(LoadState::Failed),
            hits: inner.hits,
            misses: inner.misses,
            generation: inner.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::modules::compiler::{ModuleCompiler, SceneCompiler};
    use crate::modules::runtime::RecordingRuntime;

    fn unit(path: &VizPath) -> CompiledUnit {
        SceneCompiler::new(Arc::new(RecordingRuntime::new()))
            .compile(path, r#"{ "chart": "table", "data": { "inline": [] } }"#)
            .unwrap()
    }

    #[test]
    fn test_load_lifecycle() {
        let cache = ModuleCache::new();
        let path = VizPath::from("a/x.viz");
        let gen = cache.generation();

        assert_eq!(cache.state(&path), LoadState::Unloaded);
        cache.mark_loading(&path, gen).unwrap();
        assert_eq!(cache.state(&path), LoadState::Loading);

        cache.record_retry(&path, gen, 2).unwrap();
        assert_eq!(cache.entry(&path).unwrap().retry_count, 2);

        cache.commit_loaded(&path, gen, unit(&path)).unwrap();
        let entry = cache.entry(&path).unwrap();
        assert_eq!(entry.load_state, LoadState::Loaded);
        assert_eq!(entry.retry_count, 0);
        assert!(cache.get_loaded(&path).is_some());
    }

    #[test]
    fn test_failed_entry_is_reloadable() {
        let cache = ModuleCache::new();
        let path = VizPath::from("a/x.viz");
        let gen = cache.generation();
        cache.mark_loading(&path, gen).unwrap();
        cache
            .commit_failed(&path, gen, CanvasError::network("a/x.viz", "down"))
            .unwrap();

        let entry = cache.entry(&path).unwrap();
        assert_eq!(entry.load_state, LoadState::Failed);
        assert!(entry.last_error.is_some());
        assert!(entry.load_state.is_loadable());
        assert!(cache.get_loaded(&path).is_none());
    }

    #[test]
    fn test_clear_rejects_stale_commits() {
        let cache = ModuleCache::new();
        let path = VizPath::from("a/x.viz");
        let old = cache.generation();
        cache.mark_loading(&path, old).unwrap();

        let new = cache.clear();
        assert_ne!(old, new);
        assert!(cache.is_empty());

        let err = cache.commit_loaded(&path, old, unit(&path)).unwrap_err();
        assert_eq!(err, CanvasError::Superseded { path: path.clone() });
        assert!(cache.is_empty());
        assert_eq!(cache.state(&path), LoadState::Unloaded);
    }

    #[test]
    fn test_stats_count_hits_and_misses() {
        let cache = ModuleCache::new();
        let path = VizPath::from("a/x.viz");
        let gen = cache.generation();
        assert!(cache.get_loaded(&path).is_none());
        cache.commit_loaded(&path, gen, unit(&path)).unwrap();
        assert!(cache.get_loaded(&path).is_some());

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.loaded, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
