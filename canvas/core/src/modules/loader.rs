//! Module loader
//!
//! Turns a path into a compiled unit: cache lookup, fetch with retries,
//! compile, commit. At most one fetch per path is in flight at any time;
//! callers that ask for a path already being loaded await the same shared
//! operation and receive the same result.
//!
//! # Identity changes
//!
//! Every load is tagged with the cache generation it started in. After
//! [`ModuleLoader::reset_identity`] the old loads keep running to
//! completion, but their commits are rejected by the cache and their callers
//! receive [`CanvasError::Superseded`].

use std::future::Future;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::Instrument;

use super::cache::{Generation, ModuleCache};
use super::compiler::{CompiledUnit, ModuleCompiler};
use super::retry::RetryConfig;
use crate::api::VisualizationSource;
use crate::error::{CanvasError, Result};
use crate::messages::VizPath;

type SharedLoad = Shared<BoxFuture<'static, Result<CompiledUnit>>>;

struct InFlight {
    generation: Generation,
    load: SharedLoad,
}

/// Per-path record of fetches issued by the loader
///
/// Counts every network fetch and tracks which fetches are active, so a
/// second concurrent fetch for the same path (a single-flight bug) is
/// detected instead of silently doubling traffic.
#[derive(Default)]
pub struct FetchLedger {
    counts: DashMap<VizPath, u32>,
    active: DashSet<(Generation, VizPath)>,
}

/// Marks a fetch as active until dropped
pub struct FetchGuard<'a> {
    ledger: &'a FetchLedger,
    key: (Generation, VizPath),
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.ledger.active.remove(&self.key);
    }
}

impl FetchLedger {
    /// Register a fetch for `path`
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::ConcurrencyViolation`] if a fetch for the same
    /// path and generation is already active.
    pub fn begin(&self, generation: Generation, path: &VizPath) -> Result<FetchGuard<'_>> {
        let key = (generation, path.clone());
        if !self.active.insert(key.clone()) {
            tracing::error!(path = %path, "Concurrent fetch for the same path");
            return Err(CanvasError::ConcurrencyViolation { path: path.clone() });
        }
        *self.counts.entry(path.clone()).or_insert(0) += 1;
        Ok(FetchGuard { ledger: self, key })
    }

    /// Fetches issued for `path`
    #[must_use]
    pub fn count(&self, path: &VizPath) -> u32 {
        self.counts.get(path).map_or(0, |count| *count)
    }

    /// Fetches currently running
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.len()
    }
}

#[derive(Clone)]
struct LoadContext {
    source: Arc<dyn VisualizationSource>,
    compiler: Arc<dyn ModuleCompiler>,
    cache: Arc<ModuleCache>,
    retry: RetryConfig,
    ledger: Arc<FetchLedger>,
    in_flight: Arc<DashMap<VizPath, InFlight>>,
}

/// Loads, compiles and caches visualization modules
#[derive(Clone)]
pub struct ModuleLoader {
    ctx: LoadContext,
}

impl ModuleLoader {
    /// Create a loader over `cache`
    pub fn new(
        source: Arc<dyn VisualizationSource>,
        compiler: Arc<dyn ModuleCompiler>,
        cache: Arc<ModuleCache>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            ctx: LoadContext {
                source,
                compiler,
                cache,
                retry,
                ledger: Arc::new(FetchLedger::default()),
                in_flight: Arc::new(DashMap::new()),
            },
        }
    }

    /// Shared module cache
    #[must_use]
    pub fn cache(&self) -> &Arc<ModuleCache> {
        &self.ctx.cache
    }

    /// Fetch ledger
    #[must_use]
    pub fn ledger(&self) -> &FetchLedger {
        &self.ctx.ledger
    }

    /// Retry policy in use
    #[must_use]
    pub fn retry_config(&self) -> &RetryConfig {
        &self.ctx.retry
    }

    /// Loads currently in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.ctx.in_flight.len()
    }

    /// Load `path`, reusing the cache and any in-flight load
    ///
    /// # Errors
    ///
    /// - [`CanvasError::NetworkFailure`] after retries are exhausted
    /// - [`CanvasError::NotFound`] if the service has no such module
    /// - [`CanvasError::CompileFailure`] if the source is rejected
    /// - [`CanvasError::Superseded`] if the identity changed mid-load
    pub async fn load(&self, path: &VizPath) -> Result<CompiledUnit> {
        self.begin_load(path).await
    }

    /// Start loading `path` and return a handle to its result
    ///
    /// The load is tagged with the current generation before this returns,
    /// so an identity change supersedes it even if the handle has not been
    /// polled yet. The handle can be moved into a spawned task.
    pub fn begin_load(&self, path: &VizPath) -> impl Future<Output = Result<CompiledUnit>> + Send + 'static {
        if let Some(unit) = self.ctx.cache.get_loaded(path) {
            tracing::trace!(path = %path, "Module cache hit");
            return futures::future::ready(Ok(unit)).boxed().shared();
        }
        self.join_or_start(path)
    }

    fn join_or_start(&self, path: &VizPath) -> SharedLoad {
        let generation = self.ctx.cache.generation();
        match self.ctx.in_flight.entry(path.clone()) {
            Entry::Occupied(entry) if entry.get().generation == generation => {
                tracing::debug!(path = %path, "Joining in-flight load");
                entry.get().load.clone()
            }
            Entry::Occupied(mut entry) => {
                let load = self.start(path.clone(), generation);
                entry.insert(InFlight {
                    generation,
                    load: load.clone(),
                });
                load
            }
            Entry::Vacant(entry) => {
                // A load may have committed between the cache check and here
                if let Some(unit) = self.ctx.cache.peek_unit(path) {
                    return futures::future::ready(Ok(unit)).boxed().shared();
                }
                let load = self.start(path.clone(), generation);
                entry.insert(InFlight {
                    generation,
                    load: load.clone(),
                });
                load
            }
        }
    }

    fn start(&self, path: VizPath, generation: Generation) -> SharedLoad {
        let ctx = self.ctx.clone();
        let span = tracing::debug_span!("module_load", path = %path, generation = generation.0);
        async move {
            let result = run_load(&ctx, &path, generation).await;
            ctx.in_flight
                .remove_if(&path, |_, in_flight| in_flight.generation == generation);
            result
        }
        .instrument(span)
        .boxed()
        .shared()
    }

    /// Drop every cached module and abandon in-flight loads
    ///
    /// One cache write clears all entries and starts a new generation.
    pub fn reset_identity(&self) -> Generation {
        let generation = self.ctx.cache.clear();
        self.ctx.in_flight.clear();
        tracing::info!(generation = generation.0, "Module cache reset for identity change");
        generation
    }
}

async fn run_load(ctx: &LoadContext, path: &VizPath, generation: Generation) -> Result<CompiledUnit> {
    ctx.cache.mark_loading(path, generation)?;

    let source = match fetch_with_retry(ctx, path, generation).await {
        Ok(source) => source,
        Err(err) => {
            tracing::warn!(path = %path, error = %err, "Module fetch failed");
            if let Err(stale) = ctx.cache.commit_failed(path, generation, err.clone()) {
                return Err(stale);
            }
            return Err(err);
        }
    };

    let unit = match ctx.compiler.compile(path, &source) {
        Ok(unit) => unit,
        Err(err) => {
            tracing::warn!(path = %path, error = %err, "Module compile failed");
            ctx.cache.commit_failed(path, generation, err.clone())?;
            return Err(err);
        }
    };

    ctx.cache.commit_loaded(path, generation, unit.clone())?;
    tracing::info!(path = %path, chart = ?unit.scene().chart, "Module loaded");
    Ok(unit)
}

async fn fetch_with_retry(ctx: &LoadContext, path: &VizPath, generation: Generation) -> Result<String> {
    let mut attempt = 0;
    loop {
        let guard = ctx.ledger.begin(generation, path)?;
        let result = ctx.source.fetch_source(path).await;
        drop(guard);

        match result {
            Ok(source) => return Ok(source),
            Err(err) if err.is_retryable() && attempt < ctx.retry.max_retries => {
                let backoff = ctx.retry.backoff_for_attempt(attempt);
                attempt += 1;
                ctx.cache.record_retry(path, generation, attempt)?;
                tracing::debug!(
                    path = %path,
                    attempt,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Retrying module fetch"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err.with_attempts(attempt + 1)),
        }
    }
}
