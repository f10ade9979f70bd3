//! Module compilation
//!
//! Generated modules are declarative scene documents. Compiling one means
//! parsing it under a closed schema, checking it against hard limits, and
//! binding the result to the shared [`RenderRuntime`]. Nothing in a module
//! can run code in the host: the worst a malformed module can do is fail to
//! compile, which only affects its own path.
//!
//! # Module format
//!
//! ```json
//! {
//!   "title": "ETH price",
//!   "chart": "line",
//!   "data": { "url": "/data/eth_price.json" },
//!   "x": { "field": "date" },
//!   "series": [{ "field": "close", "label": "Close" }]
//! }
//! ```
//!
//! `data` is either `{ "url": "/data/..." }` or `{ "inline": [ rows ] }`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::runtime::{MountId, MountPoint, RenderRuntime, Size};
use crate::error::{CanvasError, Result};
use crate::messages::VizPath;

/// Largest accepted module source
pub const MAX_SOURCE_BYTES: usize = 256 * 1024;
/// Maximum series per scene
pub const MAX_SERIES: usize = 32;
/// Maximum inline rows per scene
pub const MAX_INLINE_ROWS: usize = 10_000;
/// Prefix every data URL must start with
pub const DATA_URL_PREFIX: &str = "/data/";

// ============================================================================
// Scene schema
// ============================================================================

/// Chart kinds the runtime knows how to draw
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    /// Line chart
    Line,
    /// Bar chart
    Bar,
    /// Filled area chart
    Area,
    /// Scatter plot
    Scatter,
    /// Pie chart
    Pie,
    /// OHLC candlesticks
    Candlestick,
    /// Plain table
    Table,
}

/// Where a scene's rows come from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Relative URL under `/data/`
    Url(String),
    /// Rows embedded in the module
    Inline(Vec<serde_json::Value>),
}

/// One axis mapping
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AxisSpec {
    /// Row field plotted on this axis
    pub field: String,
    /// Axis label
    #[serde(default)]
    pub label: Option<String>,
}

/// One plotted series
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeriesSpec {
    /// Row field holding the values
    pub field: String,
    /// Legend label
    #[serde(default)]
    pub label: Option<String>,
    /// CSS-style color hint
    #[serde(default)]
    pub color: Option<String>,
}

/// A parsed, validated visualization module
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SceneSpec {
    /// Title shown above the chart
    #[serde(default)]
    pub title: Option<String>,
    /// Chart kind
    pub chart: ChartKind,
    /// Data source
    pub data: DataSource,
    /// X axis
    #[serde(default)]
    pub x: Option<AxisSpec>,
    /// Y axis
    #[serde(default)]
    pub y: Option<AxisSpec>,
    /// Plotted series
    #[serde(default)]
    pub series: Vec<SeriesSpec>,
}

impl SceneSpec {
    /// Parse and validate module source
    ///
    /// # Errors
    ///
    /// Returns the reason the source was rejected.
    pub fn parse(source: &str) -> std::result::Result<Self, String> {
        if source.len() > MAX_SOURCE_BYTES {
            return Err(format!(
                "source is {} bytes, limit is {MAX_SOURCE_BYTES}",
                source.len()
            ));
        }
        let scene: Self = serde_json::from_str(source).map_err(|e| e.to_string())?;
        scene.validate()?;
        Ok(scene)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match &self.data {
            DataSource::Url(url) => {
                if !url.starts_with(DATA_URL_PREFIX) {
                    return Err(format!("data url must start with {DATA_URL_PREFIX}: {url}"));
                }
                if url.contains("..") || url.contains("://") {
                    return Err(format!("data url escapes the data directory: {url}"));
                }
            }
            DataSource::Inline(rows) => {
                if rows.len() > MAX_INLINE_ROWS {
                    return Err(format!(
                        "{} inline rows, limit is {MAX_INLINE_ROWS}",
                        rows.len()
                    ));
                }
                if rows.iter().any(|row| !row.is_object()) {
                    return Err("inline rows must be objects".to_string());
                }
            }
        }

        if self.series.len() > MAX_SERIES {
            return Err(format!(
                "{} series, limit is {MAX_SERIES}",
                self.series.len()
            ));
        }
        if self.series.iter().any(|s| s.field.trim().is_empty()) {
            return Err("series field must not be empty".to_string());
        }
        if self.chart != ChartKind::Table && self.chart != ChartKind::Pie && self.series.is_empty()
        {
            return Err(format!("{:?} chart needs at least one series", self.chart));
        }
        Ok(())
    }
}

// ============================================================================
// Compiled units
// ============================================================================

struct UnitInner {
    path: VizPath,
    scene: SceneSpec,
    runtime: Arc<dyn RenderRuntime>,
}

/// A compiled module bound to the rendering runtime
///
/// Cheap to clone; every clone shares one parsed scene.
#[derive(Clone)]
pub struct CompiledUnit {
    inner: Arc<UnitInner>,
}

impl std::fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("path", &self.inner.path)
            .field("chart", &self.inner.scene.chart)
            .field("runtime", &self.inner.runtime.name())
            .finish()
    }
}

impl CompiledUnit {
    /// Path this unit was compiled from
    #[must_use]
    pub fn path(&self) -> &VizPath {
        &self.inner.path
    }

    /// The validated scene
    #[must_use]
    pub fn scene(&self) -> &SceneSpec {
        &self.inner.scene
    }

    /// Whether two handles share the same compiled unit
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Attach a fresh instance to `mount`
    ///
    /// Draws immediately at the current size, then redraws whenever the
    /// container size changes until the returned [`ActiveRender`] is
    /// disposed. Must be called from within a tokio runtime.
    #[must_use]
    pub fn mount(&self, mount: MountPoint) -> ActiveRender {
        let MountPoint { id, size: mut sizes } = mount;
        let initial = *sizes.borrow_and_update();
        self.inner.runtime.draw(id, &self.inner.scene, initial);

        let inner = Arc::clone(&self.inner);
        let watcher = tokio::spawn(async move {
            while sizes.changed().await.is_ok() {
                let size = *sizes.borrow_and_update();
                tracing::trace!(path = %inner.path, mount = %id, ?size, "Redrawing on resize");
                inner.runtime.draw(id, &inner.scene, size);
            }
        });

        ActiveRender {
            id,
            unit: self.clone(),
            watcher: Some(watcher),
        }
    }
}

/// A mounted unit instance
///
/// Dropping it has the same effect as [`ActiveRender::dispose`].
#[derive(Debug)]
pub struct ActiveRender {
    id: MountId,
    unit: CompiledUnit,
    watcher: Option<JoinHandle<()>>,
}

impl ActiveRender {
    /// Container this instance is attached to
    #[must_use]
    pub fn mount_id(&self) -> MountId {
        self.id
    }

    /// Unit this instance was created from
    #[must_use]
    pub fn unit(&self) -> &CompiledUnit {
        &self.unit
    }

    /// Whether the instance has been torn down
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.watcher.is_none()
    }

    /// Stop observing resizes and clear the container
    pub fn dispose(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
            self.unit.inner.runtime.clear(self.id);
            tracing::debug!(path = %self.unit.path(), mount = %self.id, "Disposed render");
        }
    }
}

impl Drop for ActiveRender {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ============================================================================
// Compiler
// ============================================================================

/// Turns module source into a mountable unit
pub trait ModuleCompiler: Send + Sync {
    /// Compile `source` fetched for `path`
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::CompileFailure`] when the source is rejected.
    fn compile(&self, path: &VizPath, source: &str) -> Result<CompiledUnit>;
}

/// Compiler for declarative scene modules
pub struct SceneCompiler {
    runtime: Arc<dyn RenderRuntime>,
}

impl SceneCompiler {
    /// Create a compiler binding units to `runtime`
    #[must_use]
    pub fn new(runtime: Arc<dyn RenderRuntime>) -> Self {
        Self { runtime }
    }
}

impl ModuleCompiler for SceneCompiler {
    fn compile(&self, path: &VizPath, source: &str) -> Result<CompiledUnit> {
        let scene = SceneSpec::parse(source).map_err(|reason| CanvasError::CompileFailure {
            path: path.clone(),
            reason,
        })?;

        Ok(CompiledUnit {
            inner: Arc::new(UnitInner {
                path: path.clone(),
                scene,
                runtime: Arc::clone(&self.runtime),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::runtime::RecordingRuntime;

    const LINE_MODULE: &str = r#"{
        "title": "ETH price",
        "chart": "line",
        "data": { "url": "/data/eth_price.json" },
        "x": { "field": "date" },
        "series": [{ "field": "close" }]
    }"#;

    fn compiler() -> (Arc<RecordingRuntime>, SceneCompiler) {
        let runtime = Arc::new(RecordingRuntime::new());
        let compiler = SceneCompiler::new(runtime.clone());
        (runtime, compiler)
    }

    #[test]
    fn test_compile_valid_module() {
        let (_, compiler) = compiler();
        let unit = compiler
            .compile(&VizPath::from("a/eth_price.viz"), LINE_MODULE)
            .unwrap();
        assert_eq!(unit.scene().chart, ChartKind::Line);
        assert_eq!(unit.scene().title.as_deref(), Some("ETH price"));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let source = r#"{ "chart": "bar", "data": { "inline": [] }, "script": "alert(1)" }"#;
        let (_, compiler) = compiler();
        let err = compiler.compile(&VizPath::from("a/x"), source).unwrap_err();
        assert!(matches!(err, CanvasError::CompileFailure { .. }));
    }

    #[test]
    fn test_absolute_data_url_rejected() {
        let source = r#"{ "chart": "pie", "data": { "url": "https://evil.example/x" } }"#;
        assert!(SceneSpec::parse(source).is_err());

        let traversal = r#"{ "chart": "pie", "data": { "url": "/data/../secrets" } }"#;
        assert!(SceneSpec::parse(traversal).is_err());
    }

    #[test]
    fn test_series_required_for_plots() {
        let source = r#"{ "chart": "line", "data": { "inline": [{"a": 1}] } }"#;
        assert!(SceneSpec::parse(source).is_err());

        let table = r#"{ "chart": "table", "data": { "inline": [{"a": 1}] } }"#;
        assert!(SceneSpec::parse(table).is_ok());
    }

    #[test]
    fn test_oversized_source_rejected() {
        let source = " ".repeat(MAX_SOURCE_BYTES + 1);
        let err = SceneSpec::parse(&source).unwrap_err();
        assert!(err.contains("limit"));
    }

    #[tokio::test]
    async fn test_mount_draws_and_dispose_clears() {
        let (runtime, compiler) = compiler();
        let unit = compiler.compile(&VizPath::from("a/b"), LINE_MODULE).unwrap();

        let (mount, resize) = MountPoint::new(Size::new(300, 200));
        let mut active = unit.mount(mount);
        let id = active.mount_id();
        assert_eq!(runtime.draw_count(id), 1);

        resize.send(Size::new(500, 300)).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(runtime.last_size(id), Some(Size::new(500, 300)));

        active.dispose();
        assert!(active.is_disposed());
        assert!(runtime.is_cleared(id));

        // Resizes after dispose are not observed
        let draws = runtime.draw_count(id);
        let _ = resize.send(Size::new(10, 10));
        tokio::task::yield_now().await;
        assert_eq!(runtime.draw_count(id), draws);
    }

    #[tokio::test]
    async fn test_drop_disposes() {
        let (runtime, compiler) = compiler();
        let unit = compiler.compile(&VizPath::from("a/b"), LINE_MODULE).unwrap();
        let (mount, _resize) = MountPoint::new(Size::default());
        let active = unit.mount(mount);
        let id = active.mount_id();
        drop(active);
        assert!(runtime.is_cleared(id));
    }
}
