//! Render surface manager
//!
//! Maps the selection onto mount points. Only `loaded` units are mounted;
//! anything else gets a placeholder slot whose key depends on the path alone,
//! so a surface can diff slots between passes without flicker. Slots that are
//! no longer displayed are disposed, which stops their resize observers and
//! clears their drawing.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::animation::ItemPhase;
use crate::error::{CanvasError, ResourceKind, Result};
use crate::messages::VizPath;
use crate::modules::{ActiveRender, LoadState, ModuleCache, MountId, MountPoint, Size};
use crate::selection::{Layout, SelectionSnapshot};

/// Reason shown when a failed entry carries no error
const GENERIC_FAILURE: &str = "failed to load";

/// What a slot currently shows
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotContent {
    /// A compiled unit is attached to `mount`
    Mounted {
        /// Container the unit draws into
        mount: MountId,
    },
    /// Module still loading
    Loading,
    /// Module failed to load or compile
    Failed {
        /// Error text for the placeholder
        reason: String,
    },
}

/// One displayed visualization
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    /// Visualization path
    pub path: VizPath,
    /// Title derived from the file name
    pub display_name: String,
    /// Stable key for surface diffing
    pub key: String,
    /// Lifecycle phase, for entry/exit styling
    pub phase: ItemPhase,
    /// Whether the "new" highlight is on
    pub is_newest: bool,
    /// Mounted unit or placeholder
    pub content: SlotContent,
}

impl SlotView {
    /// Whether a unit is attached
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        matches!(self.content, SlotContent::Mounted { .. })
    }
}

/// Outcome of one reconcile pass
#[derive(Clone, Debug, Default)]
pub struct SurfaceUpdate {
    /// Slots in display order
    pub slots: Vec<SlotView>,
    /// Mounted path to scroll into view
    pub scroll_to: Option<VizPath>,
    /// Paths mounted by this pass
    pub mounted: Vec<VizPath>,
    /// Paths torn down by this pass
    pub unmounted: Vec<VizPath>,
    /// Layout of the active set
    pub layout: Layout,
    /// Grid columns at the current viewport width
    pub columns: u32,
}

struct MountedSlot {
    render: ActiveRender,
    resize: watch::Sender<Size>,
}

/// Owns the mount points of displayed visualizations
pub struct RenderSurfaceManager {
    slots: HashMap<VizPath, MountedSlot>,
    default_size: Size,
    viewport_width: u32,
}

impl Default for RenderSurfaceManager {
    fn default() -> Self {
        Self::new(Size::default())
    }
}

impl RenderSurfaceManager {
    /// Create a manager whose new mounts start at `default_size`
    #[must_use]
    pub fn new(default_size: Size) -> Self {
        Self {
            slots: HashMap::new(),
            default_size,
            viewport_width: default_size.width,
        }
    }

    /// Bring mounts in line with `selection`
    ///
    /// Must be called from within a tokio runtime.
    pub fn reconcile(&mut self, selection: &SelectionSnapshot, cache: &ModuleCache) -> SurfaceUpdate {
        let mut update = SurfaceUpdate {
            layout: selection.layout(),
            columns: selection.layout().columns(self.viewport_width),
            ..SurfaceUpdate::default()
        };
        let mut displayed = HashSet::new();

        for path in selection.displayed() {
            if !displayed.insert(path.clone()) {
                continue;
            }

            let content = match cache.peek_unit(path) {
                Some(unit) => {
                    let current = self
                        .slots
                        .get(path)
                        .is_some_and(|slot| slot.render.unit().ptr_eq(&unit));
                    if !current {
                        self.unmount(path);
                        let (mount_point, resize) = MountPoint::new(self.default_size);
                        let render = unit.mount(mount_point);
                        tracing::debug!(path = %path, mount = %render.mount_id(), "Mounted visualization");
                        self.slots.insert(path.clone(), MountedSlot { render, resize });
                        update.mounted.push(path.clone());
                    }
                    let mount = self
                        .slots
                        .get(path)
                        .map(|slot| slot.render.mount_id());
                    match mount {
                        Some(mount) => SlotContent::Mounted { mount },
                        None => SlotContent::Loading,
                    }
                }
                None => {
                    if self.unmount(path) {
                        update.unmounted.push(path.clone());
                    }
                    placeholder(cache, path)
                }
            };

            let key = match content {
                SlotContent::Mounted { .. } => format!("viz:{path}"),
                _ => format!("placeholder:{path}"),
            };
            update.slots.push(SlotView {
                path: path.clone(),
                display_name: path.display_name(),
                key,
                phase: selection.phase(path),
                is_newest: selection.is_newest(path),
                content,
            });
        }

        let stale: Vec<VizPath> = self
            .slots
            .keys()
            .filter(|path| !displayed.contains(*path))
            .cloned()
            .collect();
        for path in stale {
            self.unmount(&path);
            update.unmounted.push(path);
        }

        update.scroll_to = selection
            .pending_scroll
            .as_ref()
            .filter(|path| self.slots.contains_key(*path))
            .cloned();
        update
    }

    /// Push a container size change to the unit mounted for `path`
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::NotFound`] if nothing is mounted for `path`.
    pub fn resize(&self, path: &VizPath, size: Size) -> Result<()> {
        let slot = self
            .slots
            .get(path)
            .ok_or_else(|| CanvasError::not_found(ResourceKind::Visualization, path))?;
        slot.resize.send_replace(size);
        Ok(())
    }

    /// Record the surface viewport width
    pub fn set_viewport_width(&mut self, width: u32) {
        self.viewport_width = width;
    }

    /// Current viewport width
    #[must_use]
    pub fn viewport_width(&self) -> u32 {
        self.viewport_width
    }

    /// Dispose every mounted unit
    pub fn teardown_all(&mut self) {
        let count = self.slots.len();
        for (_, mut slot) in self.slots.drain() {
            slot.render.dispose();
        }
        if count > 0 {
            tracing::debug!(count, "Tore down all mounts");
        }
    }

    /// Mount id for `path`
    #[must_use]
    pub fn mount_id(&self, path: &VizPath) -> Option<MountId> {
        self.slots.get(path).map(|slot| slot.render.mount_id())
    }

    /// Number of mounted units
    #[must_use]
    pub fn mounted_count(&self) -> usize {
        self.slots.len()
    }

    fn unmount(&mut self, path: &VizPath) -> bool {
        match self.slots.remove(path) {
            Some(mut slot) => {
                slot.render.dispose();
                true
            }
            None => false,
        }
    }
}

impl Drop for RenderSurfaceManager {
    fn drop(&mut self) {
        self.teardown_all();
    }
}

fn placeholder(cache: &ModuleCache, path: &VizPath) -> SlotContent {
    match cache.entry(path) {
        Some(entry) if entry.load_state == LoadState::Failed => SlotContent::Failed {
            reason: entry
                .last_error
                .map_or_else(|| GENERIC_FAILURE.to_string(), |err| err.to_string()),
        },
        _ => SlotContent::Loading,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::api::InMemoryBackend;
    use crate::modules::{
        ModuleLoader, RecordingRuntime, RetryConfig, RuntimeCall, SceneCompiler,
    };

    const TABLE: &str = r#"{ "chart": "table", "data": { "inline": [] } }"#;

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        runtime: Arc<RecordingRuntime>,
        loader: ModuleLoader,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(InMemoryBackend::new());
        let runtime = Arc::new(RecordingRuntime::new());
        let loader = ModuleLoader::new(
            backend.clone(),
            Arc::new(SceneCompiler::new(runtime.clone())),
            Arc::new(ModuleCache::new()),
            RetryConfig::no_retry(),
        );
        Fixture {
            backend,
            runtime,
            loader,
        }
    }

    fn selecting(paths: &[&VizPath]) -> SelectionSnapshot {
        SelectionSnapshot {
            active: paths.iter().map(|p| (*p).clone()).collect(),
            phases: paths
                .iter()
                .map(|p| ((*p).clone(), ItemPhase::Active))
                .collect(),
            ..SelectionSnapshot::default()
        }
    }

    #[tokio::test]
    async fn test_mounts_loaded_and_placeholders_rest() {
        let fx = fixture();
        let good = VizPath::from("a/good.viz");
        let bad = VizPath::from("a/bad_chart.viz");
        let pending = VizPath::from("a/pending.viz");
        fx.backend.insert_source(good.clone(), TABLE);
        fx.backend.insert_source(bad.clone(), "{ nope");
        fx.loader.load(&good).await.unwrap();
        let _ = fx.loader.load(&bad).await;

        let mut surface = RenderSurfaceManager::default();
        let update = surface.reconcile(&selecting(&[&good, &bad, &pending]), fx.loader.cache());

        assert_eq!(update.layout, Layout::Grid);
        assert_eq!(update.mounted, vec![good.clone()]);
        assert_eq!(surface.mounted_count(), 1);

        let keys: Vec<&str> = update.slots.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["viz:a/good.viz", "placeholder:a/bad_chart.viz", "placeholder:a/pending.viz"]
        );
        assert_eq!(update.slots[1].display_name, "bad chart");
        assert!(matches!(update.slots[1].content, SlotContent::Failed { .. }));
        assert_eq!(update.slots[2].content, SlotContent::Loading);
    }

    #[tokio::test]
    async fn test_reconcile_is_stable_and_disposes_removed() {
        let fx = fixture();
        let path = VizPath::from("a/x.viz");
        fx.backend.insert_source(path.clone(), TABLE);
        fx.loader.load(&path).await.unwrap();

        let mut surface = RenderSurfaceManager::default();
        surface.reconcile(&selecting(&[&path]), fx.loader.cache());
        let mount = surface.mount_id(&path).unwrap();

        let again = surface.reconcile(&selecting(&[&path]), fx.loader.cache());
        assert!(again.mounted.is_empty());
        assert_eq!(surface.mount_id(&path), Some(mount));

        let gone = surface.reconcile(&SelectionSnapshot::default(), fx.loader.cache());
        assert_eq!(gone.unmounted, vec![path.clone()]);
        assert!(fx.runtime.is_cleared(mount));
    }

    #[tokio::test]
    async fn test_resize_redraws() {
        let fx = fixture();
        let path = VizPath::from("a/x.viz");
        fx.backend.insert_source(path.clone(), TABLE);
        fx.loader.load(&path).await.unwrap();

        let mut surface = RenderSurfaceManager::default();
        surface.reconcile(&selecting(&[&path]), fx.loader.cache());
        let mount = surface.mount_id(&path).unwrap();

        surface.resize(&path, Size::new(300, 200)).unwrap();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(fx.runtime.last_size(mount), Some(Size::new(300, 200)));
        assert!(surface
            .resize(&VizPath::from("a/other.viz"), Size::default())
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_scroll_target_requires_mount() {
        let fx = fixture();
        let path = VizPath::from("a/x.viz");
        fx.backend.insert_source(path.clone(), TABLE);

        let mut surface = RenderSurfaceManager::default();
        let mut snapshot = selecting(&[&path]);
        snapshot.pending_scroll = Some(path.clone());

        assert_eq!(surface.reconcile(&snapshot, fx.loader.cache()).scroll_to, None);
        fx.loader.load(&path).await.unwrap();
        assert_eq!(surface.reconcile(&snapshot, fx.loader.cache()).scroll_to, Some(path));
    }

    #[tokio::test]
    async fn test_teardown_all_clears_runtime() {
        let fx = fixture();
        let path = VizPath::from("a/x.viz");
        fx.backend.insert_source(path.clone(), TABLE);
        fx.loader.load(&path).await.unwrap();

        let mut surface = RenderSurfaceManager::default();
        surface.reconcile(&selecting(&[&path]), fx.loader.cache());
        let mount = surface.mount_id(&path).unwrap();
        surface.teardown_all();

        assert_eq!(surface.mounted_count(), 0);
        assert!(fx
            .runtime
            .calls()
            .contains(&RuntimeCall::Clear { mount }));
    }
}
