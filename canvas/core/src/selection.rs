//! Selection controller
//!
//! Owns the set of visualizations the user has put on the canvas and drives
//! each one through its [`ItemPhase`] lifecycle. Phase changes that wait for
//! an animation (settle, exit, highlight expiry) run on cancellable timers;
//! every change bumps a revision counter that the canvas watches to know when
//! the surface needs another reconcile pass.
//!
//! Selection changes never wait on the network. Loading the modules behind
//! newly selected paths is the caller's job.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::animation::{AnimationTimings, ItemPhase, TimerKind, TimerRegistry, TimerToken};
use crate::messages::VizPath;

/// Viewport width at which the grid switches to two columns
pub const GRID_BREAKPOINT_PX: u32 = 768;

/// Arrangement of the active visualizations
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Nothing selected
    #[default]
    Empty,
    /// One item, full height
    Single,
    /// Two or more items in a responsive grid
    Grid,
}

impl Layout {
    /// Layout for `count` active items
    #[must_use]
    pub fn for_count(count: usize) -> Self {
        match count {
            0 => Self::Empty,
            1 => Self::Single,
            _ => Self::Grid,
        }
    }

    /// Column count at `viewport_width`
    #[must_use]
    pub fn columns(&self, viewport_width: u32) -> u32 {
        match self {
            Self::Empty => 0,
            Self::Single => 1,
            Self::Grid if viewport_width >= GRID_BREAKPOINT_PX => 2,
            Self::Grid => 1,
        }
    }
}

/// Result of [`SelectionController::toggle`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The path was added and needs loading
    Added,
    /// The path was removed
    Removed,
}

/// Point-in-time copy of the selection
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectionSnapshot {
    /// Selected paths in insertion order
    pub active: Vec<VizPath>,
    /// Paths playing their exit animation
    pub removing: Vec<VizPath>,
    /// Paths with the "new" highlight
    pub newest: Vec<VizPath>,
    /// Phase of every path seen this session
    pub phases: HashMap<VizPath, ItemPhase>,
    /// Path the surface should scroll to once mounted
    pub pending_scroll: Option<VizPath>,
    /// Revision the snapshot was taken at
    pub revision: u64,
}

impl SelectionSnapshot {
    /// Phase of `path`
    #[must_use]
    pub fn phase(&self, path: &VizPath) -> ItemPhase {
        self.phases.get(path).copied().unwrap_or_default()
    }

    /// Layout for the active set
    #[must_use]
    pub fn layout(&self) -> Layout {
        Layout::for_count(self.active.len())
    }

    /// Paths to display: active first, then those still exiting
    pub fn displayed(&self) -> impl Iterator<Item = &VizPath> {
        self.active.iter().chain(self.removing.iter())
    }

    /// Whether `path` has the "new" highlight
    #[must_use]
    pub fn is_newest(&self, path: &VizPath) -> bool {
        self.newest.contains(path)
    }
}

#[derive(Default)]
struct SelectionState {
    active: Vec<VizPath>,
    removing: Vec<VizPath>,
    newest: Vec<VizPath>,
    phases: HashMap<VizPath, ItemPhase>,
    pending_scroll: Option<VizPath>,
    timers: TimerRegistry,
}

impl SelectionState {
    fn phase(&self, path: &VizPath) -> ItemPhase {
        self.phases.get(path).copied().unwrap_or_default()
    }

    fn set_phase(&mut self, path: &VizPath, next: ItemPhase) {
        let current = self.phase(path);
        match current.transition(next) {
            Ok(phase) => {
                tracing::trace!(path = %path, from = %current, to = %phase, "Phase transition");
                self.phases.insert(path.clone(), phase);
            }
            Err(err) => tracing::warn!(path = %path, error = %err, "Phase transition rejected"),
        }
    }

    /// Apply a fired timer; `false` if the timer is no longer current
    fn expire(&mut self, path: &VizPath, kind: TimerKind, token: TimerToken) -> bool {
        if !self.timers.complete(path, kind, token) {
            return false;
        }
        match kind {
            TimerKind::Settle => {
                if self.phase(path) == ItemPhase::Adding {
                    self.set_phase(path, ItemPhase::Active);
                }
            }
            TimerKind::Exit => {
                if self.phase(path) == ItemPhase::Removing {
                    self.set_phase(path, ItemPhase::Gone);
                    self.removing.retain(|p| p != path);
                }
            }
            TimerKind::Highlight => {
                self.newest.retain(|p| p != path);
            }
        }
        true
    }

    fn snapshot(&self, revision: u64) -> SelectionSnapshot {
        SelectionSnapshot {
            active: self.active.clone(),
            removing: self.removing.clone(),
            newest: self.newest.clone(),
            phases: self.phases.clone(),
            pending_scroll: self.pending_scroll.clone(),
            revision,
        }
    }
}

/// Tracks selected visualizations and their animation phases
pub struct SelectionController {
    state: Arc<Mutex<SelectionState>>,
    timings: AnimationTimings,
    revision: Arc<watch::Sender<u64>>,
}

impl SelectionController {
    /// Create a controller with the given animation durations
    pub fn new(timings: AnimationTimings) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(SelectionState::default())),
            timings,
            revision: Arc::new(revision),
        }
    }

    /// Animation durations in use
    #[must_use]
    pub fn timings(&self) -> AnimationTimings {
        self.timings
    }

    /// Subscribe to revision changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Revisions as a stream, starting with the current one
    #[must_use]
    pub fn revisions(&self) -> WatchStream<u64> {
        WatchStream::new(self.revision.subscribe())
    }

    /// Add `path` if it is not selected, remove it if it is
    ///
    /// An added path stays selected whatever its load outcome, so the
    /// surface can show its failure placeholder.
    pub fn toggle(&self, path: &VizPath) -> ToggleOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.phase(path).is_selected() {
                self.begin_remove(&mut state, path);
                ToggleOutcome::Removed
            } else {
                self.begin_add(&mut state, path);
                ToggleOutcome::Added
            }
        };
        self.bump();
        tracing::debug!(path = %path, outcome = ?outcome, "Visualization toggled");
        outcome
    }

    /// Select `path` without ever deselecting it
    ///
    /// Returns `true` if the path was not selected before.
    pub fn ensure_selected(&self, path: &VizPath) -> bool {
        let added = {
            let mut state = self.state.lock();
            if state.phase(path).is_selected() {
                false
            } else {
                self.begin_add(&mut state, path);
                true
            }
        };
        if added {
            self.bump();
        }
        added
    }

    /// Give `paths` the "new" highlight for the highlight duration
    ///
    /// Replaces any previous highlight. The first path becomes the pending
    /// scroll target.
    pub fn highlight_newest(&self, paths: &[VizPath]) {
        {
            let mut state = self.state.lock();
            let previous = std::mem::take(&mut state.newest);
            for old in previous.iter().filter(|p| !paths.contains(p)) {
                state.timers.cancel(old, TimerKind::Highlight);
            }
            for path in paths {
                if !state.newest.contains(path) {
                    state.newest.push(path.clone());
                }
                self.arm(&mut state, path, TimerKind::Highlight);
            }
            state.pending_scroll = paths.first().cloned();
        }
        self.bump();
    }

    /// Clear the scroll target once the surface has scrolled to it
    pub fn acknowledge_scroll(&self, path: &VizPath) {
        let mut state = self.state.lock();
        if state.pending_scroll.as_ref() == Some(path) {
            state.pending_scroll = None;
        }
    }

    /// Drop the whole selection and every pending timer
    pub fn clear(&self) {
        {
            let mut state = self.state.lock();
            state.timers.cancel_all();
            state.active.clear();
            state.removing.clear();
            state.newest.clear();
            state.phases.clear();
            state.pending_scroll = None;
        }
        self.bump();
    }

    /// Copy of the current selection
    #[must_use]
    pub fn snapshot(&self) -> SelectionSnapshot {
        let revision = *self.revision.borrow();
        self.state.lock().snapshot(revision)
    }

    /// Phase of `path`
    #[must_use]
    pub fn phase(&self, path: &VizPath) -> ItemPhase {
        self.state.lock().phase(path)
    }

    /// Whether `path` is selected
    #[must_use]
    pub fn is_selected(&self, path: &VizPath) -> bool {
        self.phase(path).is_selected()
    }

    /// Timers currently armed
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }

    fn begin_add(&self, state: &mut SelectionState, path: &VizPath) {
        if state.phase(path) == ItemPhase::Removing {
            state.timers.cancel(path, TimerKind::Exit);
            state.removing.retain(|p| p != path);
        }
        state.set_phase(path, ItemPhase::Adding);
        state.active.push(path.clone());
        self.arm(state, path, TimerKind::Settle);
    }

    fn begin_remove(&self, state: &mut SelectionState, path: &VizPath) {
        state.timers.cancel(path, TimerKind::Settle);
        state.timers.cancel(path, TimerKind::Highlight);
        state.active.retain(|p| p != path);
        state.newest.retain(|p| p != path);
        if state.pending_scroll.as_ref() == Some(path) {
            state.pending_scroll = None;
        }
        state.set_phase(path, ItemPhase::Removing);
        state.removing.push(path.clone());
        self.arm(state, path, TimerKind::Exit);
    }

    fn arm(&self, state: &mut SelectionState, path: &VizPath, kind: TimerKind) {
        let delay = self.timings.for_kind(kind);
        let shared: Weak<Mutex<SelectionState>> = Arc::downgrade(&self.state);
        let revision = Arc::clone(&self.revision);
        let task_path = path.clone();
        state.timers.arm(path.clone(), kind, move |token| {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                let changed = shared.lock().expire(&task_path, kind, token);
                if changed {
                    revision.send_modify(|rev| *rev += 1);
                }
            })
            .abort_handle()
        });
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn controller() -> SelectionController {
        SelectionController::new(AnimationTimings::default())
    }

    #[test]
    fn test_layout() {
        assert_eq!(Layout::for_count(0), Layout::Empty);
        assert_eq!(Layout::for_count(1), Layout::Single);
        assert_eq!(Layout::for_count(3), Layout::Grid);
        assert_eq!(Layout::Grid.columns(767), 1);
        assert_eq!(Layout::Grid.columns(768), 2);
        assert_eq!(Layout::Single.columns(1200), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_twice_restores_selection() {
        let selection = controller();
        let path = VizPath::from("a/x.viz");

        let before = selection.snapshot().active;
        assert_eq!(selection.toggle(&path), ToggleOutcome::Added);
        assert_eq!(selection.phase(&path), ItemPhase::Adding);
        assert_eq!(selection.toggle(&path), ToggleOutcome::Removed);
        assert_eq!(selection.snapshot().active, before);
        assert_eq!(selection.phase(&path), ItemPhase::Removing);

        tokio::time::sleep(Duration::from_millis(401)).await;
        assert_eq!(selection.phase(&path), ItemPhase::Gone);
        assert!(selection.snapshot().removing.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_timer_activates() {
        let selection = controller();
        let path = VizPath::from("a/x.viz");
        selection.toggle(&path);

        tokio::time::sleep(Duration::from_millis(601)).await;
        assert_eq!(selection.phase(&path), ItemPhase::Active);
        assert_eq!(selection.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removal_cancels_settle_timer() {
        let selection = controller();
        let path = VizPath::from("a/x.viz");
        selection.toggle(&path);
        selection.toggle(&path);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(selection.phase(&path), ItemPhase::Removing);
        tokio::time::sleep(Duration::from_millis(300)).await;
        // Settle deadline has passed; it must not have resurrected the item
        assert_eq!(selection.phase(&path), ItemPhase::Gone);
        assert!(!selection.is_selected(&path));
    }

    #[tokio::test(start_paused = true)]
    async fn test_readd_during_exit_cancels_exit() {
        let selection = controller();
        let path = VizPath::from("a/x.viz");
        selection.toggle(&path);
        selection.toggle(&path);
        selection.toggle(&path);

        let snapshot = selection.snapshot();
        assert_eq!(snapshot.active, vec![path.clone()]);
        assert!(snapshot.removing.is_empty());

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(selection.phase(&path), ItemPhase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_selected_never_deselects() {
        let selection = controller();
        let path = VizPath::from("a/x.viz");
        assert!(selection.ensure_selected(&path));
        assert!(!selection.ensure_selected(&path));
        assert_eq!(selection.snapshot().active, vec![path.clone()]);
        assert!(selection.is_selected(&path));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_load_stays_selected() {
        let selection = controller();
        let path = VizPath::from("a/missing.viz");
        let outcome = selection.toggle(&path);
        assert!(matches!(outcome, ToggleOutcome::Added { load: Err(_) }));
        assert!(selection.is_selected(&path));
    }

    #[tokio::test(start_paused = true)]
    async fn test_highlight_expires() {
        let selection = controller();
        let x = VizPath::from("a/x.viz");
        let y = VizPath::from("a/y.viz");
        selection.ensure_selected(&x);
        selection.ensure_selected(&y);
        selection.highlight_newest(&[x.clone(), y.clone()]);

        let snapshot = selection.snapshot();
        assert!(snapshot.is_newest(&x) && snapshot.is_newest(&y));
        assert_eq!(snapshot.pending_scroll, Some(x.clone()));

        tokio::time::sleep(Duration::from_millis(3_900)).await;
        assert!(selection.snapshot().is_newest(&x));
        tokio::time::sleep(Duration::from_millis(200)).await;
        let snapshot = selection.snapshot();
        assert!(snapshot.newest.is_empty());
        assert!(snapshot.active.contains(&x));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_timers() {
        let selection = controller();
        let path = VizPath::from("a/x.viz");
        selection.toggle(&path);
        selection.highlight_newest(&[path.clone()]);
        assert_eq!(selection.pending_timers(), 2);

        selection.clear();
        assert_eq!(selection.pending_timers(), 0);
        assert_eq!(selection.snapshot(), SelectionSnapshot {
            revision: selection.snapshot().revision,
            ..SelectionSnapshot::default()
        });
    }

    #[tokio::test]
    async fn test_revision_advances() {
        let selection = controller();
        let mut rx = selection.subscribe();
        let start = *rx.borrow_and_update();
        selection.toggle(&VizPath::from("a/x.viz"));
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow() > start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revision_stream_reports_settle() {
        use tokio_stream::StreamExt;

        let selection = controller();
        let path = VizPath::from("a/x.viz");
        selection.toggle(&path);

        let mut revisions = selection.revisions();
        let current = revisions.next().await.unwrap();
        let settled = revisions.next().await.unwrap();
        assert!(settled > current);
        assert_eq!(selection.phase(&path), ItemPhase::Active);
    }
}
