//! Rendering runtime contract
//!
//! The chart-drawing primitives live outside the core. A host supplies one
//! [`RenderRuntime`] shared by every compiled unit; units call into it with a
//! [`MountId`] so the runtime knows which container to draw into.
//!
//! Containers report their size through a `watch` channel held by the
//! [`MountPoint`]. The surface manager keeps the sending half and pushes
//! resizes into it; mounted units redraw on every change.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::compiler::SceneSpec;

/// Container size in surface pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

impl Size {
    /// Create a size
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Size {
    fn default() -> Self {
        Self::new(640, 400)
    }
}

/// Identifier of one mounted container
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MountId(pub u64);

impl MountId {
    /// Allocate the next mount id
    #[must_use]
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for MountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mount-{}", self.0)
    }
}

/// A container a compiled unit can attach to
#[derive(Debug)]
pub struct MountPoint {
    /// Container id
    pub id: MountId,
    /// Size observations for the container
    pub size: watch::Receiver<Size>,
}

impl MountPoint {
    /// Create a mount point and the handle used to resize it
    #[must_use]
    pub fn new(initial: Size) -> (Self, watch::Sender<Size>) {
        let (tx, rx) = watch::channel(initial);
        (
            Self {
                id: MountId::next(),
                size: rx,
            },
            tx,
        )
    }
}

/// Opaque drawing backend shared by all compiled units
pub trait RenderRuntime: Send + Sync {
    /// Runtime name for logging
    fn name(&self) -> &str;

    /// Draw `scene` into the container at `size`, replacing prior output
    fn draw(&self, mount: MountId, scene: &SceneSpec, size: Size);

    /// Remove everything drawn into the container
    fn clear(&self, mount: MountId);
}

/// One call observed by [`RecordingRuntime`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuntimeCall {
    /// `draw` was called
    Draw {
        /// Container
        mount: MountId,
        /// Scene title, if any
        title: Option<String>,
        /// Size drawn at
        size: Size,
    },
    /// `clear` was called
    Clear {
        /// Container
        mount: MountId,
    },
}

/// Runtime that records every call, for headless hosts and tests
#[derive(Debug, Default)]
pub struct RecordingRuntime {
    calls: Mutex<Vec<RuntimeCall>>,
}

impl RecordingRuntime {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All calls so far
    #[must_use]
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().clone()
    }

    /// Number of draws into `mount`
    #[must_use]
    pub fn draw_count(&self, mount: MountId) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, RuntimeCall::Draw { mount: m, .. } if *m == mount))
            .count()
    }

    /// Size of the most recent draw into `mount`
    #[must_use]
    pub fn last_size(&self, mount: MountId) -> Option<Size> {
        self.calls.lock().iter().rev().find_map(|call| match call {
            RuntimeCall::Draw { mount: m, size, .. } if *m == mount => Some(*size),
            _ => None,
        })
    }

    /// Whether `mount` has been cleared after its last draw
    #[must_use]
    pub fn is_cleared(&self, mount: MountId) -> bool {
        self.calls.lock().iter().rev().find_map(|call| match call {
            RuntimeCall::Clear { mount: m } if *m == mount => Some(true),
            RuntimeCall::Draw { mount: m, .. } if *m == mount => Some(false),
            _ => None,
        }) == Some(true)
    }
}

impl RenderRuntime for RecordingRuntime {
    fn name(&self) -> &str {
        "recording"
    }

    fn draw(&self, mount: MountId, scene: &SceneSpec, size: Size) {
        self.calls.lock().push(RuntimeCall::Draw {
            mount,
            title: scene.title.clone(),
            size,
        });
    }

    fn clear(&self, mount: MountId) {
        self.calls.lock().push(RuntimeCall::Clear { mount });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_ids_unique() {
        assert_ne!(MountId::next(), MountId::next());
    }

    #[test]
    fn test_mount_point_resize_channel() {
        let (mount, tx) = MountPoint::new(Size::new(100, 100));
        tx.send(Size::new(200, 150)).unwrap();
        assert_eq!(*mount.size.borrow(), Size::new(200, 150));
    }
}
