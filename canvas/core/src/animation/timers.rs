//! Cancellable animation timers
//!
//! Each (path, kind) pair has at most one armed timer. Arming replaces and
//! aborts the previous one. Every timer carries a token; when it fires it
//! must present the token to [`TimerRegistry::complete`], which fails if the
//! timer was cancelled or replaced after it had already woken up.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;

use crate::messages::VizPath;

/// What a timer ends
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    /// Entry animation
    Settle,
    /// Exit animation
    Exit,
    /// "New" badge
    Highlight,
}

/// Identity of one armed timer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

struct Armed {
    token: TimerToken,
    handle: AbortHandle,
}

/// Armed timers keyed by path and kind
#[derive(Default)]
pub struct TimerRegistry {
    armed: HashMap<(VizPath, TimerKind), Armed>,
    next_token: u64,
}

impl TimerRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer, replacing any armed timer for the same key
    ///
    /// `spawn` receives the new token and returns the handle of the task
    /// that will call [`TimerRegistry::complete`] with it.
    pub fn arm(
        &mut self,
        path: VizPath,
        kind: TimerKind,
        spawn: impl FnOnce(TimerToken) -> AbortHandle,
    ) -> TimerToken {
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        let handle = spawn(token);
        if let Some(previous) = self.armed.insert((path, kind), Armed { token, handle }) {
            previous.handle.abort();
        }
        token
    }

    /// Claim a fired timer
    ///
    /// Returns `true` and disarms it only if `token` is still current.
    pub fn complete(&mut self, path: &VizPath, kind: TimerKind, token: TimerToken) -> bool {
        let key = (path.clone(), kind);
        match self.armed.get(&key) {
            Some(armed) if armed.token == token => {
                self.armed.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Whether a timer is armed for the key
    #[must_use]
    pub fn is_armed(&self, path: &VizPath, kind: TimerKind) -> bool {
        self.armed.contains_key(&(path.clone(), kind))
    }

    /// Cancel one timer
    pub fn cancel(&mut self, path: &VizPath, kind: TimerKind) -> bool {
        match self.armed.remove(&(path.clone(), kind)) {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer for `path`
    pub fn cancel_path(&mut self, path: &VizPath) {
        self.armed.retain(|(p, _), armed| {
            if p == path {
                armed.handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Cancel every timer
    pub fn cancel_all(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.handle.abort();
        }
    }

    /// Number of armed timers
    #[must_use]
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    /// Whether no timers are armed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_task() -> AbortHandle {
        tokio::spawn(std::future::pending::<()>()).abort_handle()
    }

    #[tokio::test]
    async fn test_arm_replaces_and_aborts_previous() {
        let mut registry = TimerRegistry::new();
        let path = VizPath::from("a/x");

        let mut first_handle = None;
        let first = registry.arm(path.clone(), TimerKind::Settle, |_| {
            let handle = idle_task();
            first_handle = Some(handle.clone());
            handle
        });
        let second = registry.arm(path.clone(), TimerKind::Settle, |_| idle_task());

        assert_ne!(first, second);
        assert_eq!(registry.len(), 1);
        assert!(!registry.complete(&path, TimerKind::Settle, first));
        assert!(registry.complete(&path, TimerKind::Settle, second));
        assert!(registry.is_empty());

        let first_handle = first_handle.unwrap();
        for _ in 0..10 {
            if first_handle.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(first_handle.is_finished());
    }

    #[tokio::test]
    async fn test_cancel_path_leaves_other_paths() {
        let mut registry = TimerRegistry::new();
        let a = VizPath::from("a/x");
        let b = VizPath::from("a/y");
        registry.arm(a.clone(), TimerKind::Settle, |_| idle_task());
        registry.arm(a.clone(), TimerKind::Highlight, |_| idle_task());
        let token = registry.arm(b.clone(), TimerKind::Exit, |_| idle_task());

        registry.cancel_path(&a);
        assert!(!registry.is_armed(&a, TimerKind::Settle));
        assert!(registry.is_armed(&b, TimerKind::Exit));
        assert!(registry.complete(&b, TimerKind::Exit, token));
    }
}
