//! Animation State - Per-Item Lifecycle
//!
//! Every displayed visualization moves through an explicit state machine
//! instead of ad-hoc timer flags:
//!
//! ```text
//! idle ──toggle──▶ adding ──settle──▶ active
//!                    │                  │
//!                    └────toggle────────┤
//!                                       ▼
//!   gone ◀──exit── removing ◀───────────┘
//!     │               │
//!     └───toggle──────┴──▶ adding
//! ```
//!
//! The transitions that wait for an animation to finish are driven by the
//! timers in [`timers`]. Surfaces only read the phase; they decide how an
//! "adding" or "removing" item actually looks.

pub mod timers;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use timers::{TimerKind, TimerRegistry, TimerToken};

use crate::error::{CanvasError, Result};

/// Lifecycle phase of one visualization on the canvas
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemPhase {
    /// Never selected
    #[default]
    Idle,
    /// Selected, entry animation running
    Adding,
    /// Selected and settled
    Active,
    /// Deselected, exit animation running
    Removing,
    /// Exit animation finished
    Gone,
}

impl ItemPhase {
    /// Human-readable label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Adding => "adding",
            Self::Active => "active",
            Self::Removing => "removing",
            Self::Gone => "gone",
        }
    }

    /// Whether the item counts as selected
    #[must_use]
    pub fn is_selected(&self) -> bool {
        matches!(self, Self::Adding | Self::Active)
    }

    /// Whether the item is on screen
    #[must_use]
    pub fn is_visible(&self) -> bool {
        matches!(self, Self::Adding | Self::Active | Self::Removing)
    }

    /// Whether `next` is a legal successor
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Gone | Self::Removing, Self::Adding)
                | (Self::Adding, Self::Active)
                | (Self::Adding | Self::Active, Self::Removing)
                | (Self::Removing, Self::Gone)
        )
    }

    /// Move to `next`
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::InvalidOperation`] for an illegal transition.
    pub fn transition(self, next: Self) -> Result<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CanvasError::InvalidOperation(format!(
                "illegal phase transition {} -> {}",
                self.label(),
                next.label()
            )))
        }
    }
}

impl std::fmt::Display for ItemPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Durations of the canvas animations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationTimings {
    /// Entry animation, `adding` to `active`
    pub settle: Duration,
    /// Exit animation, `removing` to `gone`
    pub exit: Duration,
    /// How long the "new" badge stays on
    pub highlight: Duration,
}

impl Default for AnimationTimings {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(600),
            exit: Duration::from_millis(400),
            highlight: Duration::from_secs(4),
        }
    }
}

impl AnimationTimings {
    /// Set the entry duration
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Set the exit duration
    #[must_use]
    pub fn with_exit(mut self, exit: Duration) -> Self {
        self.exit = exit;
        self
    }

    /// Set the highlight duration
    #[must_use]
    pub fn with_highlight(mut self, highlight: Duration) -> Self {
        self.highlight = highlight;
        self
    }

    /// Duration of the timer for `kind`
    #[must_use]
    pub fn for_kind(&self, kind: TimerKind) -> Duration {
        match kind {
            TimerKind::Settle => self.settle,
            TimerKind::Exit => self.exit,
            TimerKind::Highlight => self.highlight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let phase = ItemPhase::Idle
            .transition(ItemPhase::Adding)
            .and_then(|p| p.transition(ItemPhase::Active))
            .and_then(|p| p.transition(ItemPhase::Removing))
            .and_then(|p| p.transition(ItemPhase::Gone))
            .unwrap();
        assert_eq!(phase, ItemPhase::Gone);
    }

    #[test]
    fn test_readd_mid_exit() {
        assert!(ItemPhase::Removing.can_transition_to(ItemPhase::Adding));
        assert!(ItemPhase::Gone.can_transition_to(ItemPhase::Adding));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(ItemPhase::Idle.transition(ItemPhase::Active).is_err());
        assert!(ItemPhase::Active.transition(ItemPhase::Adding).is_err());
        assert!(ItemPhase::Gone.transition(ItemPhase::Removing).is_err());
    }

    #[test]
    fn test_visibility() {
        assert!(ItemPhase::Removing.is_visible());
        assert!(!ItemPhase::Removing.is_selected());
        assert!(!ItemPhase::Gone.is_visible());
    }

    #[test]
    fn test_default_timings() {
        let timings = AnimationTimings::default();
        assert_eq!(timings.for_kind(TimerKind::Highlight), Duration::from_secs(4));
        let fast = timings.with_settle(Duration::ZERO);
        assert_eq!(fast.settle, Duration::ZERO);
    }
}
