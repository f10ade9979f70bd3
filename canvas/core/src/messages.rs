//! Canvas Messages
//!
//! Messages sent from the canvas core to whatever surface is hosting it. A
//! surface (terminal, desktop shell, web view) renders what it is told and
//! forwards user actions back as [`crate::events::CanvasEvent`]s.
//!
//! This module also holds the small identifier types shared by every other
//! module: conversation/node ids, visualization paths and the active identity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::conversation::{ChatEntry, ConversationSummary, Moment};
use crate::selection::Layout;
use crate::surface::SlotView;

/// Messages from the canvas core to a UI surface
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CanvasMessage {
    // ============================================
    // Canvas Directives
    // ============================================
    /// The set of displayed visualizations changed
    SelectionChanged {
        /// Active paths in display order
        active: Vec<VizPath>,
        /// Paths still playing their exit animation
        removing: Vec<VizPath>,
        /// Paths carrying the "new" highlight
        newest: Vec<VizPath>,
        /// Layout the surface should use for the active set
        layout: Layout,
    },

    /// Mounted slots after a reconcile pass
    SurfaceUpdated {
        /// One entry per displayed path, in display order
        slots: Vec<SlotView>,
    },

    /// Scroll the given visualization into view
    ScrollIntoView {
        /// Path of the mounted visualization
        path: VizPath,
    },

    /// Visualizations available to the active identity
    LibraryUpdated {
        /// Artifacts generated for the active identity
        owned: Vec<VizPath>,
        /// Shared templates
        templates: Vec<VizPath>,
    },

    // ============================================
    // Conversation Messages
    // ============================================
    /// Linearized chat history for the active branch
    ChatHistory {
        /// Conversation being displayed
        conversation_id: ConversationId,
        /// Head node the history was linearized from
        head: NodeId,
        /// Messages in chronological order
        entries: Vec<ChatEntry>,
    },

    /// History-view moments for the active conversation
    Timeline {
        /// Conversation the moments belong to
        conversation_id: ConversationId,
        /// One moment per user prompt
        moments: Vec<Moment>,
    },

    /// Known conversations
    ConversationsListed {
        /// Summaries in server order
        conversations: Vec<ConversationSummary>,
    },

    // ============================================
    // System Messages
    // ============================================
    /// User-facing notification
    Notify {
        /// Notification level
        level: NotifyLevel,
        /// Title (optional)
        title: Option<String>,
        /// Message content
        message: String,
    },

    /// Canvas state change
    State {
        /// The new state
        state: CanvasState,
    },

    /// The active identity changed
    IdentityChanged {
        /// New identity, `None` when signed out
        identity: Option<Identity>,
    },
}

/// Notification levels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyLevel {
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Error
    Error,
    /// Success
    Success,
}

/// Canvas operational states
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanvasState {
    /// Waiting for input
    #[default]
    Ready,
    /// A prompt is being processed by the backend
    Processing,
    /// Generated visualizations are loading
    Loading,
}

impl CanvasState {
    /// Human-readable description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::Processing => "Generating visualization...",
            Self::Loading => "Loading visualizations...",
        }
    }
}

// ============================================
// Identifiers
// ============================================

/// Conversation identifier (server assigned)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Generate a fresh random identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Conversation node identifier (server assigned)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Generate a fresh random identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Scope name reserved for shared templates
pub const TEMPLATE_SCOPE: &str = "templates";

/// Key of a visualization module
///
/// Opaque to the pipeline; by convention `"{scope}/{file}"` where scope is
/// either a sanitized owner address or [`TEMPLATE_SCOPE`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VizPath(String);

impl VizPath {
    /// Wrap an existing path string
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Path of a file generated for `owner`
    #[must_use]
    pub fn owned(owner: &Identity, file: &str) -> Self {
        Self(format!("{}/{file}", owner.scope()))
    }

    /// Path of a shared template
    #[must_use]
    pub fn template(file: &str) -> Self {
        Self(format!("{TEMPLATE_SCOPE}/{file}"))
    }

    /// The raw path string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scope segment, if the path has one
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.0.rsplit_once('/').map(|(scope, _)| scope)
    }

    /// Last path segment
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit_once('/').map_or(self.0.as_str(), |(_, file)| file)
    }

    /// Whether this path points at a shared template
    #[must_use]
    pub fn is_template(&self) -> bool {
        self.scope() == Some(TEMPLATE_SCOPE)
    }

    /// Human-friendly name: file stem with underscores as spaces
    #[must_use]
    pub fn display_name(&self) -> String {
        let file = self.file_name();
        let stem = file.rsplit_once('.').map_or(file, |(stem, _)| stem);
        stem.replace('_', " ")
    }
}

impl fmt::Display for VizPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VizPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The account the canvas is acting for
///
/// Holds the address exactly as supplied; [`Identity::scope`] gives the form
/// used in visualization paths.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub String);

impl Identity {
    /// Create an identity from an account address
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Path scope for this identity
    #[must_use]
    pub fn scope(&self) -> String {
        sanitize_owner(&self.0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize an account address into a path scope
///
/// Removes every `0x` and lowercases the rest, matching how the
/// visualization service names owner directories.
#[must_use]
pub fn sanitize_owner(address: &str) -> String {
    address.trim().replace("0x", "").to_lowercase()
}

/// Who authored a conversation message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Prompt typed by the user
    User,
    /// Reply generated by the backend
    Ai,
}

impl Role {
    /// Wire label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ai => "ai",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_owner() {
        assert_eq!(sanitize_owner("0xABCdef12"), "abcdef12");
        assert_eq!(sanitize_owner("Addr123"), "addr123");
        assert_eq!(sanitize_owner("0x"), "");
        assert_eq!(sanitize_owner("0XAB"), "0xab");
    }

    #[test]
    fn test_viz_path_parts() {
        let path = VizPath::owned(&Identity::new("0xAddr123"), "eth_price.viz");
        assert_eq!(path.as_str(), "addr123/eth_price.viz");
        assert_eq!(path.scope(), Some("addr123"));
        assert_eq!(path.file_name(), "eth_price.viz");
        assert_eq!(path.display_name(), "eth price");
        assert!(!path.is_template());
    }

    #[test]
    fn test_template_path() {
        let path = VizPath::template("bar_chart.json");
        assert!(path.is_template());
        assert_eq!(path.display_name(), "bar chart");
    }

    #[test]
    fn test_unscoped_path() {
        let path = VizPath::from("loose_file");
        assert_eq!(path.scope(), None);
        assert_eq!(path.file_name(), "loose_file");
        assert_eq!(path.display_name(), "loose file");
    }

    #[test]
    fn test_role_wire_format() {
        assert_eq!(serde_json::to_string(&Role::Ai).unwrap(), "\"ai\"");
        let role: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, Role::User);
    }

    #[test]
    fn test_generated_ids_unique() {
        assert_ne!(NodeId::generate(), NodeId::generate());
        assert_ne!(ConversationId::generate(), ConversationId::generate());
    }

    #[test]
    fn test_canvas_state_description() {
        assert_eq!(CanvasState::Ready.description(), "Ready");
        assert_eq!(CanvasState::default(), CanvasState::Ready);
    }
}
