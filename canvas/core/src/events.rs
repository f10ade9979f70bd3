//! Canvas Events
//!
//! Events sent from a hosting surface to the canvas core. Surfaces report
//! what the user did; [`crate::canvas::Canvas`] decides what it means and
//! answers with [`crate::messages::CanvasMessage`]s.

use serde::{Deserialize, Serialize};

use crate::messages::{ConversationId, Identity, NodeId, VizPath};
use crate::modules::Size;

/// Events from a UI surface to the canvas
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CanvasEvent {
    // ============================================
    // User Input Events
    // ============================================
    /// User submitted a prompt
    SubmitPrompt {
        /// Prompt text
        text: String,
    },

    /// User clicked a visualization in the library or on the canvas
    ToggleVisualization {
        /// Visualization path
        path: VizPath,
    },

    // ============================================
    // History Events
    // ============================================
    /// User picked a moment in the history view
    SelectHistoryNode {
        /// Conversation the node belongs to
        conversation_id: ConversationId,
        /// Node to make the head
        node_id: NodeId,
    },

    /// User opened a conversation from the list
    OpenConversation {
        /// Conversation to open
        conversation_id: ConversationId,
    },

    /// User started a new conversation
    NewConversation {
        /// Title, defaults to "New Conversation"
        title: Option<String>,
    },

    // ============================================
    // Session Events
    // ============================================
    /// The connected account changed
    SwitchIdentity {
        /// New account, `None` when disconnected
        identity: Option<Identity>,
    },

    /// User asked to reload the visualization library
    RefreshLibrary,

    // ============================================
    // Layout Events
    // ============================================
    /// A mounted container changed size
    ResizeMount {
        /// Visualization whose container resized
        path: VizPath,
        /// New container size
        size: Size,
    },

    /// The surface viewport changed width
    ResizeViewport {
        /// New width in surface pixels
        width: u32,
    },
}

impl CanvasEvent {
    /// Short name for logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SubmitPrompt { .. } => "submit_prompt",
            Self::ToggleVisualization { .. } => "toggle_visualization",
            Self::SelectHistoryNode { .. } => "select_history_node",
            Self::OpenConversation { .. } => "open_conversation",
            Self::NewConversation { .. } => "new_conversation",
            Self::SwitchIdentity { .. } => "switch_identity",
            Self::RefreshLibrary => "refresh_library",
            Self::ResizeMount { .. } => "resize_mount",
            Self::ResizeViewport { .. } => "resize_viewport",
        }
    }
}
