//! Wire formats for the visualization and conversation services
//!
//! Records here mirror the JSON the services exchange and are converted into
//! domain types at the edge. Conversation nodes arrive in two shapes:
//!
//! - current: `{ id, parentId, timestamp, messages: [{ type, content, timestamp }] }`
//! - legacy: `{ id, parentId, timestamp, type: "user" | "ai", content }`
//!
//! The root node is `{ id, type: "root", parentId: null, ... }` in both.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::{ChatMessage, Conversation, ConversationNode, ConversationSummary, NodeKind};
use crate::error::{CanvasError, Result};
use crate::messages::{ConversationId, NodeId, Role, VizPath};

// ============================================================================
// Visualization service
// ============================================================================

/// `GET /api/visualizations/{owner}` and `/templates`
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FileListResponse {
    /// File names inside the listed scope
    #[serde(default)]
    pub files: Vec<String>,
}

/// `GET /api/visualizations/{path}`
#[derive(Clone, Debug, Deserialize)]
pub struct SourceResponse {
    /// Module source text
    pub content: String,
}

/// `POST /api/process-prompt` body
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    /// Prompt text
    pub prompt: String,
    /// Conversation the prompt belongs to
    pub conversation_id: Option<ConversationId>,
    /// Node created for the prompt
    pub node_id: Option<NodeId>,
    /// Account the generated files are stored under
    pub wallet_address: String,
}

/// `POST /api/process-prompt` response
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptResponse {
    /// Whether generation succeeded
    #[serde(default = "default_true")]
    pub success: bool,
    /// Status or reply text
    #[serde(default)]
    pub message: Option<String>,
    /// Generated paths, already owner-scoped
    #[serde(default)]
    pub filenames: Vec<VizPath>,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Conversation service
// ============================================================================

/// `POST /api/conversations` body
#[derive(Clone, Debug, Serialize)]
pub struct CreateConversationRequest<'a> {
    /// Conversation title
    pub title: &'a str,
}

/// `POST /api/conversations/{id}/nodes` body
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendNodeRequest {
    /// Message text
    pub content: String,
    /// Author of the message
    #[serde(rename = "type")]
    pub role: Role,
    /// Parent node for user messages, answered node for AI messages
    pub parent_id: Option<NodeId>,
}

/// `GET /api/conversations`
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConversationListResponse {
    /// All conversations
    #[serde(default)]
    pub conversations: Vec<ConversationRecord>,
}

/// `GET .../nodes/{nodeId}/branch`
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BranchResponse {
    /// Sub-tree rooted at the requested node, pre-order
    #[serde(default)]
    pub branch: Vec<NodeRecord>,
}

/// A conversation as stored by the service
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    /// Conversation id
    pub id: ConversationId,
    /// Title
    #[serde(default)]
    pub title: String,
    /// Creation time
    #[serde(default, alias = "created_at")]
    pub created_at: Option<String>,
    /// Nodes in storage order
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
}

impl ConversationRecord {
    /// Summary without validating the node tree
    #[must_use]
    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self
                .created_at
                .as_deref()
                .and_then(|ts| parse_timestamp(ts).ok()),
            node_count: self.nodes.len(),
        }
    }

    /// Convert into a validated [`Conversation`]
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::InvalidTree`] if any node is malformed or the
    /// nodes do not form a single rooted tree.
    pub fn into_conversation(self) -> Result<Conversation> {
        let created_at = match self.created_at.as_deref() {
            Some(ts) => Some(parse_timestamp(ts)?),
            None => None,
        };
        let nodes = self
            .nodes
            .into_iter()
            .map(NodeRecord::into_node)
            .collect::<Result<Vec<_>>>()?;
        Conversation::from_nodes(self.id, self.title, created_at, nodes)
    }
}

/// One message inside a current-format node
#[derive(Clone, Debug, Deserialize)]
pub struct MessageRecord {
    /// Author
    #[serde(rename = "type")]
    pub role: Role,
    /// Text
    pub content: String,
    /// When the message was written
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// A node in either wire shape
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    /// Node id
    pub id: NodeId,
    /// Parent id, null for the root
    #[serde(default)]
    pub parent_id: Option<NodeId>,
    /// `root`, or `user`/`ai` for legacy single-message nodes
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Legacy message text
    #[serde(default)]
    pub content: Option<String>,
    /// Creation time
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Current-format messages
    #[serde(default)]
    pub messages: Option<Vec<MessageRecord>>,
}

impl NodeRecord {
    /// Convert into a domain node
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::InvalidTree`] when the record matches neither
    /// wire shape or carries an unparsable timestamp.
    pub fn into_node(self) -> Result<ConversationNode> {
        let timestamp = match self.timestamp.as_deref() {
            Some(ts) => parse_timestamp(ts)?,
            None => {
                return Err(CanvasError::InvalidTree(format!(
                    "node {} has no timestamp",
                    self.id
                )))
            }
        };

        if self.kind.as_deref() == Some("root") {
            return Ok(ConversationNode {
                id: self.id,
                parent_id: self.parent_id,
                kind: NodeKind::Root,
                messages: Vec::new(),
                timestamp,
            });
        }

        let messages = if let Some(records) = self.messages {
            records
                .into_iter()
                .map(|m| {
                    let at = match m.timestamp.as_deref() {
                        Some(ts) => parse_timestamp(ts)?,
                        None => timestamp,
                    };
                    Ok(ChatMessage {
                        role: m.role,
                        content: m.content,
                        timestamp: at,
                    })
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            let role = match self.kind.as_deref() {
                Some("user") => Role::User,
                Some("ai") => Role::Ai,
                other => {
                    return Err(CanvasError::InvalidTree(format!(
                        "node {} has unknown type {other:?} and no messages",
                        self.id
                    )))
                }
            };
            vec![ChatMessage {
                role,
                content: self.content.unwrap_or_default(),
                timestamp,
            }]
        };

        Ok(ConversationNode {
            id: self.id,
            parent_id: self.parent_id,
            kind: NodeKind::Message,
            messages,
            timestamp,
        })
    }
}

/// Parse an ISO-8601 timestamp, treating offset-less values as UTC
///
/// # Errors
///
/// Returns [`CanvasError::InvalidTree`] if the value is not a timestamp.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Ok(with_offset.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| CanvasError::InvalidTree(format!("bad timestamp {raw:?}: {e}")))
}
