//! Conversation Tree
//!
//! A conversation is a tree of nodes. The root marks the start of the
//! conversation and carries no messages; every other node holds one user
//! prompt and, once answered, the paired AI reply. Sending a prompt from an
//! older node forks a new branch; nothing is ever merged.
//!
//! # Invariants
//!
//! Enforced by [`Conversation::from_nodes`] and every mutation:
//!
//! - exactly one node is a root, and it is the only node without a parent
//! - every parent id refers to a node in the same conversation
//! - following parents from any node reaches the root (no cycles)
//!
//! # Linearization
//!
//! The chat view shows a single branch: walk from the head to the root,
//! reverse, and flatten each node's messages. Sibling branches never appear.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::types::AppendNodeRequest;
use crate::api::ConversationService;
use crate::error::{CanvasError, ResourceKind, Result};
use crate::messages::{ConversationId, NodeId, Role};

/// Title used when a conversation is created implicitly
pub const DEFAULT_TITLE: &str = "New Conversation";

/// Default preview length in the history view
pub const PREVIEW_CHARS: usize = 60;

// ============================================================================
// Nodes
// ============================================================================

/// Kind of conversation node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Start of the conversation
    Root,
    /// A prompt and its reply
    Message,
}

/// One message inside a node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author
    pub role: Role,
    /// Text
    pub content: String,
    /// When it was written
    pub timestamp: DateTime<Utc>,
}

/// A node in the conversation tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationNode {
    /// Node id
    pub id: NodeId,
    /// Parent id, `None` only for the root
    pub parent_id: Option<NodeId>,
    /// Root or message node
    pub kind: NodeKind,
    /// Prompt followed by the reply, if any
    pub messages: Vec<ChatMessage>,
    /// When the node was created
    pub timestamp: DateTime<Utc>,
}

impl ConversationNode {
    /// Create a root node
    #[must_use]
    pub fn root(id: NodeId, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            parent_id: None,
            kind: NodeKind::Root,
            messages: Vec::new(),
            timestamp,
        }
    }

    /// Create a message node holding a user prompt
    #[must_use]
    pub fn prompt(
        id: NodeId,
        parent_id: NodeId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            parent_id: Some(parent_id),
            kind: NodeKind::Message,
            messages: vec![ChatMessage {
                role: Role::User,
                content: content.into(),
                timestamp,
            }],
            timestamp,
        }
    }

    /// Whether this is the root
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.kind == NodeKind::Root
    }

    /// The user prompt, if present
    #[must_use]
    pub fn user_prompt(&self) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.role == Role::User)
    }

    /// The AI reply, if present
    #[must_use]
    pub fn reply(&self) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.role == Role::Ai)
    }

    /// Whether the node holds an AI reply
    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.reply().is_some()
    }

    /// Add or replace the AI reply
    pub fn set_reply(&mut self, content: impl Into<String>, timestamp: DateTime<Utc>) {
        let content = content.into();
        if let Some(existing) = self.messages.iter_mut().find(|m| m.role == Role::Ai) {
            existing.content = content;
            existing.timestamp = timestamp;
        } else {
            self.messages.push(ChatMessage {
                role: Role::Ai,
                content,
                timestamp,
            });
        }
    }
}

// ============================================================================
// View types
// ============================================================================

/// One linearized chat line
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    /// Message text
    pub text: String,
    /// Author
    pub sender: Role,
    /// When it was written
    pub timestamp: DateTime<Utc>,
}

/// One prompt as shown in the history view
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Moment {
    /// Node holding the prompt
    pub node_id: NodeId,
    /// Parent of that node
    pub parent_id: Option<NodeId>,
    /// Full prompt text
    pub prompt: String,
    /// When the prompt was sent
    pub timestamp: DateTime<Utc>,
    /// Whether the prompt has a reply
    pub has_reply: bool,
}

impl Moment {
    /// Prompt truncated to `max_chars` characters, with `...` when cut
    #[must_use]
    pub fn preview(&self, max_chars: usize) -> String {
        if self.prompt.chars().count() <= max_chars {
            self.prompt.clone()
        } else {
            let cut: String = self.prompt.chars().take(max_chars).collect();
            format!("{cut}...")
        }
    }
}

/// Listing entry for a conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation id
    pub id: ConversationId,
    /// Title
    pub title: String,
    /// Creation time, if the service reported one
    pub created_at: Option<DateTime<Utc>>,
    /// Number of nodes including the root
    pub node_count: usize,
}

// ============================================================================
// Conversation
// ============================================================================

/// A validated conversation tree
#[derive(Clone, Debug)]
pub struct Conversation {
    /// Conversation id
    pub id: ConversationId,
    /// Title
    pub title: String,
    /// Creation time
    pub created_at: Option<DateTime<Utc>>,
    nodes: Vec<ConversationNode>,
    index: HashMap<NodeId, usize>,
    head: NodeId,
}

impl Conversation {
    /// New conversation holding only a root node
    #[must_use]
    pub fn new(id: ConversationId, title: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let root = ConversationNode::root(NodeId::generate(), created_at);
        let head = root.id.clone();
        let index = HashMap::from([(head.clone(), 0)]);
        Self {
            id,
            title: title.into(),
            created_at: Some(created_at),
            nodes: vec![root],
            index,
            head,
        }
    }

    /// Build a conversation from stored nodes, checking the tree invariants
    ///
    /// The head is the most recent node by timestamp; ties go to the node
    /// stored last.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::InvalidTree`] describing the first violation.
    pub fn from_nodes(
        id: ConversationId,
        title: impl Into<String>,
        created_at: Option<DateTime<Utc>>,
        nodes: Vec<ConversationNode>,
    ) -> Result<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (pos, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), pos).is_some() {
                return Err(CanvasError::InvalidTree(format!(
                    "duplicate node id {}",
                    node.id
                )));
            }
        }

        let mut roots = nodes.iter().filter(|n| n.parent_id.is_none());
        let root = roots
            .next()
            .ok_or_else(|| CanvasError::InvalidTree(format!("conversation {id} has no root")))?;
        if roots.next().is_some() {
            return Err(CanvasError::InvalidTree(format!(
                "conversation {id} has more than one parentless node"
            )));
        }
        if !root.is_root() {
            return Err(CanvasError::InvalidTree(format!(
                "parentless node {} is not a root",
                root.id
            )));
        }

        for node in &nodes {
            match &node.parent_id {
                Some(_) if node.is_root() => {
                    return Err(CanvasError::InvalidTree(format!(
                        "root node {} has a parent",
                        node.id
                    )))
                }
                Some(parent) if !index.contains_key(parent) => {
                    return Err(CanvasError::InvalidTree(format!(
                        "node {} references missing parent {parent}",
                        node.id
                    )))
                }
                _ => {}
            }
        }

        let head = nodes
            .iter()
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp))
            .map(|n| n.id.clone())
            .ok_or_else(|| CanvasError::InvalidTree(format!("conversation {id} is empty")))?;

        let conversation = Self {
            id,
            title: title.into(),
            created_at,
            nodes,
            index,
            head,
        };
        conversation.check_acyclic()?;
        Ok(conversation)
    }

    fn check_acyclic(&self) -> Result<()> {
        let mut reaches_root: HashSet<&NodeId> = HashSet::new();
        for node in &self.nodes {
            let mut trail = Vec::new();
            let mut current = node;
            loop {
                if current.parent_id.is_none() || reaches_root.contains(&current.id) {
                    break;
                }
                if trail.contains(&&current.id) {
                    return Err(CanvasError::InvalidTree(format!(
                        "cycle through node {}",
                        current.id
                    )));
                }
                trail.push(&current.id);
                current = match current.parent_id.as_ref().and_then(|p| self.node(p)) {
                    Some(parent) => parent,
                    None => break,
                };
            }
            reaches_root.extend(trail);
        }
        Ok(())
    }

    /// Look up a node
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&ConversationNode> {
        self.index.get(id).map(|&pos| &self.nodes[pos])
    }

    fn require(&self, id: &NodeId) -> Result<&ConversationNode> {
        self.node(id)
            .ok_or_else(|| CanvasError::not_found(ResourceKind::Node, id))
    }

    /// Nodes in storage order
    pub fn nodes(&self) -> impl Iterator<Item = &ConversationNode> {
        self.nodes.iter()
    }

    /// Number of nodes including the root
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a conversation holds at least its root
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The root node
    #[must_use]
    pub fn root(&self) -> &ConversationNode {
        self.nodes
            .iter()
            .find(|n| n.is_root())
            .unwrap_or(&self.nodes[0])
    }

    /// Current head
    #[must_use]
    pub fn head(&self) -> &NodeId {
        &self.head
    }

    /// Node stored last
    #[must_use]
    pub fn last_node(&self) -> &ConversationNode {
        self.nodes.last().unwrap_or_else(|| self.root())
    }

    /// Move the head to `id`
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::NotFound`] if the node does not exist.
    pub fn set_head(&mut self, id: &NodeId) -> Result<()> {
        self.require(id)?;
        self.head = id.clone();
        Ok(())
    }

    /// Direct children of `id` in storage order
    pub fn children<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a ConversationNode> {
        self.nodes
            .iter()
            .filter(move |n| n.parent_id.as_ref() == Some(id))
    }

    /// Add a new node under an existing parent and make it the head
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::InvalidTree`] for a second root, a duplicate id
    /// or a missing parent.
    pub fn insert_node(&mut self, node: ConversationNode) -> Result<()> {
        if self.index.contains_key(&node.id) {
            return Err(CanvasError::InvalidTree(format!(
                "duplicate node id {}",
                node.id
            )));
        }
        match &node.parent_id {
            None => {
                return Err(CanvasError::InvalidTree(format!(
                    "node {} has no parent",
                    node.id
                )))
            }
            Some(parent) if !self.index.contains_key(parent) => {
                return Err(CanvasError::InvalidTree(format!(
                    "node {} references missing parent {parent}",
                    node.id
                )))
            }
            Some(_) if node.is_root() => {
                return Err(CanvasError::InvalidTree(format!(
                    "second root {}",
                    node.id
                )))
            }
            Some(_) => {}
        }
        self.head = node.id.clone();
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Replace an existing node's messages, or insert it if new
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::InvalidTree`] if the replacement changes the
    /// node's parent, or any error from [`Conversation::insert_node`].
    pub fn upsert_node(&mut self, node: ConversationNode) -> Result<()> {
        match self.index.get(&node.id) {
            Some(&pos) => {
                if self.nodes[pos].parent_id != node.parent_id {
                    return Err(CanvasError::InvalidTree(format!(
                        "node {} changed parent",
                        node.id
                    )));
                }
                self.nodes[pos].messages = node.messages;
                Ok(())
            }
            None => self.insert_node(node),
        }
    }

    /// Attach or overwrite the AI reply of `id`
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::NotFound`] for an unknown node and
    /// [`CanvasError::InvalidOperation`] for the root.
    pub fn put_reply(
        &mut self,
        id: &NodeId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<&ConversationNode> {
        let pos = *self
            .index
            .get(id)
            .ok_or_else(|| CanvasError::not_found(ResourceKind::Node, id))?;
        let node = &mut self.nodes[pos];
        if node.is_root() {
            return Err(CanvasError::InvalidOperation(
                "the root node cannot hold a reply".to_string(),
            ));
        }
        node.set_reply(content, timestamp);
        Ok(&self.nodes[pos])
    }

    /// Nodes from the root down to `head`
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::NotFound`] if `head` does not exist.
    pub fn ancestry(&self, head: &NodeId) -> Result<Vec<&ConversationNode>> {
        let mut current = self.require(head)?;
        let mut chain = vec![current];
        while let Some(parent) = &current.parent_id {
            if chain.len() > self.nodes.len() {
                return Err(CanvasError::InvalidTree(format!(
                    "cycle above node {head}"
                )));
            }
            current = self.require(parent)?;
            chain.push(current);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Chronological messages on the branch ending at `head`
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::NotFound`] if `head` does not exist.
    pub fn linearize(&self, head: &NodeId) -> Result<Vec<ChatEntry>> {
        Ok(self
            .ancestry(head)?
            .into_iter()
            .filter(|node| !node.is_root())
            .flat_map(|node| node.messages.iter())
            .map(|m| ChatEntry {
                text: m.content.clone(),
                sender: m.role,
                timestamp: m.timestamp,
            })
            .collect())
    }

    /// Sub-tree rooted at `id`, pre-order, children in storage order
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::NotFound`] if `id` does not exist.
    pub fn subtree(&self, id: &NodeId) -> Result<Vec<ConversationNode>> {
        let mut out = Vec::new();
        let mut stack = vec![self.require(id)?];
        while let Some(node) = stack.pop() {
            out.push(node.clone());
            let children: Vec<_> = self.children(&node.id).collect();
            stack.extend(children.into_iter().rev());
        }
        Ok(out)
    }

    /// History-view moments sorted by timestamp
    #[must_use]
    pub fn timeline(&self) -> Vec<Moment> {
        let mut moments: Vec<Moment> = self
            .nodes
            .iter()
            .filter_map(|node| {
                node.user_prompt().map(|prompt| Moment {
                    node_id: node.id.clone(),
                    parent_id: node.parent_id.clone(),
                    prompt: prompt.content.clone(),
                    timestamp: prompt.timestamp,
                    has_reply: node.is_answered(),
                })
            })
            .collect();
        moments.sort_by_key(|m| m.timestamp);
        moments
    }

    /// Listing entry
    #[must_use]
    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            node_count: self.nodes.len(),
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// Client-side view of the conversation service
///
/// Holds every conversation loaded this session plus which one is active.
/// Loads replace a conversation only after the service returned a valid tree,
/// so a failed load never leaves a partial view behind.
pub struct ConversationStore {
    service: Arc<dyn ConversationService>,
    summaries: Vec<ConversationSummary>,
    loaded: HashMap<ConversationId, Conversation>,
    active: Option<ConversationId>,
}

impl ConversationStore {
    /// Create an empty store backed by `service`
    #[must_use]
    pub fn new(service: Arc<dyn ConversationService>) -> Self {
        Self {
            service,
            summaries: Vec::new(),
            loaded: HashMap::new(),
            active: None,
        }
    }

    /// Conversations from the last refresh plus any created since
    #[must_use]
    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    /// Id of the active conversation
    #[must_use]
    pub fn active_id(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    /// The active conversation
    #[must_use]
    pub fn active(&self) -> Option<&Conversation> {
        self.active.as_ref().and_then(|id| self.loaded.get(id))
    }

    /// A loaded conversation
    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.loaded.get(id)
    }

    fn require(&self, id: &ConversationId) -> Result<&Conversation> {
        self.loaded
            .get(id)
            .ok_or_else(|| CanvasError::not_found(ResourceKind::Conversation, id))
    }

    fn require_mut(&mut self, id: &ConversationId) -> Result<&mut Conversation> {
        self.loaded
            .get_mut(id)
            .ok_or_else(|| CanvasError::not_found(ResourceKind::Conversation, id))
    }

    /// Reload the conversation listing
    ///
    /// # Errors
    ///
    /// Propagates service errors; the previous listing is kept.
    pub async fn refresh(&mut self) -> Result<&[ConversationSummary]> {
        let summaries = self.service.list_conversations().await?;
        tracing::debug!(count = summaries.len(), "Conversation list refreshed");
        self.summaries = summaries;
        Ok(&self.summaries)
    }

    /// Create a conversation and make it active
    ///
    /// # Errors
    ///
    /// Propagates service errors.
    pub async fn create_conversation(&mut self, title: &str) -> Result<&Conversation> {
        let conversation = self.service.create_conversation(title).await?;
        tracing::info!(conversation_id = %conversation.id, title, "Created conversation");
        Ok(self.commit(conversation))
    }

    /// Fetch `id` and make it active
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::NotFound`] or any service/validation error;
    /// in every error case the store is left exactly as it was.
    pub async fn load_conversation(&mut self, id: &ConversationId) -> Result<&Conversation> {
        let conversation = self.fetch(id).await?;
        Ok(self.commit(conversation))
    }

    /// Fetch `id`, move its head to `node` and make it active
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::NotFound`] if either the conversation or the
    /// node does not exist; the store is left exactly as it was.
    pub async fn load_at(&mut self, id: &ConversationId, node: &NodeId) -> Result<&Conversation> {
        let mut conversation = self.fetch(id).await?;
        if let Err(err) = conversation.set_head(node) {
            tracing::warn!(conversation_id = %id, node_id = %node, "History node not found");
            return Err(err);
        }
        Ok(self.commit(conversation))
    }

    async fn fetch(&self, id: &ConversationId) -> Result<Conversation> {
        self.service.get_conversation(id).await.map_err(|err| {
            tracing::warn!(conversation_id = %id, error = %err, "Failed to load conversation");
            err
        })
    }

    fn commit(&mut self, conversation: Conversation) -> &Conversation {
        self.active = Some(conversation.id.clone());
        self.keep(conversation)
    }

    /// Store a fetched conversation without changing which one is active
    fn keep(&mut self, conversation: Conversation) -> &Conversation {
        let id = conversation.id.clone();
        match self.summaries.iter_mut().find(|s| s.id == id) {
            Some(summary) => *summary = conversation.summary(),
            None => self.summaries.push(conversation.summary()),
        }
        match self.loaded.entry(id) {
            Entry::Occupied(mut entry) => {
                entry.insert(conversation);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(conversation),
        }
    }

    /// Make sure some conversation is active
    ///
    /// Uses the first listed conversation, or creates one titled
    /// [`DEFAULT_TITLE`] when none exist.
    ///
    /// # Errors
    ///
    /// Propagates service errors.
    pub async fn ensure_active(&mut self) -> Result<ConversationId> {
        if let Some(id) = self.active.clone() {
            return Ok(id);
        }
        self.refresh().await?;
        let first = self.summaries.first().map(|s| s.id.clone());
        let conversation = match first {
            Some(id) => self.load_conversation(&id).await?,
            None => self.create_conversation(DEFAULT_TITLE).await?,
        };
        Ok(conversation.id.clone())
    }

    /// Append a message
    ///
    /// A user message becomes a new node under `parent_id`, or under the
    /// head when `parent_id` is `None`; the new node becomes the head. An AI
    /// message answers `parent_id` (default: the head). A conversation that
    /// is not loaded yet is fetched first; the active conversation does not
    /// change.
    ///
    /// # Errors
    ///
    /// - [`CanvasError::NotFound`] for an unknown conversation or node
    /// - [`CanvasError::InvalidOperation`] when answering the root or a node
    ///   that already has a reply
    /// - service errors, leaving the local tree unchanged
    pub async fn append_message(
        &mut self,
        conversation_id: &ConversationId,
        content: &str,
        role: Role,
        parent_id: Option<&NodeId>,
    ) -> Result<ConversationNode> {
        if !self.loaded.contains_key(conversation_id) {
            let conversation = self.fetch(conversation_id).await?;
            self.keep(conversation);
        }
        let conversation = self.require(conversation_id)?;
        let target = parent_id.unwrap_or(conversation.head()).clone();
        let target_node = conversation.require(&target)?;

        if role == Role::Ai {
            if target_node.is_root() {
                return Err(CanvasError::InvalidOperation(
                    "cannot answer the root node".to_string(),
                ));
            }
            if target_node.is_answered() {
                return Err(CanvasError::InvalidOperation(format!(
                    "node {target} already has a reply"
                )));
            }
        }

        let request = AppendNodeRequest {
            content: content.to_string(),
            role,
            parent_id: Some(target.clone()),
        };
        let node = self.service.append_node(conversation_id, &request).await?;

        let conversation = self.require_mut(conversation_id)?;
        match role {
            Role::User => {
                if node.parent_id.as_ref() != Some(&target) {
                    return Err(CanvasError::InvalidTree(format!(
                        "service placed node {} under {:?}, expected {target}",
                        node.id, node.parent_id
                    )));
                }
                conversation.insert_node(node.clone())?;
                tracing::debug!(
                    conversation_id = %conversation_id,
                    node_id = %node.id,
                    parent_id = %target,
                    "Appended prompt node"
                );
            }
            Role::Ai => {
                conversation.upsert_node(node.clone())?;
                tracing::debug!(
                    conversation_id = %conversation_id,
                    node_id = %node.id,
                    "Recorded reply"
                );
            }
        }
        if let Some(summary) = self.summaries.iter_mut().find(|s| s.id == *conversation_id) {
            summary.node_count = self.loaded.get(conversation_id).map_or(0, Conversation::len);
        }
        Ok(node)
    }

    /// Chronological messages on the branch ending at `head`
    ///
    /// `None` uses the conversation's current head.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::NotFound`] for an unknown conversation or node.
    pub fn linearize(
        &self,
        conversation_id: &ConversationId,
        head: Option<&NodeId>,
    ) -> Result<Vec<ChatEntry>> {
        let conversation = self.require(conversation_id)?;
        conversation.linearize(head.unwrap_or(conversation.head()))
    }

    /// Move a conversation's head
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::NotFound`] for an unknown conversation or node.
    pub fn set_head(&mut self, conversation_id: &ConversationId, node: &NodeId) -> Result<()> {
        self.require_mut(conversation_id)?.set_head(node)
    }

    /// History-view moments of a loaded conversation
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::NotFound`] for an unknown conversation.
    pub fn timeline(&self, conversation_id: &ConversationId) -> Result<Vec<Moment>> {
        Ok(self.require(conversation_id)?.timeline())
    }

    /// Follow-up nodes below `node`, fetched from the service
    ///
    /// # Errors
    ///
    /// Propagates service errors, including [`CanvasError::NotFound`].
    pub async fn fetch_branch(
        &self,
        conversation_id: &ConversationId,
        node: &NodeId,
    ) -> Result<Vec<ConversationNode>> {
        self.service.fetch_branch(conversation_id, node).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InMemoryBackend;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    fn prompt(id: &str, parent: &str, text: &str, secs: i64) -> ConversationNode {
        ConversationNode::prompt(NodeId::from(id), NodeId::from(parent), text, at(secs))
    }

    /// root -> a -> b, root -> a -> c (sibling of b)
    fn branched() -> Conversation {
        let mut a = prompt("a", "root", "first", 1);
        a.set_reply("first reply", at(2));
        let mut b = prompt("b", "a", "second", 3);
        b.set_reply("second reply", at(4));
        let c = prompt("c", "a", "alternative", 5);
        Conversation::from_nodes(
            ConversationId::from("conv"),
            "t",
            None,
            vec![ConversationNode::root(NodeId::from("root"), at(0)), a, b, c],
        )
        .unwrap()
    }

    #[test]
    fn test_new_conversation_has_single_root() {
        let conversation = Conversation::new(ConversationId::generate(), DEFAULT_TITLE, at(0));
        assert_eq!(conversation.len(), 1);
        assert!(conversation.root().is_root());
        assert_eq!(conversation.head(), &conversation.root().id);
        assert!(conversation.linearize(conversation.head()).unwrap().is_empty());
    }

    #[test]
    fn test_head_is_latest_node() {
        assert_eq!(branched().head(), &NodeId::from("c"));
    }

    #[test]
    fn test_linearize_excludes_sibling_branch() {
        let conversation = branched();
        let entries = conversation.linearize(&NodeId::from("b")).unwrap();
        let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "first reply", "second", "second reply"]);

        let entries = conversation.linearize(&NodeId::from("c")).unwrap();
        let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "first reply", "alternative"]);
        assert_eq!(entries[2].sender, Role::User);
    }

    #[test]
    fn test_linearize_unknown_head() {
        let err = branched().linearize(&NodeId::from("zzz")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_rejects_two_roots() {
        let err = Conversation::from_nodes(
            ConversationId::from("x"),
            "t",
            None,
            vec![
                ConversationNode::root(NodeId::from("r1"), at(0)),
                ConversationNode::root(NodeId::from("r2"), at(1)),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, CanvasError::InvalidTree(_)));
    }

    #[test]
    fn test_rejects_missing_parent() {
        let err = Conversation::from_nodes(
            ConversationId::from("x"),
            "t",
            None,
            vec![
                ConversationNode::root(NodeId::from("r"), at(0)),
                prompt("a", "ghost", "hi", 1),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, CanvasError::InvalidTree(_)));
    }

    #[test]
    fn test_rejects_cycle() {
        let err = Conversation::from_nodes(
            ConversationId::from("x"),
            "t",
            None,
            vec![
                ConversationNode::root(NodeId::from("r"), at(0)),
                prompt("a", "b", "hi", 1),
                prompt("b", "a", "there", 2),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, CanvasError::InvalidTree(_)));
    }

    #[test]
    fn test_insert_rejects_second_root() {
        let mut conversation = branched();
        let mut rogue = ConversationNode::root(NodeId::from("r2"), at(9));
        rogue.parent_id = Some(NodeId::from("a"));
        assert!(conversation.insert_node(rogue).is_err());
        assert_eq!(conversation.len(), 4);
    }

    #[test]
    fn test_subtree_preorder() {
        let ids: Vec<String> = branched()
            .subtree(&NodeId::from("a"))
            .unwrap()
            .into_iter()
            .map(|n| n.id.0)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_timeline_and_preview() {
        let moments = branched().timeline();
        assert_eq!(moments.len(), 3);
        assert_eq!(moments[0].prompt, "first");
        assert!(moments[0].has_reply);
        assert!(!moments[2].has_reply);
        assert_eq!(moments[2].preview(4), "alte...");
        assert_eq!(moments[0].preview(60), "first");
    }

    #[test]
    fn test_put_reply_rejects_root() {
        let mut conversation = branched();
        let err = conversation
            .put_reply(&NodeId::from("root"), "nope", at(9))
            .unwrap_err();
        assert!(matches!(err, CanvasError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_append_to_unloaded_keeps_active() {
        let backend = Arc::new(InMemoryBackend::new());
        let other = ConversationStore::new(backend.clone())
            .create_conversation("Other")
            .await
            .unwrap()
            .id
            .clone();

        let mut store = ConversationStore::new(backend);
        let active = store.create_conversation("Markets").await.unwrap().id.clone();
        let node = store
            .append_message(&other, "show gas fees", Role::User, None)
            .await
            .unwrap();

        assert_eq!(store.active_id(), Some(&active));
        assert_eq!(store.get(&other).unwrap().head(), &node.id);
        assert!(store.conversations().iter().any(|s| s.id == other));
    }
}
