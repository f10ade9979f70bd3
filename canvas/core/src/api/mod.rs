//! Backend service clients
//!
//! The canvas talks to two external services through traits so the core can
//! run against the real HTTP API or an in-process fake:
//!
//! - [`VisualizationSource`]: module source, library listings, prompt processing
//! - [`ConversationService`]: conversation persistence
//!
//! [`HttpBackend`] implements both over `reqwest`; [`InMemoryBackend`] keeps
//! everything in memory and adds failure injection for tests.

pub mod http;
pub mod memory;
pub mod types;

use async_trait::async_trait;

pub use http::HttpBackend;
pub use memory::InMemoryBackend;
pub use types::{AppendNodeRequest, PromptRequest, PromptResponse};

use crate::conversation::{Conversation, ConversationNode, ConversationSummary};
use crate::error::Result;
use crate::messages::{ConversationId, Identity, NodeId, VizPath};

/// Source of visualization modules
#[async_trait]
pub trait VisualizationSource: Send + Sync {
    /// Name for logging
    fn name(&self) -> &str;

    /// Fetch the source text of one module
    async fn fetch_source(&self, path: &VizPath) -> Result<String>;

    /// List modules generated for `owner`
    async fn list_owned(&self, owner: &Identity) -> Result<Vec<VizPath>>;

    /// List shared templates
    async fn list_templates(&self) -> Result<Vec<VizPath>>;

    /// Submit a prompt; returns the generated paths
    async fn process_prompt(&self, request: &PromptRequest) -> Result<PromptResponse>;
}

/// Persistence for conversation trees
#[async_trait]
pub trait ConversationService: Send + Sync {
    /// List all conversations
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>>;

    /// Fetch one conversation with all of its nodes
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation>;

    /// Create a conversation holding only a root node
    async fn create_conversation(&self, title: &str) -> Result<Conversation>;

    /// Append a user node or answer an existing node
    async fn append_node(
        &self,
        id: &ConversationId,
        request: &AppendNodeRequest,
    ) -> Result<ConversationNode>;

    /// Sub-tree rooted at `node_id`, pre-order
    async fn fetch_branch(
        &self,
        id: &ConversationId,
        node_id: &NodeId,
    ) -> Result<Vec<ConversationNode>>;
}
