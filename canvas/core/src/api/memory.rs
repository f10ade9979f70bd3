//! In-memory backend
//!
//! Implements both service traits without a network. Used by the test suite
//! and by the CLI's offline demo mode. Behaves like the HTTP services:
//!
//! - a user node without a parent is attached to the last stored node
//! - an AI node with a parent adds (or overwrites) that node's reply
//! - prompts without an account are rejected
//!
//! Failure injection hooks let tests make fetches fail, count how often each
//! path was fetched, and hold fetches open until released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::types::{AppendNodeRequest, PromptRequest, PromptResponse};
use super::{ConversationService, VisualizationSource};
use crate::conversation::{Conversation, ConversationNode, ConversationSummary};
use crate::error::{CanvasError, ResourceKind, Result};
use crate::messages::{ConversationId, Identity, NodeId, Role, VizPath};

/// Files a prompt generates: `(file name, module source)`
type GeneratedFiles = Vec<(String, String)>;

#[derive(Default)]
struct VizState {
    sources: HashMap<VizPath, String>,
    prompt_outputs: HashMap<String, GeneratedFiles>,
    prompt_log: Vec<PromptRequest>,
    fetch_counts: HashMap<VizPath, u32>,
    fail_remaining: HashMap<VizPath, u32>,
    prompt_reply: Option<String>,
    fail_prompts: bool,
}

#[derive(Default)]
struct HistoryState {
    conversations: Vec<Conversation>,
}

impl HistoryState {
    fn find_mut(&mut self, id: &ConversationId) -> Result<&mut Conversation> {
        self.conversations
            .iter_mut()
            .find(|c| c.id == *id)
            .ok_or_else(|| CanvasError::not_found(ResourceKind::Conversation, id))
    }
}

/// Backend that keeps modules and conversations in memory
pub struct InMemoryBackend {
    viz: Mutex<VizState>,
    history: Mutex<HistoryState>,
    gate: watch::Sender<bool>,
    total_fetches: AtomicU64,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Empty backend with fetches open
    #[must_use]
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            viz: Mutex::new(VizState::default()),
            history: Mutex::new(HistoryState::default()),
            gate,
            total_fetches: AtomicU64::new(0),
        }
    }

    /// Store module source under `path`
    pub fn insert_source(&self, path: impl Into<VizPath>, source: impl Into<String>) {
        self.viz.lock().sources.insert(path.into(), source.into());
    }

    /// Make `prompt` generate `files` for the requesting account
    pub fn on_prompt(&self, prompt: impl Into<String>, files: &[(&str, &str)]) {
        let files = files
            .iter()
            .map(|(name, source)| ((*name).to_string(), (*source).to_string()))
            .collect();
        self.viz.lock().prompt_outputs.insert(prompt.into(), files);
    }

    /// Reply text returned with every prompt response
    pub fn set_prompt_reply(&self, reply: impl Into<String>) {
        self.viz.lock().prompt_reply = Some(reply.into());
    }

    /// Make prompt processing fail
    pub fn fail_prompts(&self, fail: bool) {
        self.viz.lock().fail_prompts = fail;
    }

    /// Fail the next `count` fetches of `path` with a network error
    pub fn fail_fetches(&self, path: impl Into<VizPath>, count: u32) {
        self.viz.lock().fail_remaining.insert(path.into(), count);
    }

    /// Block fetches until [`InMemoryBackend::release_fetches`]
    pub fn hold_fetches(&self) {
        self.gate.send_replace(false);
    }

    /// Let held fetches continue
    pub fn release_fetches(&self) {
        self.gate.send_replace(true);
    }

    /// Fetches of `path` so far, including failed ones
    #[must_use]
    pub fn fetch_count(&self, path: &VizPath) -> u32 {
        self.viz.lock().fetch_counts.get(path).copied().unwrap_or(0)
    }

    /// Fetches of any path so far
    #[must_use]
    pub fn total_fetches(&self) -> u64 {
        self.total_fetches.load(Ordering::Relaxed)
    }

    /// Prompt requests received so far
    #[must_use]
    pub fn prompt_requests(&self) -> Vec<PromptRequest> {
        self.viz.lock().prompt_log.clone()
    }

    /// Seed a conversation as if it had been stored earlier
    pub fn insert_conversation(&self, conversation: Conversation) {
        let mut history = self.history.lock();
        history.conversations.retain(|c| c.id != conversation.id);
        history.conversations.push(conversation);
    }

    /// Stored copy of a conversation
    #[must_use]
    pub fn conversation(&self, id: &ConversationId) -> Option<Conversation> {
        self.history
            .lock()
            .conversations
            .iter()
            .find(|c| c.id == *id)
            .cloned()
    }
}

#[async_trait]
impl VisualizationSource for InMemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_source(&self, path: &VizPath) -> Result<String> {
        self.total_fetches.fetch_add(1, Ordering::Relaxed);
        *self
            .viz
            .lock()
            .fetch_counts
            .entry(path.clone())
            .or_insert(0) += 1;

        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(CanvasError::network(path.as_str(), "backend shut down"));
        }

        let mut viz = self.viz.lock();
        if let Some(remaining) = viz.fail_remaining.get_mut(path) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CanvasError::network(path.as_str(), "connection reset"));
            }
        }
        viz.sources
            .get(path)
            .cloned()
            .ok_or_else(|| CanvasError::not_found(ResourceKind::Visualization, path))
    }

    async fn list_owned(&self, owner: &Identity) -> Result<Vec<VizPath>> {
        let scope = owner.scope();
        let mut paths: Vec<VizPath> = self
            .viz
            .lock()
            .sources
            .keys()
            .filter(|p| p.scope() == Some(scope.as_str()))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn list_templates(&self) -> Result<Vec<VizPath>> {
        let mut paths: Vec<VizPath> = self
            .viz
            .lock()
            .sources
            .keys()
            .filter(|p| p.is_template())
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn process_prompt(&self, request: &PromptRequest) -> Result<PromptResponse> {
        if request.prompt.trim().is_empty() {
            return Err(CanvasError::InvalidOperation("missing prompt".to_string()));
        }
        if request.wallet_address.trim().is_empty() {
            return Err(CanvasError::InvalidOperation(
                "missing wallet address".to_string(),
            ));
        }

        let mut viz = self.viz.lock();
        viz.prompt_log.push(request.clone());
        if viz.fail_prompts {
            return Err(CanvasError::network("process-prompt", "agent unavailable"));
        }

        let owner = Identity::new(request.wallet_address.clone());
        let generated = viz
            .prompt_outputs
            .get(&request.prompt)
            .cloned()
            .unwrap_or_default();
        let mut filenames = Vec::with_capacity(generated.len());
        for (name, source) in generated {
            let path = VizPath::owned(&owner, &name);
            viz.sources.insert(path.clone(), source);
            filenames.push(path);
        }

        Ok(PromptResponse {
            success: true,
            message: viz.prompt_reply.clone(),
            filenames,
        })
    }
}

#[async_trait]
impl ConversationService for InMemoryBackend {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        Ok(self
            .history
            .lock()
            .conversations
            .iter()
            .map(Conversation::summary)
            .collect())
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        self.conversation(id)
            .ok_or_else(|| CanvasError::not_found(ResourceKind::Conversation, id))
    }

    async fn create_conversation(&self, title: &str) -> Result<Conversation> {
        let conversation = Conversation::new(ConversationId::generate(), title, Utc::now());
        self.history.lock().conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn append_node(
        &self,
        id: &ConversationId,
        request: &AppendNodeRequest,
    ) -> Result<ConversationNode> {
        let mut history = self.history.lock();
        let conversation = history.find_mut(id)?;

        match request.role {
            Role::User => {
                let parent = request
                    .parent_id
                    .clone()
                    .unwrap_or_else(|| conversation.last_node().id.clone());
                let node =
                    ConversationNode::prompt(NodeId::generate(), parent, &request.content, Utc::now());
                conversation.insert_node(node.clone())?;
                Ok(node)
            }
            Role::Ai => {
                let target = request.parent_id.as_ref().ok_or_else(|| {
                    CanvasError::InvalidOperation("ai message needs a parentId".to_string())
                })?;
                conversation
                    .put_reply(target, &request.content, Utc::now())
                    .cloned()
            }
        }
    }

    async fn fetch_branch(
        &self,
        id: &ConversationId,
        node_id: &NodeId,
    ) -> Result<Vec<ConversationNode>> {
        let mut history = self.history.lock();
        history.find_mut(id)?.subtree(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_failure_injection() {
        let backend = InMemoryBackend::new();
        let path = VizPath::from("a/x.viz");
        backend.insert_source(path.clone(), "{}");
        backend.fail_fetches(path.clone(), 2);

        assert!(backend.fetch_source(&path).await.is_err());
        assert!(backend.fetch_source(&path).await.is_err());
        assert_eq!(backend.fetch_source(&path).await.unwrap(), "{}");
        assert_eq!(backend.fetch_count(&path), 3);
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let backend = InMemoryBackend::new();
        let err = backend
            .fetch_source(&VizPath::from("a/none"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_prompt_generates_owner_scoped_paths() {
        let backend = InMemoryBackend::new();
        backend.on_prompt("show ETH price", &[("eth_price.viz", "{}")]);
        let response = backend
            .process_prompt(&PromptRequest {
                prompt: "show ETH price".into(),
                conversation_id: None,
                node_id: None,
                wallet_address: "0xAddr123".into(),
            })
            .await
            .unwrap();
        assert_eq!(response.filenames, vec![VizPath::from("addr123/eth_price.viz")]);

        let owned = backend.list_owned(&Identity::new("0xAddr123")).await.unwrap();
        assert_eq!(owned, response.filenames);
    }

    #[tokio::test]
    async fn test_prompt_requires_wallet() {
        let backend = InMemoryBackend::new();
        let err = backend
            .process_prompt(&PromptRequest {
                prompt: "x".into(),
                conversation_id: None,
                node_id: None,
                wallet_address: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CanvasError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_user_node_defaults_to_last_node() {
        let backend = InMemoryBackend::new();
        let conversation = backend.create_conversation("t").await.unwrap();
        let first = backend
            .append_node(
                &conversation.id,
                &AppendNodeRequest {
                    content: "one".into(),
                    role: Role::User,
                    parent_id: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(first.parent_id.as_ref(), Some(&conversation.root().id));

        let second = backend
            .append_node(
                &conversation.id,
                &AppendNodeRequest {
                    content: "two".into(),
                    role: Role::User,
                    parent_id: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(second.parent_id.as_ref(), Some(&first.id));
    }

    #[tokio::test]
    async fn test_ai_node_answers_parent() {
        let backend = InMemoryBackend::new();
        let conversation = backend.create_conversation("t").await.unwrap();
        let prompt = backend
            .append_node(
                &conversation.id,
                &AppendNodeRequest {
                    content: "q".into(),
                    role: Role::User,
                    parent_id: None,
                },
            )
            .await
            .unwrap();
        let answered = backend
            .append_node(
                &conversation.id,
                &AppendNodeRequest {
                    content: "a".into(),
                    role: Role::Ai,
                    parent_id: Some(prompt.id.clone()),
                },
            )
            .await
            .unwrap();
        assert_eq!(answered.id, prompt.id);
        assert!(answered.is_answered());
    }

    #[test]
    fn test_held_fetch_waits_for_release() {
        let backend = InMemoryBackend::new();
        let path = VizPath::from("a/x.viz");
        backend.insert_source(path.clone(), "{}");
        backend.hold_fetches();

        let mut fetch = tokio_test::task::spawn(backend.fetch_source(&path));
        tokio_test::assert_pending!(fetch.poll());
        assert_eq!(backend.fetch_count(&path), 1);

        backend.release_fetches();
        assert!(fetch.is_woken());
        let source = tokio_test::assert_ready_ok!(fetch.poll());
        assert_eq!(source, "{}");
    }
}
