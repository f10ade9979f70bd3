//! HTTP client for the visualization and conversation services
//!
//! # Endpoints
//!
//! - `GET  /api/visualizations/{owner}` - list generated files
//! - `GET  /api/visualizations/templates` - list shared templates
//! - `GET  /api/visualizations/{path}` - module source
//! - `POST /api/process-prompt` - generate visualizations for a prompt
//! - `GET|POST /api/conversations[/{id}[/nodes[/{node}/branch]]]` - history
//!
//! A 404 becomes [`CanvasError::NotFound`]; every other failure becomes
//! [`CanvasError::NetworkFailure`] carrying the request target.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::types::{
    AppendNodeRequest, BranchResponse, ConversationListResponse, ConversationRecord,
    CreateConversationRequest, FileListResponse, NodeRecord, PromptRequest, PromptResponse,
    SourceResponse,
};
use super::{ConversationService, VisualizationSource};
use crate::config::ApiConfig;
use crate::conversation::{Conversation, ConversationNode, ConversationSummary};
use crate::error::{CanvasError, ResourceKind, Result};
use crate::messages::{ConversationId, Identity, NodeId, VizPath};

/// Outcome of one request before it is mapped into [`CanvasError`]
enum RequestError {
    NotFound,
    Other(anyhow::Error),
}

impl From<anyhow::Error> for RequestError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err)
    }
}

/// `reqwest`-backed implementation of both service traits
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpBackend {
    /// Create a client for the API at `config.base_url`
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::NetworkFailure`] if the HTTP client cannot be
    /// constructed (for example when no TLS backend is available).
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| CanvasError::network(&config.base_url, e))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Base URL requests are sent to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn visualizations_url(&self, tail: &str) -> String {
        format!("{}/api/visualizations/{tail}", self.base_url)
    }

    fn conversations_url(&self) -> String {
        format!("{}/api/conversations", self.base_url)
    }

    fn conversation_url(&self, id: &ConversationId) -> String {
        format!("{}/{id}", self.conversations_url())
    }

    fn process_prompt_url(&self) -> String {
        format!("{}/api/process-prompt", self.base_url)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<T, RequestError> {
        let response = request.send().await.context("request failed")?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RequestError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("server returned {status}: {body}").into());
        }
        let value = response
            .json::<T>()
            .await
            .context("failed to decode response body")?;
        Ok(value)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: String,
        kind: ResourceKind,
        id: &str,
    ) -> Result<T> {
        tracing::debug!(url = %url, "GET");
        let outcome = self.send_json(self.http_client.get(&url)).await;
        map_outcome(outcome, &url, kind, id)
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        url: String,
        body: &B,
        kind: ResourceKind,
        id: &str,
    ) -> Result<T> {
        tracing::debug!(url = %url, "POST");
        let outcome = self.send_json(self.http_client.post(&url).json(body)).await;
        map_outcome(outcome, &url, kind, id)
    }
}

fn map_outcome<T>(
    outcome: std::result::Result<T, RequestError>,
    url: &str,
    kind: ResourceKind,
    id: &str,
) -> Result<T> {
    outcome.map_err(|err| match err {
        RequestError::NotFound => CanvasError::not_found(kind, id),
        RequestError::Other(e) => CanvasError::network(url, format!("{e:#}")),
    })
}

fn scoped_paths(scope: impl Fn(&str) -> VizPath, files: Vec<String>) -> Vec<VizPath> {
    files
        .into_iter()
        .filter(|name| !name.starts_with('.'))
        .map(|name| scope(&name))
        .collect()
}

#[async_trait]
impl VisualizationSource for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_source(&self, path: &VizPath) -> Result<String> {
        let response: SourceResponse = self
            .get(
                self.visualizations_url(path.as_str()),
                ResourceKind::Visualization,
                path.as_str(),
            )
            .await
            .map_err(|err| match err {
                // Keep the path as the target so retries log something useful
                CanvasError::NetworkFailure { message, .. } => {
                    CanvasError::network(path.as_str(), message)
                }
                other => other,
            })?;
        Ok(response.content)
    }

    async fn list_owned(&self, owner: &Identity) -> Result<Vec<VizPath>> {
        let scope = owner.scope();
        let response: FileListResponse = self
            .get(
                self.visualizations_url(&scope),
                ResourceKind::Visualization,
                &scope,
            )
            .await?;
        Ok(scoped_paths(|file| VizPath::owned(owner, file), response.files))
    }

    async fn list_templates(&self) -> Result<Vec<VizPath>> {
        let response: FileListResponse = self
            .get(
                self.visualizations_url(crate::messages::TEMPLATE_SCOPE),
                ResourceKind::Visualization,
                crate::messages::TEMPLATE_SCOPE,
            )
            .await?;
        Ok(scoped_paths(VizPath::template, response.files))
    }

    async fn process_prompt(&self, request: &PromptRequest) -> Result<PromptResponse> {
        let url = self.process_prompt_url();
        let response: PromptResponse = self
            .post(url.clone(), request, ResourceKind::Visualization, "process-prompt")
            .await?;
        if !response.success {
            return Err(CanvasError::network(
                url,
                response
                    .message
                    .unwrap_or_else(|| "prompt processing failed".to_string()),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl ConversationService for HttpBackend {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let response: ConversationListResponse = self
            .get(self.conversations_url(), ResourceKind::Conversation, "*")
            .await?;
        Ok(response
            .conversations
            .iter()
            .map(ConversationRecord::summary)
            .collect())
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        let record: ConversationRecord = self
            .get(self.conversation_url(id), ResourceKind::Conversation, &id.0)
            .await?;
        record.into_conversation()
    }

    async fn create_conversation(&self, title: &str) -> Result<Conversation> {
        let record: ConversationRecord = self
            .post(
                self.conversations_url(),
                &CreateConversationRequest { title },
                ResourceKind::Conversation,
                title,
            )
            .await?;
        record.into_conversation()
    }

    async fn append_node(
        &self,
        id: &ConversationId,
        request: &AppendNodeRequest,
    ) -> Result<ConversationNode> {
        let record: NodeRecord = self
            .post(
                format!("{}/nodes", self.conversation_url(id)),
                request,
                ResourceKind::Conversation,
                &id.0,
            )
            .await?;
        record.into_node()
    }

    async fn fetch_branch(
        &self,
        id: &ConversationId,
        node_id: &NodeId,
    ) -> Result<Vec<ConversationNode>> {
        let response: BranchResponse = self
            .get(
                format!("{}/nodes/{node_id}/branch", self.conversation_url(id)),
                ResourceKind::Node,
                &node_id.0,
            )
            .await?;
        branch_nodes(node_id, response)
    }
}

/// Nodes of a branch response; an empty branch means the node is unknown
fn branch_nodes(node_id: &NodeId, response: BranchResponse) -> Result<Vec<ConversationNode>> {
    if response.branch.is_empty() {
        return Err(CanvasError::not_found(ResourceKind::Node, node_id));
    }
    response
        .branch
        .into_iter()
        .map(NodeRecord::into_node)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HttpBackend {
        HttpBackend::new(&ApiConfig {
            base_url: "http://localhost:8000/".to_string(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_urls() {
        let backend = backend();
        assert_eq!(backend.base_url(), "http://localhost:8000");
        assert_eq!(
            backend.visualizations_url("addr123/eth_price.viz"),
            "http://localhost:8000/api/visualizations/addr123/eth_price.viz"
        );
        assert_eq!(
            backend.conversation_url(&ConversationId::from("c1")),
            "http://localhost:8000/api/conversations/c1"
        );
        assert_eq!(
            backend.process_prompt_url(),
            "http://localhost:8000/api/process-prompt"
        );
    }

    #[test]
    fn test_map_outcome() {
        let not_found: Result<()> = map_outcome(
            Err(RequestError::NotFound),
            "u",
            ResourceKind::Conversation,
            "c9",
        );
        assert!(not_found.unwrap_err().is_not_found());

        let other: Result<()> = map_outcome(
            Err(RequestError::Other(anyhow::anyhow!("boom"))),
            "u",
            ResourceKind::Conversation,
            "c9",
        );
        assert!(other.unwrap_err().is_retryable());
    }

    #[test]
    fn test_empty_branch_is_not_found() {
        let node = NodeId::from("n404");
        for body in [r#"{ "branch": [] }"#, "{}"] {
            let response: BranchResponse = serde_json::from_str(body).unwrap();
            let err = branch_nodes(&node, response).unwrap_err();
            assert_eq!(err, CanvasError::not_found(ResourceKind::Node, &node));
        }
    }

    #[test]
    fn test_scoped_paths_skip_hidden() {
        let paths = scoped_paths(
            VizPath::template,
            vec![".DS_Store".to_string(), "bar_chart.json".to_string()],
        );
        assert_eq!(paths, vec![VizPath::from("templates/bar_chart.json")]);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_failure() {
        let backend = HttpBackend::new(&ApiConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout: Duration::from_millis(500),
        })
        .unwrap();
        let err = backend
            .fetch_source(&VizPath::from("a/b.viz"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CanvasError::NetworkFailure { ref target, .. } if target == "a/b.viz"
        ));
    }
}
