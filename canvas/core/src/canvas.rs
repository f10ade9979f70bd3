//! Canvas - The Orchestration Core
//!
//! The canvas owns every piece of session state: the conversation store, the
//! module cache and loader, the selection and the mounted surfaces, plus the
//! active identity. Hosts feed it [`CanvasEvent`]s and render the
//! [`CanvasMessage`]s it sends back.
//!
//! # Event loop
//!
//! ```text
//! loop {
//!     tokio::select! {
//!         Some(event) = events.recv() => canvas.handle_event(event).await?,
//!         true = canvas.changed() => canvas.sync_surface(),
//!     }
//! }
//! ```
//!
//! Module loads never run inside [`Canvas::handle_event`]. Selecting a path
//! shows its placeholder at once and starts the load as a background task,
//! so a toggle-off or identity switch can be handled while it is in flight.
//! Animation timers also advance the selection in the background. `changed`
//! resolves whenever either happens, reporting finished loads to the host
//! first, so the host can reconcile the surface again.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::api::{ConversationService, PromptRequest, VisualizationSource};
use crate::config::CanvasConfig;
use crate::conversation::{ConversationStore, DEFAULT_TITLE};
use crate::error::{CanvasError, Result};
use crate::events::CanvasEvent;
use crate::messages::{
    CanvasMessage, CanvasState, ConversationId, Identity, NodeId, NotifyLevel, Role, VizPath,
};
use crate::modules::{Generation, ModuleCache, ModuleLoader, RenderRuntime, SceneCompiler, Size};
use crate::selection::{SelectionController, ToggleOutcome};
use crate::surface::RenderSurfaceManager;

/// Visualizations offered in the library panel
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Library {
    /// Generated for the active identity
    pub owned: Vec<VizPath>,
    /// Shared templates
    pub templates: Vec<VizPath>,
}

/// Why a module load was started
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOrigin {
    /// Generated by a prompt; success is announced
    Prompt,
    /// Picked by the user; only failures are announced
    Toggle,
}

/// Background progress reported by [`Canvas::next_update`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CanvasUpdate {
    /// An animation timer or selection change bumped the revision
    Revision,
    /// A module load finished
    LoadFinished {
        /// Path that was loaded
        path: VizPath,
        /// What started the load
        origin: LoadOrigin,
        /// Outcome; [`CanvasError::Superseded`] if the identity changed meanwhile
        result: Result<()>,
    },
}

struct LoadDone {
    path: VizPath,
    origin: LoadOrigin,
    generation: Generation,
    result: Result<()>,
}

/// The canvas orchestrator
pub struct Canvas {
    /// Configuration
    config: CanvasConfig,
    /// Module source and prompt agent
    source: Arc<dyn VisualizationSource>,
    /// Conversation trees
    store: ConversationStore,
    /// Single-flight module loader
    loader: ModuleLoader,
    /// Selected visualizations and their phases
    selection: SelectionController,
    /// Mounted units
    surface: RenderSurfaceManager,
    /// Account generated files belong to
    identity: Option<Identity>,
    /// Last library listing
    library: Library,
    /// Current state
    state: CanvasState,
    /// Channel to the host surface
    tx: mpsc::Sender<CanvasMessage>,
    /// Selection revisions seen by the surface
    revisions: watch::Receiver<u64>,
    /// Module loads running in the background
    loads: JoinSet<LoadDone>,
}

impl Canvas {
    /// Create a canvas
    ///
    /// `runtime` draws every compiled unit; messages for the host go to `tx`.
    pub fn new(
        config: CanvasConfig,
        source: Arc<dyn VisualizationSource>,
        service: Arc<dyn ConversationService>,
        runtime: Arc<dyn RenderRuntime>,
        tx: mpsc::Sender<CanvasMessage>,
    ) -> Self {
        let cache = Arc::new(ModuleCache::new());
        let loader = ModuleLoader::new(
            Arc::clone(&source),
            Arc::new(SceneCompiler::new(runtime)),
            cache,
            config.retry.clone(),
        );
        let selection = SelectionController::new(config.animation);
        let revisions = selection.subscribe();

        Self {
            config,
            source,
            store: ConversationStore::new(service),
            loader,
            selection,
            surface: RenderSurfaceManager::default(),
            identity: None,
            library: Library::default(),
            state: CanvasState::Ready,
            tx,
            revisions,
            loads: JoinSet::new(),
        }
    }

    /// Announce readiness and load the initial listings
    ///
    /// Listing failures are reported to the host and do not abort startup.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        tracing::info!(source = self.source.name(), "Canvas starting");
        self.set_state(CanvasState::Ready);

        match self.store.refresh().await {
            Ok(conversations) => {
                let conversations = conversations.to_vec();
                self.send(CanvasMessage::ConversationsListed { conversations });
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to list conversations");
                self.notify(NotifyLevel::Warning, "Conversation history is unavailable");
            }
        }

        if let Err(err) = self.refresh_library().await {
            tracing::warn!(error = %err, "Failed to list visualizations");
            self.notify(NotifyLevel::Warning, "Visualization library is unavailable");
        }
        Ok(())
    }

    /// Handle an event from the host surface
    pub async fn handle_event(&mut self, event: CanvasEvent) -> anyhow::Result<()> {
        tracing::debug!(event = event.name(), "Handling canvas event");
        let name = event.name();

        let result = match event {
            CanvasEvent::SubmitPrompt { text } => self.submit_prompt(&text).await,
            CanvasEvent::ToggleVisualization { path } => {
                self.toggle_visualization(&path);
                Ok(())
            }
            CanvasEvent::SelectHistoryNode {
                conversation_id,
                node_id,
            } => {
                self.select_history_node(&conversation_id, &node_id).await;
                Ok(())
            }
            CanvasEvent::OpenConversation { conversation_id } => {
                self.open_conversation(&conversation_id).await
            }
            CanvasEvent::NewConversation { title } => {
                self.new_conversation(title.as_deref().unwrap_or(DEFAULT_TITLE))
                    .await
            }
            CanvasEvent::SwitchIdentity { identity } => self.switch_identity(identity).await,
            CanvasEvent::RefreshLibrary => self.refresh_library().await,
            CanvasEvent::ResizeMount { path, size } => {
                self.resize_mount(&path, size);
                Ok(())
            }
            CanvasEvent::ResizeViewport { width } => {
                self.surface.set_viewport_width(width);
                self.sync_surface();
                Ok(())
            }
        };

        if let Err(err) = result {
            tracing::warn!(event = name, error = %err, "Canvas event failed");
            self.notify(NotifyLevel::Error, &err.to_string());
        }
        Ok(())
    }

    // ========================================================================
    // Prompt flow
    // ========================================================================

    async fn submit_prompt(&mut self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CanvasError::InvalidOperation("prompt is empty".to_string()));
        }
        let Some(identity) = self.identity.clone() else {
            return Err(CanvasError::InvalidOperation(
                "connect an account before sending a prompt".to_string(),
            ));
        };

        self.set_state(CanvasState::Processing);
        let result = self.run_prompt(text, &identity).await;
        if self.state != CanvasState::Loading || self.loads.is_empty() {
            self.set_state(CanvasState::Ready);
        }
        result
    }

    async fn run_prompt(&mut self, text: &str, identity: &Identity) -> Result<()> {
        let conversation_id = self.store.ensure_active().await?;
        let node = self
            .store
            .append_message(&conversation_id, text, Role::User, None)
            .await?;

        let request = PromptRequest {
            prompt: text.to_string(),
            conversation_id: Some(conversation_id.clone()),
            node_id: Some(node.id.clone()),
            wallet_address: identity.0.clone(),
        };
        let response = match self.source.process_prompt(&request).await {
            Ok(response) => response,
            Err(err) => {
                self.emit_history(&conversation_id);
                return Err(err);
            }
        };
        tracing::info!(
            conversation_id = %conversation_id,
            node_id = %node.id,
            generated = response.filenames.len(),
            "Prompt processed"
        );

        if let Some(reply) = response.message.as_deref().filter(|m| !m.trim().is_empty()) {
            if let Err(err) = self
                .store
                .append_message(&conversation_id, reply, Role::Ai, Some(&node.id))
                .await
            {
                tracing::warn!(node_id = %node.id, error = %err, "Failed to record reply");
            }
        }
        self.emit_history(&conversation_id);

        if response.filenames.is_empty() {
            self.notify(NotifyLevel::Info, "No visualizations were generated");
            return Ok(());
        }

        self.set_state(CanvasState::Loading);
        let paths = response.filenames;
        for path in &paths {
            self.selection.ensure_selected(path);
            self.spawn_load(path.clone(), LoadOrigin::Prompt);
        }
        self.selection.highlight_newest(&paths);
        self.sync_surface();

        if let Err(err) = self.refresh_library().await {
            tracing::debug!(error = %err, "Library refresh after prompt failed");
        }
        Ok(())
    }

    // ========================================================================
    // Selection
    // ========================================================================

    fn toggle_visualization(&mut self, path: &VizPath) {
        if self.selection.toggle(path) == ToggleOutcome::Added {
            self.spawn_load(path.clone(), LoadOrigin::Toggle);
        }
        self.sync_surface();
    }

    /// Load `path` in the background
    fn spawn_load(&mut self, path: VizPath, origin: LoadOrigin) {
        let generation = self.loader.cache().generation();
        let load = self.loader.begin_load(&path);
        self.loads.spawn(async move {
            let result = load.await.map(|_| ());
            LoadDone {
                path,
                origin,
                generation,
                result,
            }
        });
    }

    /// Report a finished load to the host
    fn finish_load(&mut self, done: LoadDone) -> CanvasUpdate {
        let LoadDone {
            path,
            origin,
            generation,
            mut result,
        } = done;
        if generation != self.loader.cache().generation() {
            result = Err(CanvasError::Superseded { path: path.clone() });
        }

        match &result {
            Err(CanvasError::Superseded { .. }) => {
                tracing::debug!(path = %path, "Discarding load from previous identity");
            }
            Ok(()) if origin == LoadOrigin::Prompt => self.notify_titled(
                NotifyLevel::Success,
                "Visualization ready",
                &format!("New visualization created: {}", path.display_name()),
            ),
            Ok(()) => {}
            Err(err) if !self.selection.is_selected(&path) => {
                tracing::debug!(path = %path, error = %err, "Deselected visualization failed to load");
            }
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "Selected visualization failed to load");
                self.notify_titled(
                    NotifyLevel::Error,
                    "Visualization failed",
                    &format!("Failed to load {}: {err}", path.display_name()),
                );
            }
        }
        self.loads_settled();

        CanvasUpdate::LoadFinished {
            path,
            origin,
            result,
        }
    }

    fn loads_settled(&mut self) {
        if self.loads.is_empty() && self.state == CanvasState::Loading {
            self.set_state(CanvasState::Ready);
        }
    }

    /// Reconcile mounts with the selection and tell the host
    pub fn sync_surface(&mut self) {
        let _seen = *self.revisions.borrow_and_update();
        publish(&self.selection, &mut self.surface, self.loader.cache(), &self.tx);
    }

    /// Resolves when a load finished or a timer changed the selection
    ///
    /// Returns `false` once the selection controller is gone.
    pub async fn changed(&mut self) -> bool {
        self.next_update().await.is_some()
    }

    /// Next piece of background progress
    ///
    /// Finished loads are reported to the host (notifications, state) before
    /// they are returned. Returns `None` once the selection controller is gone.
    pub async fn next_update(&mut self) -> Option<CanvasUpdate> {
        loop {
            tokio::select! {
                biased;
                Some(joined) = self.loads.join_next(), if !self.loads.is_empty() => match joined {
                    Ok(done) => return Some(self.finish_load(done)),
                    Err(err) => {
                        tracing::error!(error = %err, "Module load task failed");
                        self.loads_settled();
                    }
                },
                changed = self.revisions.changed() => {
                    return changed.ok().map(|()| CanvasUpdate::Revision);
                }
            }
        }
    }

    /// Wait for every in-flight load, then reconcile the surface
    pub async fn finish_loads(&mut self) {
        while let Some(joined) = self.loads.join_next().await {
            match joined {
                Ok(done) => {
                    self.finish_load(done);
                }
                Err(err) => tracing::error!(error = %err, "Module load task failed"),
            }
        }
        self.loads_settled();
        self.sync_surface();
    }

    /// Module loads still running
    #[must_use]
    pub fn loads_in_flight(&self) -> usize {
        self.loads.len()
    }

    fn resize_mount(&self, path: &VizPath, size: Size) {
        if let Err(err) = self.surface.resize(path, size) {
            tracing::debug!(path = %path, error = %err, "Resize for unmounted visualization");
        }
    }

    // ========================================================================
    // History
    // ========================================================================

    async fn select_history_node(&mut self, conversation_id: &ConversationId, node_id: &NodeId) {
        match self.store.load_at(conversation_id, node_id).await {
            Ok(_) => self.emit_history(conversation_id),
            Err(err) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    node_id = %node_id,
                    error = %err,
                    "History selection failed"
                );
                self.notify_titled(
                    NotifyLevel::Error,
                    "Failed to load conversation",
                    &err.to_string(),
                );
            }
        }
    }

    async fn open_conversation(&mut self, conversation_id: &ConversationId) -> Result<()> {
        self.store.load_conversation(conversation_id).await?;
        self.emit_history(conversation_id);
        Ok(())
    }

    async fn new_conversation(&mut self, title: &str) -> Result<()> {
        let id = self.store.create_conversation(title).await?.id.clone();
        self.send(CanvasMessage::ConversationsListed {
            conversations: self.store.conversations().to_vec(),
        });
        self.emit_history(&id);
        Ok(())
    }

    fn emit_history(&self, conversation_id: &ConversationId) {
        let Some(conversation) = self.store.get(conversation_id) else {
            return;
        };
        let head = conversation.head().clone();
        match conversation.linearize(&head) {
            Ok(entries) => self.send(CanvasMessage::ChatHistory {
                conversation_id: conversation_id.clone(),
                head,
                entries,
            }),
            Err(err) => {
                tracing::error!(conversation_id = %conversation_id, error = %err, "Linearize failed");
                return;
            }
        }
        self.send(CanvasMessage::Timeline {
            conversation_id: conversation_id.clone(),
            moments: conversation.timeline(),
        });
    }

    // ========================================================================
    // Identity and library
    // ========================================================================

    async fn switch_identity(&mut self, identity: Option<Identity>) -> Result<()> {
        if identity.as_ref().map(Identity::scope) == self.identity.as_ref().map(Identity::scope) {
            return Ok(());
        }
        tracing::info!(
            identity = identity.as_ref().map(Identity::scope).as_deref().unwrap_or("none"),
            "Switching identity"
        );

        self.loader.reset_identity();
        self.selection.clear();
        self.surface.teardown_all();
        self.identity = identity;
        self.library = Library::default();

        self.send(CanvasMessage::IdentityChanged {
            identity: self.identity.clone(),
        });
        self.sync_surface();
        self.refresh_library().await
    }

    async fn refresh_library(&mut self) -> Result<()> {
        let owned = match &self.identity {
            Some(identity) => self.source.list_owned(identity).await?,
            None => Vec::new(),
        };
        let templates = self.source.list_templates().await?;
        tracing::debug!(owned = owned.len(), templates = templates.len(), "Library refreshed");

        self.library = Library { owned, templates };
        self.send(CanvasMessage::LibraryUpdated {
            owned: self.library.owned.clone(),
            templates: self.library.templates.clone(),
        });
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current state
    #[must_use]
    pub fn state(&self) -> CanvasState {
        self.state
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &CanvasConfig {
        &self.config
    }

    /// Active identity
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Last library listing
    #[must_use]
    pub fn library(&self) -> &Library {
        &self.library
    }

    /// Conversation store
    #[must_use]
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Module loader
    #[must_use]
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// Selection controller
    #[must_use]
    pub fn selection(&self) -> &SelectionController {
        &self.selection
    }

    /// Surface manager
    #[must_use]
    pub fn surface(&self) -> &RenderSurfaceManager {
        &self.surface
    }

    // ========================================================================
    // Messaging helpers
    // ========================================================================

    fn set_state(&mut self, state: CanvasState) {
        if self.state != state {
            self.state = state;
            self.send(CanvasMessage::State { state });
        }
    }

    fn notify(&self, level: NotifyLevel, message: &str) {
        self.send(CanvasMessage::Notify {
            level,
            title: None,
            message: message.to_string(),
        });
    }

    fn notify_titled(&self, level: NotifyLevel, title: &str, message: &str) {
        self.send(CanvasMessage::Notify {
            level,
            title: Some(title.to_string()),
            message: message.to_string(),
        });
    }

    fn send(&self, msg: CanvasMessage) {
        deliver(&self.tx, msg);
    }
}

/// Send a message to the host without waiting on a full channel
fn deliver(tx: &mpsc::Sender<CanvasMessage>, msg: CanvasMessage) {
    if let Err(e) = tx.try_send(msg) {
        tracing::warn!("Failed to send message to surface (channel may be full): {}", e);
    }
}

/// Reconcile the surface with the selection and send the result
fn publish(
    selection: &SelectionController,
    surface: &mut RenderSurfaceManager,
    cache: &ModuleCache,
    tx: &mpsc::Sender<CanvasMessage>,
) {
    let snapshot = selection.snapshot();
    let update = surface.reconcile(&snapshot, cache);

    if !update.mounted.is_empty() || !update.unmounted.is_empty() {
        tracing::debug!(
            mounted = update.mounted.len(),
            unmounted = update.unmounted.len(),
            "Surface reconciled"
        );
    }

    deliver(
        tx,
        CanvasMessage::SelectionChanged {
            active: snapshot.active,
            removing: snapshot.removing,
            newest: snapshot.newest,
            layout: update.layout,
        },
    );
    deliver(tx, CanvasMessage::SurfaceUpdated { slots: update.slots });
    if let Some(path) = update.scroll_to {
        selection.acknowledge_scroll(&path);
        deliver(tx, CanvasMessage::ScrollIntoView { path });
    }
}
