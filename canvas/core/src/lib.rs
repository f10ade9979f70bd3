//! Canvas Core - Conversational Visualization Canvas
//!
//! Headless core of the visualization canvas: a chat where every prompt can
//! produce generated charts that are fetched, compiled and mounted next to
//! the conversation. Nothing here depends on a UI toolkit; hosts (the
//! `vizcanvas` CLI, a desktop shell, a web view) drive it through events and
//! render the messages it sends back.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Host Surface                            │
//! │                 CanvasEvent (up)   CanvasMessage (down)          │
//! └────────────────────────────────┬─────────────────────────────────┘
//!                                  │
//! ┌────────────────────────────────┼─────────────────────────────────┐
//! │                         CANVAS CORE                              │
//! │  ┌─────────────────────────────┴──────────────────────────────┐  │
//! │  │                          Canvas                            │  │
//! │  │  ┌──────────────┐  ┌───────────┐  ┌──────────────────────┐ │  │
//! │  │  │ Conversation │  │ Selection │──│ RenderSurfaceManager │ │  │
//! │  │  │    Store     │  │Controller │  └──────────┬───────────┘ │  │
//! │  │  └──────┬───────┘  └─────┬─────┘             │             │  │
//! │  │         │                │        ┌──────────┴──────────┐  │  │
//! │  │         │          ┌─────┴──────┐ │     ModuleCache     │  │  │
//! │  │         │          │  Module    │─│ (one per identity)  │  │  │
//! │  │         │          │  Loader    │ └─────────────────────┘  │  │
//! │  │         │          └─────┬──────┘                          │  │
//! │  └─────────┼────────────────┼─────────────────────────────────┘  │
//! │   ConversationService  VisualizationSource                       │
//! └─────────────┬────────────────┬───────────────────────────────────┘
//!               └────── HTTP / in-memory ──────┘
//! ```
//!
//! # Key Types
//!
//! - [`Canvas`]: Orchestrator owning all session state
//! - [`CanvasEvent`]: Events from a host to the canvas
//! - [`CanvasMessage`]: Messages from the canvas to a host
//! - [`ConversationStore`]: Branching conversation trees
//! - [`ModuleLoader`]: Single-flight fetch, retry and compile
//! - [`SelectionController`]: Selected visualizations and their animations
//! - [`RenderSurfaceManager`]: Mounts compiled units onto containers
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use canvas_core::{Canvas, CanvasConfig, CanvasEvent, HttpBackend, RecordingRuntime};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = canvas_core::config::load_config()?;
//!     let backend = Arc::new(HttpBackend::new(&config.api)?);
//!     let (tx, mut rx) = mpsc::channel(100);
//!
//!     let mut canvas = Canvas::new(config, backend.clone(), backend, Arc::new(RecordingRuntime::new()), tx);
//!     canvas.start().await?;
//!     canvas.handle_event(CanvasEvent::SubmitPrompt { text: "show ETH price".into() }).await?;
//!     canvas.finish_loads().await;
//!
//!     while let Ok(msg) = rx.try_recv() {
//!         // Render message
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`animation`]: Per-item lifecycle phases and cancellable timers
//! - [`api`]: Service traits, HTTP client and in-memory backend
//! - [`canvas`]: The orchestrator
//! - [`config`]: TOML/env/CLI configuration
//! - [`conversation`]: Conversation trees and the store
//! - [`error`]: Error taxonomy
//! - [`events`]: Events from hosts
//! - [`messages`]: Messages to hosts and shared identifiers
//! - [`modules`]: Cache, loader, compiler and render runtime contract
//! - [`selection`]: Selection controller and layout
//! - [`surface`]: Render surface manager

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod animation;
pub mod api;
pub mod canvas;
pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod messages;
pub mod modules;
pub mod selection;
pub mod surface;

// Re-exports for convenience
pub use animation::{AnimationTimings, ItemPhase, TimerKind};
pub use api::{
    ConversationService, HttpBackend, InMemoryBackend, PromptRequest, PromptResponse,
    VisualizationSource,
};
pub use canvas::{Canvas, CanvasUpdate, Library, LoadOrigin};
pub use config::{ApiConfig, CanvasConfig, ConfigError, ConfigOverrides, ConfigSource};
pub use conversation::{
    ChatEntry, ChatMessage, Conversation, ConversationNode, ConversationStore,
    ConversationSummary, Moment, NodeKind,
};
pub use error::{CanvasError, ResourceKind, Result};
pub use events::CanvasEvent;
pub use messages::{
    CanvasMessage, CanvasState, ConversationId, Identity, NodeId, NotifyLevel, Role, VizPath,
};
pub use modules::{
    CompiledUnit, LoadState, ModuleCache, ModuleLoader, MountId, RecordingRuntime,
    RenderRuntime, RetryConfig, SceneSpec, Size,
};
pub use selection::{Layout, SelectionController, SelectionSnapshot, ToggleOutcome};
pub use surface::{RenderSurfaceManager, SlotContent, SlotView};
