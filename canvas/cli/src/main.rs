//! vizcanvas - Command-line host for the visualization canvas
//!
//! Drives a [`canvas_core::Canvas`] from the terminal: submit prompts, browse
//! conversation history, list the visualization library and mount
//! visualizations with a text-only render runtime.
//!
//! # Usage
//!
//! ```bash
//! # Ask for a chart as an account
//! vizcanvas --account 0xabc123 prompt show ETH price
//!
//! # Keep running until entry and highlight animations finish
//! vizcanvas --account 0xabc123 prompt --wait show ETH price
//!
//! # List conversations, then show one at a given node
//! vizcanvas history
//! vizcanvas history 42 --node 7
//!
//! # Library and mounting
//! vizcanvas --account 0xabc123 library
//! vizcanvas show templates/gas_fees.viz
//!
//! # No server needed
//! vizcanvas --demo --account 0xabc123 prompt compare ETH and BTC
//! ```
//!
//! # Environment Variables
//!
//! - `VIZCANVAS_CONFIG`: Config file path
//! - `VIZCANVAS_ACCOUNT`: Account address
//! - `VIZCANVAS_API_URL` and the other `VIZCANVAS_*` settings from the core
//! - `RUST_LOG`: Overrides `--log-level`

mod demo;
mod render;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use canvas_core::config::load_config_from_path;
use canvas_core::{
    Canvas, CanvasConfig, CanvasEvent, CanvasMessage, ConfigOverrides, ConversationId,
    ConversationService, HttpBackend, Identity, NodeId, NotifyLevel, VisualizationSource,
    VizPath,
};

use render::{print_message, TerminalRuntime};

/// vizcanvas - conversational visualization canvas
#[derive(Parser, Debug)]
#[command(name = "vizcanvas")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "VIZCANVAS_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// API base URL, overrides config and environment
    #[arg(long, value_name = "URL", global = true)]
    api_url: Option<String>,

    /// Request timeout in milliseconds
    #[arg(long, value_name = "MS", global = true)]
    timeout_ms: Option<u64>,

    /// Account address to act as
    #[arg(short = 'a', long, env = "VIZCANVAS_ACCOUNT", global = true)]
    account: Option<String>,

    /// Use built-in sample data instead of the API
    #[arg(long, global = true)]
    demo: bool,

    /// Print messages as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "VIZCANVAS_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a prompt and mount what it generates
    Prompt {
        /// Prompt text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,

        /// Wait for animations to finish before exiting
        #[arg(long)]
        wait: bool,
    },

    /// List conversations, or print one conversation's history
    History {
        /// Conversation to open
        conversation: Option<String>,

        /// Node to make the head
        #[arg(long, requires = "conversation")]
        node: Option<String>,
    },

    /// List templates and, with an account, owned visualizations
    Library,

    /// Mount one or more visualizations by path
    Show {
        /// Paths such as templates/gas_fees.viz
        #[arg(required = true, num_args = 1..)]
        paths: Vec<String>,

        /// Viewport width in pixels, picks the grid layout
        #[arg(long, default_value_t = 1024)]
        width: u32,
    },
}

/// Initialize logging to stderr at `level`
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("canvas_cli={level},canvas_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve configuration: file, then environment, then flags
fn resolve_config(args: &Args) -> Result<CanvasConfig> {
    let mut config = load_config_from_path(
        args.config
            .clone()
            .or_else(canvas_core::config::default_config_path),
    )
    .context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(url) = &args.api_url {
        overrides = overrides.with_api_url(url.clone());
    }
    if let Some(ms) = args.timeout_ms {
        overrides = overrides.with_request_timeout_ms(ms);
    }
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(source = %config.source(), base_url = %config.api.base_url, "Configuration loaded");
    Ok(config)
}

type Backends = (Arc<dyn VisualizationSource>, Arc<dyn ConversationService>);

fn backends(config: &CanvasConfig, demo: bool) -> Result<Backends> {
    if demo {
        info!("Using demo backend");
        let backend = Arc::new(demo::backend());
        return Ok((backend.clone(), backend));
    }
    let backend = Arc::new(
        HttpBackend::new(&config.api)
            .with_context(|| format!("Failed to create client for {}", config.api.base_url))?,
    );
    Ok((backend.clone(), backend))
}

/// A canvas plus the receiving end of its message channel
struct Session {
    canvas: Canvas,
    rx: mpsc::Receiver<CanvasMessage>,
    json: bool,
}

impl Session {
    async fn start(config: CanvasConfig, backends: Backends, json: bool) -> Result<Self> {
        let (source, service) = backends;
        let (tx, rx) = mpsc::channel(256);
        let runtime = Arc::new(TerminalRuntime::new(json));
        let mut canvas = Canvas::new(config, source, service, runtime, tx);
        canvas.start().await?;

        let mut session = Self { canvas, rx, json };
        session.drain_problems();
        Ok(session)
    }

    async fn sign_in(&mut self, account: Option<&str>) -> Result<()> {
        let Some(account) = account else {
            return Ok(());
        };
        self.canvas
            .handle_event(CanvasEvent::SwitchIdentity {
                identity: Some(Identity::new(account)),
            })
            .await?;
        self.drain_problems();
        Ok(())
    }

    async fn send(&mut self, event: CanvasEvent) -> Result<()> {
        debug!(event = event.name(), "Dispatching");
        self.canvas.handle_event(event).await?;
        self.drain();
        Ok(())
    }

    /// Wait for background loads and print their outcomes
    async fn settle(&mut self) {
        if self.canvas.loads_in_flight() > 0 {
            debug!(loads = self.canvas.loads_in_flight(), "Waiting for loads");
        }
        self.canvas.finish_loads().await;
        self.drain();
    }

    fn drain(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            print_message(&msg, self.json);
        }
    }

    /// Drop startup chatter, keep warnings and errors
    fn drain_problems(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            if let CanvasMessage::Notify {
                level: NotifyLevel::Warning | NotifyLevel::Error,
                ..
            } = &msg
            {
                print_message(&msg, self.json);
            }
        }
    }

    /// Redraw on every load and timer until none are pending or Ctrl-C
    async fn wait_for_animations(&mut self) {
        let timings = self.canvas.selection().timings();
        let limit = timings.settle + timings.highlight + Duration::from_secs(1);
        let wait = async {
            while self.canvas.selection().pending_timers() > 0 || self.canvas.loads_in_flight() > 0 {
                if !self.canvas.changed().await {
                    break;
                }
                self.canvas.sync_surface();
                self.drain();
            }
        };

        tokio::select! {
            result = tokio::time::timeout(limit, wait) => {
                if result.is_err() {
                    warn!("Timed out waiting for animations");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
            }
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = resolve_config(&args)?;
    let backends = backends(&config, args.demo)?;
    let mut session = Session::start(config, backends, args.json).await?;
    session.sign_in(args.account.as_deref()).await?;

    match args.command {
        Command::Prompt { text, wait } => {
            if args.account.is_none() {
                anyhow::bail!("An account is required to submit prompts (use --account)");
            }
            session
                .send(CanvasEvent::SubmitPrompt {
                    text: text.join(" "),
                })
                .await?;
            if wait {
                session.wait_for_animations().await;
            }
            session.settle().await;
        }
        Command::History { conversation, node } => match (conversation, node) {
            (Some(conversation), Some(node)) => {
                session
                    .send(CanvasEvent::SelectHistoryNode {
                        conversation_id: ConversationId::from(conversation.as_str()),
                        node_id: NodeId::from(node.as_str()),
                    })
                    .await?;
            }
            (Some(conversation), None) => {
                session
                    .send(CanvasEvent::OpenConversation {
                        conversation_id: ConversationId::from(conversation.as_str()),
                    })
                    .await?;
            }
            (None, _) => {
                let listing = CanvasMessage::ConversationsListed {
                    conversations: session.canvas.store().conversations().to_vec(),
                };
                print_message(&listing, session.json);
            }
        },
        Command::Library => {
            session.send(CanvasEvent::RefreshLibrary).await?;
        }
        Command::Show { paths, width } => {
            session.send(CanvasEvent::ResizeViewport { width }).await?;
            for path in paths {
                session
                    .send(CanvasEvent::ToggleVisualization {
                        path: VizPath::new(path),
                    })
                    .await?;
            }
            session.settle().await;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    debug!(version = env!("CARGO_PKG_VERSION"), "vizcanvas starting");
    run(args).await
}
