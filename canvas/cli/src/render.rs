//! Terminal output
//!
//! [`TerminalRuntime`] stands in for a drawing backend by describing each
//! scene as text; [`print_message`] renders canvas messages for humans or as
//! JSON lines.

use std::io::Write;

use canvas_core::modules::DataSource;
use canvas_core::{CanvasMessage, MountId, NotifyLevel, RenderRuntime, SceneSpec, Size, SlotContent};

/// Runtime that writes a one-line description of every draw to stdout
#[derive(Debug, Default)]
pub struct TerminalRuntime {
    quiet: bool,
}

impl TerminalRuntime {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl RenderRuntime for TerminalRuntime {
    fn name(&self) -> &str {
        "terminal"
    }

    fn draw(&self, mount: MountId, scene: &SceneSpec, size: Size) {
        if self.quiet {
            return;
        }
        let title = scene.title.as_deref().unwrap_or("untitled");
        let series: Vec<&str> = scene
            .series
            .iter()
            .map(|s| s.label.as_deref().unwrap_or(&s.field))
            .collect();
        let data = match &scene.data {
            DataSource::Url(url) => url.clone(),
            DataSource::Inline(rows) => format!("{} inline rows", rows.len()),
        };
        let mut out = std::io::stdout().lock();
        // Ignore closed pipes, the draw is informational
        let _ = writeln!(
            out,
            "  [{mount}] {title} ({:?}, {}x{}) series: {} data: {data}",
            scene.chart,
            size.width,
            size.height,
            if series.is_empty() { "-".to_string() } else { series.join(", ") },
        );
    }

    fn clear(&self, mount: MountId) {
        tracing::debug!(%mount, "Cleared container");
    }
}

/// Print one canvas message
pub fn print_message(msg: &CanvasMessage, json: bool) {
    if json {
        match serde_json::to_string(msg) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize message"),
        }
        return;
    }

    match msg {
        CanvasMessage::State { state } => println!("* {}", state.description()),
        CanvasMessage::Notify {
            level,
            title,
            message,
        } => {
            let tag = match level {
                NotifyLevel::Info => "info",
                NotifyLevel::Warning => "warn",
                NotifyLevel::Error => "error",
                NotifyLevel::Success => "ok",
            };
            match title {
                Some(title) => println!("[{tag}] {title}: {message}"),
                None => println!("[{tag}] {message}"),
            }
        }
        CanvasMessage::ChatHistory { entries, head, .. } => {
            println!("--- history (head {head}) ---");
            for entry in entries {
                println!(
                    "{} {:>4}: {}",
                    entry.timestamp.format("%H:%M:%S"),
                    entry.sender.label(),
                    entry.text
                );
            }
        }
        CanvasMessage::Timeline { moments, .. } => {
            for moment in moments {
                let mark = if moment.has_reply { ' ' } else { '?' };
                println!("  {mark} {}  {}", moment.node_id, moment.preview(60));
            }
        }
        CanvasMessage::ConversationsListed { conversations } => {
            for c in conversations {
                println!("  {}  {} ({} nodes)", c.id, c.title, c.node_count);
            }
        }
        CanvasMessage::LibraryUpdated { owned, templates } => {
            println!("owned ({}):", owned.len());
            for path in owned {
                println!("  {path}");
            }
            println!("templates ({}):", templates.len());
            for path in templates {
                println!("  {path}");
            }
        }
        CanvasMessage::SurfaceUpdated { slots } => {
            for slot in slots {
                let state = match &slot.content {
                    SlotContent::Mounted { mount } => format!("mounted [{mount}]"),
                    SlotContent::Loading => "loading".to_string(),
                    SlotContent::Failed { reason } => format!("failed: {reason}"),
                };
                let new = if slot.is_newest { " (new)" } else { "" };
                println!("  {} {}{new} - {state}", slot.phase, slot.display_name);
            }
        }
        CanvasMessage::IdentityChanged { identity } => match identity {
            Some(id) => println!("* signed in as {id}"),
            None => println!("* signed out"),
        },
        CanvasMessage::SelectionChanged { .. } | CanvasMessage::ScrollIntoView { .. } => {
            tracing::trace!(?msg, "Skipped message");
        }
    }
}
