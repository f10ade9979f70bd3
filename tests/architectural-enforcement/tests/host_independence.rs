//! Integration Test: Host Independence
//!
//! **Policy**: `canvas-core` talks to hosts only through `CanvasMessage`.
//! It never writes to the terminal and never depends on CLI or logging
//! subscriber crates; those belong to the host binaries.

use std::fs;

use architectural_enforcement::{report, scan, workspace_root};

const TERMINAL_OUTPUT: &[&str] = &["println!", "eprintln!", "print!(", "eprint!(", "dbg!("];

/// Test that the core never prints
#[test]
fn test_core_does_not_print() {
    let violations = scan(&["canvas/core/src"], |_, lines, idx| {
        TERMINAL_OUTPUT.iter().any(|p| lines[idx].code.contains(p))
    });

    report("Terminal output in canvas-core (send a CanvasMessage)", &violations);
}

/// Test that the core does not install a subscriber or parse arguments
#[test]
fn test_core_has_no_host_dependencies() {
    let manifest = fs::read_to_string(workspace_root().join("canvas/core/Cargo.toml"))
        .expect("canvas-core manifest");
    let dependencies = manifest
        .split("[dev-dependencies]")
        .next()
        .unwrap_or_default();

    for forbidden in ["clap", "tracing-subscriber"] {
        assert!(
            !dependencies
                .lines()
                .any(|line| line.trim_start().starts_with(forbidden)),
            "canvas-core must not depend on {forbidden}"
        );
    }

    let violations = scan(&["canvas/core/src"], |_, lines, idx| {
        lines[idx].code.contains("tracing_subscriber")
    });
    report("Subscriber setup in canvas-core", &violations);
}
