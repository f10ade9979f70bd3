//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async functions must not block the runtime.
//! **Required**: `tokio` I/O or the async `reqwest` client inside `async fn`.
//! Blocking reads are fine in plain functions, e.g. loading the config file
//! before the canvas starts.

use architectural_enforcement::{in_async_fn, report, scan, PRODUCTION_DIRS};

const BLOCKING: &[&str] = &[
    "std::fs::",
    "std::net::",
    "reqwest::blocking",
    "std::process::Command",
    "std::io::stdin()",
    "std::io::stdout()",
];

/// Test that no async function performs blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = scan(PRODUCTION_DIRS, |_, lines, idx| {
        let code = &lines[idx].code;
        BLOCKING.iter().any(|pattern| code.contains(pattern)) && in_async_fn(lines, idx)
    });

    report("Blocking I/O in async functions", &violations);
}

/// Test that the blocking client is never imported at all
#[test]
fn test_no_blocking_http_client() {
    let violations = scan(PRODUCTION_DIRS, |_, lines, idx| {
        lines[idx].code.contains("reqwest::blocking")
    });

    report("Blocking HTTP client in use", &violations);
}
