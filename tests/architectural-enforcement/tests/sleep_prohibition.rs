//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code must not sleep to wait for something.
//! **Exceptions**: Animation timers armed through the timer registry, and
//! retry backoff in the module loader.

use architectural_enforcement::{has_context, report, scan, PRODUCTION_DIRS};

/// Words that mark a sleep as a timer or a backoff
const ALLOWED_CONTEXT: &[&str] = &["backoff", "timers.arm", "timings.for_kind"];

/// Test that production code only sleeps inside timers and backoff
#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(PRODUCTION_DIRS, |_, lines, idx| {
        let code = &lines[idx].code;
        if code.contains("thread::sleep") {
            return true;
        }
        (code.contains("::sleep(") || code.contains(".sleep("))
            && !has_context(lines, idx, 15, ALLOWED_CONTEXT)
    });

    report(
        "Sleep calls found in production code (use a timer or an awaited event)",
        &violations,
    );
}
