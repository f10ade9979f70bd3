//! Integration Test: Panic Prohibition
//!
//! **Policy**: Production code propagates errors with `?` or handles them.
//! `unwrap()`, `expect()`, `todo!()` and `unimplemented!()` are only allowed
//! in tests.

use architectural_enforcement::{report, scan, PRODUCTION_DIRS};

const PANICKING: &[&str] = &[".unwrap()", ".expect(", "todo!(", "unimplemented!("];

/// Test that production code never unwraps
#[test]
fn test_no_unwrap_in_production_code() {
    let violations = scan(PRODUCTION_DIRS, |_, lines, idx| {
        PANICKING.iter().any(|p| lines[idx].code.contains(p))
    });

    report("Panicking calls in production code", &violations);
}
