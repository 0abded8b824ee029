//! Integration Test: Panic-Free Production Code
//!
//! **Policy**: Production code propagates errors with `?` or handles them.
//! `unwrap()` and `expect()` are for tests only.

use architectural_enforcement::{report, scan};

#[test]
fn test_no_unwrap_in_production_code() {
    let violations = scan(|_, _, code| {
        if code.contains(".unwrap()") {
            Some("unwrap()")
        } else if code.contains(".expect(") {
            Some("expect()")
        } else {
            None
        }
    });

    report("CRITICAL: unwrap()/expect() found in production code!", &violations);
}
