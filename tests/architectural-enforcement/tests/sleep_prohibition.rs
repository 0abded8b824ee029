//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call sleep methods. Waiting is done
//! on channels, tokens or `tokio::time::interval`.
//! **Exceptions**: test code

use architectural_enforcement::{report, scan};

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(|_, _, code| {
        (code.contains("::sleep(") || code.contains(".sleep(")).then_some("Sleep call")
    });

    if !violations.is_empty() {
        eprintln!("\n✅ ACCEPTABLE alternatives:");
        eprintln!("  - tokio::time::interval() for periodic work");
        eprintln!("  - CancellationToken / watch channels to wait for events");
    }
    report("CRITICAL: Sleep calls found in production code!", &violations);
}
