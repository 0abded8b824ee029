//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async functions MUST NOT use blocking file, network or
//! stdout I/O. Non-async functions (config loading before the stream starts,
//! the one-shot `diff` command) may.

use architectural_enforcement::{is_in_async_function, report, scan};

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = scan(|lines, idx, code| {
        if !is_in_async_function(lines, idx) {
            return None;
        }
        if code.contains("std::fs::") {
            Some("Blocking file I/O")
        } else if code.contains("std::net::") {
            Some("Blocking network I/O")
        } else if code.contains("std::io::stdin()") || code.contains("std::io::stdout()") {
            Some("Blocking stdin/stdout in async")
        } else if code.contains("std::process::Command") {
            Some("Blocking process I/O")
        } else {
            None
        }
    });

    report("CRITICAL: Blocking I/O calls found in async code!", &violations);
}
