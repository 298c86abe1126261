//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the chat core MUST NOT call sleep methods.
//! Every wait is on I/O: the network, a channel, or a cancellation token.
//! **Exceptions**: test code.

use architectural_enforcement::{core_src_dir, report, scan_production_code};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan_production_code(&core_src_dir(), |_, code| {
        code.contains("::sleep(") || code.contains(".sleep(")
    });

    report(
        "Sleep calls found in production code",
        "Wait on the stream, a channel or CancellationToken::cancelled() instead",
        &violations,
    );
}

/// Test that production code does not block on threads or runtimes
#[test]
fn test_no_blocking_waits_in_production_code() {
    let violations = scan_production_code(&core_src_dir(), |_, code| {
        code.contains("block_on(") || code.contains("std::thread::spawn")
    });

    report(
        "Blocking waits found in production code",
        "The core runs on the caller's async runtime; use tokio::spawn and .await",
        &violations,
    );
}
