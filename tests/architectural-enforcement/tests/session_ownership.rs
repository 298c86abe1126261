//! Integration Test: Session Ownership
//!
//! **Policy**: The request controller is the single writer of the
//! conversation, and cancellation tokens live inside request sessions.
//! - Conversation mutators are only called from `controller.rs`
//! - No `static` holds a cancellation token or abort handle
//! - No `static mut`

use std::path::Path;

use architectural_enforcement::{core_src_dir, report, scan_production_code};

const MUTATORS: &[&str] = &[
    ".push_user(",
    ".push_assistant(",
    ".start_assistant(",
    ".append_to(",
    ".truncate_for_regenerate(",
    ".take_input(",
    ".set_state(",
];

fn is_owner(path: &Path) -> bool {
    path.ends_with("controller.rs") || path.ends_with("conversation.rs")
}

/// Test that only the controller mutates the conversation
#[test]
fn test_conversation_mutated_only_by_controller() {
    let violations = scan_production_code(&core_src_dir(), |path, code| {
        !is_owner(path) && MUTATORS.iter().any(|m| code.contains(m))
    });

    report(
        "Conversation mutated outside the controller",
        "Dispatch a ChatIntent to the ChatController instead",
        &violations,
    );
}

/// Test that there is no process-wide cancellation handle
#[test]
fn test_no_global_cancellation_handles() {
    let violations = scan_production_code(&core_src_dir(), |_, code| {
        let code = code.trim_start();
        let is_static = code.starts_with("static ") || code.starts_with("pub static ");
        code.contains("static mut ")
            || (is_static
                && (code.contains("CancellationToken")
                    || code.contains("AbortHandle")
                    || code.contains("RequestSession")))
    });

    report(
        "Global cancellation handle found",
        "Keep the CancellationToken inside the RequestSession that owns it",
        &violations,
    );
}
