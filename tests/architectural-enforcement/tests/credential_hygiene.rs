//! Integration Test: Credential Hygiene
//!
//! **Policy**: Provider credentials are supplied by configuration or the
//! environment at process start, never compiled into source.
//! - No API-key-shaped string literals
//! - No literal `Bearer` header values
//! - Authorization headers are built only by the model descriptor

use architectural_enforcement::{core_src_dir, report, scan_production_code};

/// Test that no API keys are embedded in production code
#[test]
fn test_no_embedded_api_keys() {
    let violations = scan_production_code(&core_src_dir(), |_, code| {
        code.contains("\"sk-") || code.contains("api_key: Some(\"")
    });

    report(
        "API key literal found in production code",
        "Read keys from the model's api_key_env variable or the config file",
        &violations,
    );
}

/// Test that bearer tokens are never written out by hand
#[test]
fn test_no_literal_bearer_headers() {
    let violations = scan_production_code(&core_src_dir(), |_, code| {
        code.contains("\"Bearer ") || code.contains("\"Authorization\"")
    });

    report(
        "Hand-built Authorization header found",
        "Use ModelDescriptor::authorize, which injects the configured credential",
        &violations,
    );
}

/// Test that only the registry attaches credentials to requests
#[test]
fn test_bearer_auth_only_in_registry() {
    let violations = scan_production_code(&core_src_dir(), |path, code| {
        code.contains(".bearer_auth(") && !path.ends_with("registry.rs")
    });

    report(
        "Credential attached outside the model registry",
        "Call ModelDescriptor::authorize on the request builder",
        &violations,
    );
}
