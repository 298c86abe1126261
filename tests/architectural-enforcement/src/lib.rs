//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! of the chat core by scanning its source:
//! - No sleep() calls in production code
//! - Only the controller mutates the conversation
//! - No process-wide cancellation handles
//! - No credentials compiled into source
//!
//! The helpers here are shared by the tests under `tests/`.

use std::fs;
use std::path::{Path, PathBuf};

/// A rule violation at a source location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the violation is in
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Production source directory of the chat core
pub fn core_src_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../chat/core/src")
}

/// Every `.rs` file under `dir`, sorted
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// The part of a line before any `//` comment
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Index of the first line of the file's `#[cfg(test)]` module, if any
pub fn test_module_start(lines: &[&str]) -> Option<usize> {
    lines
        .iter()
        .position(|line| line.trim_start().starts_with("#[cfg(test)]"))
}

/// Scan production lines (comments and test modules excluded) of every file
/// under `dir`, reporting lines for which `is_violation` holds
pub fn scan_production_code<F>(dir: &Path, is_violation: F) -> Vec<Violation>
where
    F: Fn(&Path, &str) -> bool,
{
    let mut violations = Vec::new();
    for path in rust_files(dir) {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        violations.extend(scan_source(&path, &content, &is_violation));
    }
    violations
}

/// Scan one file's contents
pub fn scan_source<F>(path: &Path, content: &str, is_violation: F) -> Vec<Violation>
where
    F: Fn(&Path, &str) -> bool,
{
    let lines: Vec<&str> = content.lines().collect();
    let end = test_module_start(&lines).unwrap_or(lines.len());

    lines[..end]
        .iter()
        .enumerate()
        .filter(|(_, line)| is_violation(path, code_part(line)))
        .map(|(idx, line)| Violation {
            path: path.to_path_buf(),
            line: idx + 1,
            text: line.trim().to_string(),
        })
        .collect()
}

/// Print violations and fail the calling test
///
/// # Panics
///
/// Panics if `violations` is non-empty.
pub fn report(rule: &str, hint: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ CRITICAL: {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    eprintln!("\n✅ {hint}");

    panic!(
        "\nFound {} violation(s) of: {rule}\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comments_are_not_code() {
        assert_eq!(code_part("let x = 1; // sleep(1)"), "let x = 1; ");
        assert_eq!(code_part("/// Uses sleep()"), "");
    }

    #[test]
    fn test_scan_stops_at_test_module() {
        let source = "fn a() { bad(); }\n// bad();\n#[cfg(test)]\nmod tests {\n    fn b() { bad(); }\n}\n";
        let violations = scan_source(Path::new("x.rs"), source, |_, code| code.contains("bad("));

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 1);
    }

    #[test]
    fn test_core_src_dir_exists() {
        assert!(core_src_dir().join("lib.rs").exists());
    }
}
