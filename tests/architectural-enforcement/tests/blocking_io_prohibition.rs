//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async functions MUST NOT use blocking I/O. The socket goes
//! through `tokio::net`; files may only be read from synchronous functions
//! (configuration loading, CLI argument handling) that run outside the
//! driver task.

use architectural_enforcement::{in_async_fn, production_files, SourceFile};

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let mut violations = Vec::new();
    for file in production_files() {
        check_file(&file, &mut violations);
    }

    if !violations.is_empty() {
        eprintln!("\n❌ Blocking I/O found in async production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n❌ FORBIDDEN in async functions:");
        eprintln!("  - std::fs::*, std::net::*, std::os::unix::net::*");
        eprintln!("  - std::process::Command");
        eprintln!("  - std::io::stdin()");
        eprintln!("\n✅ REQUIRED:");
        eprintln!("  - tokio::net::UnixStream for the snapd socket");
        eprintln!("  - Blocking reads only in synchronous functions");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

const BLOCKING_PATTERNS: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::os::unix::net::", "Blocking socket I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("std::io::stdin()", "Blocking stdin"),
];

fn check_file(file: &SourceFile, violations: &mut Vec<String>) {
    for (idx, code) in file.production_code() {
        // Module-level imports would make blocking calls easy to hide
        if code.trim_start().starts_with("use std::net")
            || code.trim_start().starts_with("use std::os::unix::net")
        {
            violations.push(file.violation(idx, "Blocking network import"));
            continue;
        }

        for (pattern, what) in BLOCKING_PATTERNS {
            if code.contains(pattern) && in_async_fn(&file.lines, idx) {
                violations.push(file.violation(idx, what));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_read_in_async_fn_rejected() {
        let file = SourceFile::from_text(
            "bad.rs",
            "async fn bad_function() {\n    let contents = std::fs::read_to_string(\"file.txt\")?;\n}\n",
        );
        let mut violations = Vec::new();
        check_file(&file, &mut violations);
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn test_blocking_read_in_sync_fn_allowed() {
        let file = SourceFile::from_text(
            "config.rs",
            "pub fn load() {\n    let contents = std::fs::read_to_string(\"config.toml\")?;\n}\n",
        );
        let mut violations = Vec::new();
        check_file(&file, &mut violations);
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[test]
    fn test_std_socket_import_rejected() {
        let file = SourceFile::from_text("net.rs", "use std::os::unix::net::UnixStream;\n");
        let mut violations = Vec::new();
        check_file(&file, &mut violations);
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn test_test_module_ignored() {
        let file = SourceFile::from_text(
            "ok.rs",
            "#[cfg(test)]\nmod tests {\n    async fn t() {\n        std::fs::read(\"x\");\n    }\n}\n",
        );
        let mut violations = Vec::new();
        check_file(&file, &mut violations);
        assert!(violations.is_empty());
    }
}
