//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No sleep() calls in production code outside poll timers
//! - No blocking I/O inside async functions
//!
//! The source scanners they share live here. They are line based on purpose
//! and rely on two conventions of the workspace: unit tests sit in a
//! `#[cfg(test)]` module at the bottom of each file, and functions are
//! declared on a single line.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["client/core/src", "client/cli/src"];

/// Workspace root, two levels above this package
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// A Rust source file split into lines
#[derive(Debug)]
pub struct SourceFile {
    /// Path of the file
    pub path: PathBuf,
    /// Lines without terminators
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Build from in-memory text
    #[must_use]
    pub fn from_text(path: impl Into<PathBuf>, text: &str) -> Self {
        Self {
            path: path.into(),
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    /// Index of the first `#[cfg(test)]` line, or the line count
    #[must_use]
    pub fn test_module_start(&self) -> usize {
        self.lines
            .iter()
            .position(|l| l.trim() == "#[cfg(test)]")
            .unwrap_or(self.lines.len())
    }

    /// Production lines with comments stripped, as `(index, code)`
    pub fn production_code(&self) -> impl Iterator<Item = (usize, &str)> {
        self.lines[..self.test_module_start()]
            .iter()
            .enumerate()
            .map(|(idx, line)| (idx, code_part(line)))
    }

    /// Format a violation at a line
    #[must_use]
    pub fn violation(&self, idx: usize, what: &str) -> String {
        format!(
            "{}:{} - {}: {}",
            self.path.display(),
            idx + 1,
            what,
            self.lines[idx].trim()
        )
    }
}

/// Every `.rs` file in the production trees
#[must_use]
pub fn production_files() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(path.exists(), "production tree missing: {}", path.display());

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                if let Ok(text) = fs::read_to_string(entry.path()) {
                    files.push(SourceFile::from_text(entry.path(), &text));
                }
            }
        }
    }

    files
}

/// The line without any trailing `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether a line declares a function, and whether it is async
#[must_use]
pub fn fn_declaration(line: &str) -> Option<bool> {
    let mut rest = line.trim();
    for prefix in ["pub(crate) ", "pub(super) ", "pub ", "const ", "unsafe "] {
        rest = rest.strip_prefix(prefix).unwrap_or(rest);
    }
    if rest.starts_with("async fn ") {
        Some(true)
    } else if rest.starts_with("fn ") {
        Some(false)
    } else {
        None
    }
}

/// Whether the function enclosing a line is async
///
/// Lines outside any function count as not async.
#[must_use]
pub fn in_async_fn(lines: &[String], current_idx: usize) -> bool {
    lines[..=current_idx]
        .iter()
        .rev()
        .find_map(|l| fn_declaration(l))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|l| (*l).to_string()).collect()
    }

    #[test]
    fn test_fn_declaration() {
        assert_eq!(fn_declaration("    pub async fn send(&mut self) {"), Some(true));
        assert_eq!(fn_declaration("fn main() {"), Some(false));
        assert_eq!(fn_declaration("    pub(crate) fn helper() {"), Some(false));
        assert_eq!(fn_declaration("    let f = async move {"), None);
    }

    #[test]
    fn test_in_async_fn() {
        let code = lines(&[
            "async fn bad_function() {",
            "    let contents = std::fs::read_to_string(\"file.txt\")?;",
            "}",
            "fn fine() {",
            "    let contents = std::fs::read_to_string(\"config.toml\")?;",
            "}",
        ]);
        assert!(in_async_fn(&code, 1));
        assert!(!in_async_fn(&code, 4));
    }

    #[test]
    fn test_test_module_excluded() {
        let file = SourceFile::from_text(
            "x.rs",
            "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n",
        );
        assert_eq!(file.test_module_start(), 1);
        assert_eq!(file.production_code().count(), 1);
    }

    #[test]
    fn test_comments_stripped() {
        assert_eq!(code_part("let x = 1; // std::fs::read"), "let x = 1; ");
    }
}
