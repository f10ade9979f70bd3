//! Architectural Enforcement
//!
//! Source scanners shared by the integration tests in `tests/`:
//! - No sleeping outside timers and retry backoff
//! - No blocking I/O inside async functions
//! - No `unwrap`/`expect` panics in production code
//! - The core stays independent of any terminal or host surface
//!
//! Scans are line based. Everything from the first `#[cfg(test)]` in a file
//! onward counts as test code, matching the layout used across the crates.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["canvas/core/src", "canvas/cli/src"];

/// Workspace root, found from this crate's manifest
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// All `.rs` files under `dir`, sorted
#[must_use]
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

/// One line of production code with comments stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// 1-based line number
    pub number: usize,
    /// Code before any `//`
    pub code: String,
}

/// Production lines of `content`
///
/// Stops at the first `#[cfg(test)]`. Comment-only lines are dropped.
#[must_use]
pub fn production_lines(content: &str) -> Vec<SourceLine> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .filter_map(|(idx, line)| {
            let code = line.split("//").next().unwrap_or(line);
            if code.trim().is_empty() {
                return None;
            }
            Some(SourceLine {
                number: idx + 1,
                code: code.to_string(),
            })
        })
        .collect()
}

/// Whether `code` starts a function item
fn fn_header(code: &str) -> Option<bool> {
    let trimmed = code.trim_start();
    let rest = trimmed
        .strip_prefix("pub(crate) ")
        .or_else(|| trimmed.strip_prefix("pub(super) "))
        .or_else(|| trimmed.strip_prefix("pub "))
        .unwrap_or(trimmed);
    if rest.starts_with("async fn ") {
        Some(true)
    } else if rest.starts_with("fn ") || rest.starts_with("const fn ") {
        Some(false)
    } else {
        None
    }
}

/// Whether the function enclosing `lines[idx]` is `async`
///
/// Looks back for the nearest function header; `false` if none is found.
#[must_use]
pub fn in_async_fn(lines: &[SourceLine], idx: usize) -> bool {
    lines[..=idx]
        .iter()
        .rev()
        .find_map(|line| fn_header(&line.code))
        .unwrap_or(false)
}

/// Whether any of the `before` lines preceding `idx` contain one of `words`
#[must_use]
pub fn has_context(lines: &[SourceLine], idx: usize, before: usize, words: &[&str]) -> bool {
    lines[idx.saturating_sub(before)..=idx].iter().any(|line| {
        let lower = line.code.to_lowercase();
        words.iter().any(|w| lower.contains(w))
    })
}

/// A rule broken at one line
#[derive(Debug, Clone)]
pub struct Violation {
    /// File, relative to the workspace root
    pub file: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Offending code
    pub code: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.file.display(), self.line, self.code.trim())
    }
}

/// Run `check` over every production line under `dirs`
///
/// `check` receives the file's production lines and an index, and returns
/// whether that line violates the rule.
///
/// # Panics
///
/// Panics if a directory holds no Rust files, so a moved crate cannot make
/// a scan pass vacuously.
pub fn scan<F>(dirs: &[&str], check: F) -> Vec<Violation>
where
    F: Fn(&Path, &[SourceLine], usize) -> bool,
{
    let root = workspace_root();
    let mut violations = Vec::new();
    for dir in dirs {
        let files = rust_files(&root.join(dir));
        assert!(!files.is_empty(), "no Rust sources under {dir}");
        for file in files {
            let Ok(content) = fs::read_to_string(&file) else {
                continue;
            };
            let lines = production_lines(&content);
            let relative = file.strip_prefix(&root).unwrap_or(&file).to_path_buf();
            for idx in 0..lines.len() {
                if check(&relative, &lines, idx) {
                    violations.push(Violation {
                        file: relative.clone(),
                        line: lines[idx].number,
                        code: lines[idx].code.clone(),
                    });
                }
            }
        }
    }
    violations
}

/// Print violations and fail
///
/// # Panics
///
/// Always, when `violations` is not empty.
pub fn report(rule: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n{rule}:");
    for violation in violations {
        eprintln!("  {violation}");
    }
    panic!("\nFound {} violation(s). Fix these before merging!", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_tests() {
        let src = "fn a() {}\n// note\n#[cfg(test)]\nmod tests { fn b() { x.unwrap(); } }\n";
        let lines = production_lines(src);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].number, 1);
    }

    #[test]
    fn test_async_detection() {
        let lines = production_lines(
            "pub async fn fetch() {\n    std::fs::read(\"x\");\n}\nfn sync() {\n    std::fs::read(\"y\");\n}\n",
        );
        assert!(in_async_fn(&lines, 1));
        assert!(!in_async_fn(&lines, 4));
    }

    #[test]
    fn test_context_window() {
        let lines = production_lines("let backoff = next();\nfoo();\ntokio::time::sleep(backoff).await;\n");
        assert!(has_context(&lines, 2, 5, &["backoff"]));
        assert!(!has_context(&lines, 1, 0, &["backoff"]));
    }
}
