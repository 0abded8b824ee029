//! Architectural Enforcement Integration Tests
//!
//! Source scanners shared by the tests in `tests/`:
//! - No sleep() calls in production code
//! - No blocking I/O inside async functions
//! - No unwrap()/expect() outside test code
//!
//! Production code is everything under `diffstream/*/src` that precedes the
//! file's `#[cfg(test)]` module.

use std::fs;
use std::path::{Path, PathBuf};

/// Source roots that count as production code
pub const PRODUCTION_DIRS: &[&str] = &["diffstream/core/src", "diffstream/cli/src"];

/// A rule violation at a source line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the violation is in
    pub path: PathBuf,
    /// 1-based line number
    pub line_number: usize,
    /// What was found
    pub kind: &'static str,
    /// Trimmed source line
    pub line: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line_number,
            self.kind,
            self.line
        )
    }
}

/// Workspace root, resolved from this crate's manifest
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from("../.."))
}

/// Every production `.rs` file with its contents
pub fn production_sources() -> Vec<(PathBuf, String)> {
    let root = workspace_root();
    let mut sources = Vec::new();
    for dir in PRODUCTION_DIRS {
        for entry in walkdir::WalkDir::new(root.join(dir))
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            if let Ok(content) = fs::read_to_string(entry.path()) {
                sources.push((entry.path().to_path_buf(), content));
            }
        }
    }
    sources
}

/// The part of a line before any `//` comment
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Index of the first line of the file's test module, if any
pub fn test_section_start(lines: &[&str]) -> Option<usize> {
    lines
        .iter()
        .position(|line| line.trim_start().starts_with("#[cfg(test)]"))
}

/// Whether the line is inside test code
pub fn is_in_test_code(lines: &[&str], current_idx: usize) -> bool {
    if test_section_start(lines).is_some_and(|start| current_idx >= start) {
        return true;
    }
    enclosing_fn(lines, current_idx).is_some_and(|fn_idx| has_test_marker(lines, fn_idx))
}

/// Whether the line is inside an `async fn`
pub fn is_in_async_function(lines: &[&str], current_idx: usize) -> bool {
    enclosing_fn(lines, current_idx).is_some_and(|fn_idx| lines[fn_idx].contains("async fn"))
}

fn enclosing_fn(lines: &[&str], current_idx: usize) -> Option<usize> {
    for i in (0..=current_idx).rev() {
        let line = lines[i].trim();
        if line.starts_with("fn ") || line.contains(" fn ") {
            return Some(i);
        }
        if line.starts_with("mod ") || (line.starts_with("impl") && line.contains('{')) {
            return None;
        }
    }
    None
}

fn has_test_marker(lines: &[&str], fn_idx: usize) -> bool {
    for i in (0..fn_idx).rev() {
        let line = lines[i].trim();
        if line.starts_with("#[test]") || line.starts_with("#[tokio::test") {
            return true;
        }
        if !line.starts_with("#[") && !line.starts_with("///") {
            return false;
        }
    }
    false
}

/// Scan every production line with `check`, skipping comments and test code
pub fn scan<F>(check: F) -> Vec<Violation>
where
    F: Fn(&[&str], usize, &str) -> Option<&'static str>,
{
    let mut violations = Vec::new();
    for (path, content) in production_sources() {
        let lines: Vec<&str> = content.lines().collect();
        for (idx, line) in lines.iter().enumerate() {
            if is_in_test_code(&lines, idx) {
                continue;
            }
            if let Some(kind) = check(&lines, idx, code_part(line)) {
                violations.push(Violation {
                    path: path.clone(),
                    line_number: idx + 1,
                    kind,
                    line: line.trim().to_string(),
                });
            }
        }
    }
    violations
}

/// Print violations and panic if there are any
pub fn report(title: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_sources_found() {
        let sources = production_sources();
        assert!(
            sources.iter().any(|(p, _)| p.ends_with("core/src/lib.rs")),
            "scanner must see the core crate"
        );
    }

    #[test]
    fn test_cfg_test_module_is_test_code() {
        let code = vec![
            "fn real() {",
            "    work();",
            "}",
            "#[cfg(test)]",
            "mod tests {",
            "    fn helper() { x.unwrap(); }",
            "}",
        ];
        assert!(!is_in_test_code(&code, 1));
        assert!(is_in_test_code(&code, 5));
    }

    #[test]
    fn test_test_attribute_marks_function() {
        let code = vec!["#[tokio::test]", "async fn it_works() {", "    x.unwrap();", "}"];
        assert!(is_in_test_code(&code, 2));
        assert!(is_in_async_function(&code, 2));
    }

    #[test]
    fn test_code_part_strips_comments() {
        assert_eq!(code_part("let x = 1; // x.unwrap()"), "let x = 1; ");
    }
}
