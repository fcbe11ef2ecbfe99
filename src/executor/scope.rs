//! Scope derivation for targeted test runs.

use std::collections::BTreeSet;
use std::path::Path;

use crate::process::validate_relative_path;

/// Scope name used for files at the repository root.
pub const ROOT_SCOPE: &str = ".";

/// Directories to test for a set of changed files.
///
/// Each target contributes its parent directory (`.` for root files) when
/// that directory exists in the workspace; the catch-all directory is added
/// when it exists. The result is de-duplicated and lexicographically sorted.
pub fn derive_scopes(root: &Path, targets: &[String], catch_all: &str) -> Vec<String> {
    let mut scopes = BTreeSet::new();

    for target in targets {
        if let Err(e) = validate_relative_path(target) {
            tracing::warn!(target = %target, error = %e, "Ignoring invalid target path");
            continue;
        }
        let parent = Path::new(target)
            .parent()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        let scope = if parent.is_empty() {
            ROOT_SCOPE.to_string()
        } else {
            parent
        };
        if root.join(&scope).is_dir() {
            scopes.insert(scope);
        }
    }

    let catch_all = catch_all.trim_matches('/');
    if !catch_all.is_empty() && root.join(catch_all).is_dir() {
        scopes.insert(catch_all.to_string());
    }

    scopes.into_iter().collect()
}

/// File-name-safe form of a scope.
pub fn sanitize_scope(scope: &str) -> String {
    if scope == ROOT_SCOPE {
        return "root".to_string();
    }
    scope
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Report file name for the scope at position `index`.
pub fn report_file_name(index: usize, scope: &str) -> String {
    format!("{:03}-{}.xml", index, sanitize_scope(scope))
}

/// Placeholder values for a targeted command template.
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
    pub scope: &'a str,
    pub report: &'a str,
    pub workspace: &'a str,
}

impl TemplateVars<'_> {
    /// Replaces `{scope}`, `{report}` and `{workspace}` in `template`.
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("{scope}", self.scope)
            .replace("{report}", self.report)
            .replace("{workspace}", self.workspace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        for d in ["pkg/parser", "pkg/lexer", "tests", "cmd"] {
            fs::create_dir_all(dir.path().join(d)).unwrap();
        }
        dir
    }

    fn targets(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_scopes_are_sorted_and_deduplicated() {
        let dir = repo();
        let scopes = derive_scopes(
            dir.path(),
            &targets(&["pkg/parser/a.go", "cmd/main.go", "pkg/parser/b.go", "pkg/lexer/l.go"]),
            "tests",
        );
        assert_eq!(scopes, vec!["cmd", "pkg/lexer", "pkg/parser", "tests"]);
    }

    #[test]
    fn test_root_files_and_missing_directories() {
        let dir = repo();
        let scopes = derive_scopes(
            dir.path(),
            &targets(&["main.go", "deleted/pkg/x.go", "../escape.go"]),
            "tests",
        );
        assert_eq!(scopes, vec![".", "tests"]);
    }

    #[test]
    fn test_catch_all_only_when_present() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        let scopes = derive_scopes(dir.path(), &targets(&["src/a.rs"]), "tests");
        assert_eq!(scopes, vec!["src"]);
    }

    #[test]
    fn test_report_names() {
        assert_eq!(report_file_name(0, "."), "000-root.xml");
        assert_eq!(report_file_name(12, "pkg/parser"), "012-pkg_parser.xml");
        assert_eq!(sanitize_scope("a b/c.d"), "a_b_c_d");
    }

    #[test]
    fn test_template_expansion() {
        let vars = TemplateVars {
            scope: "pkg/parser",
            report: "/ws/.grading_reports/001-pkg_parser.xml",
            workspace: "/ws",
        };
        assert_eq!(vars.expand("build/{scope}"), "build/pkg/parser");
        assert_eq!(
            vars.expand("--output-junit={report}"),
            "--output-junit=/ws/.grading_reports/001-pkg_parser.xml"
        );
        assert_eq!(vars.expand("{workspace}/build"), "/ws/build");
    }
}
