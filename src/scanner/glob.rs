//! Shell-style glob patterns over absolute paths.
//!
//! A pattern splits into a literal root (the leading components without glob
//! characters) and a glob remainder. The walker starts at the root; matching
//! is done on `/`-normalized path strings.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::core::errors::{PswError, Result};

/// One compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    raw: String,
    root: PathBuf,
    full: Regex,
    /// Per-component matchers for the remainder; unused when `has_globstar`.
    segments: Vec<Regex>,
    has_globstar: bool,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let normalized = normalize_pattern(pattern);
        let (root, remainder) = split_root(&normalized);
        let has_globstar = remainder.contains("**");
        let segments = if remainder.is_empty() || has_globstar {
            Vec::new()
        } else {
            remainder
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| glob_to_regex(s, pattern))
                .collect::<Result<Vec<_>>>()?
        };
        Ok(Self {
            raw: pattern.to_string(),
            root: PathBuf::from(root),
            full: glob_to_regex(&normalized, pattern)?,
            segments,
            has_globstar,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Literal directory (or file) the walk starts from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pattern names a single path with no glob remainder.
    pub fn is_literal(&self) -> bool {
        self.segments.is_empty() && !self.has_globstar
    }

    /// Exact match of `path` against the whole pattern.
    pub fn matches(&self, path: &Path) -> bool {
        self.full.is_match(&normalize_path(path))
    }

    /// `path` or one of its ancestors at or below the root matches.
    ///
    /// A matched directory contributes everything beneath it.
    pub fn covers(&self, path: &Path) -> bool {
        if !path.starts_with(&self.root) {
            return false;
        }
        path.ancestors()
            .take_while(|a| a.starts_with(&self.root))
            .any(|a| self.matches(a))
    }

    /// Walking into `dir` can still reach covered files.
    pub fn should_descend(&self, dir: &Path) -> bool {
        if self.root.starts_with(dir) {
            return true;
        }
        if !dir.starts_with(&self.root) {
            return false;
        }
        if self.has_globstar || self.covers(dir) {
            return true;
        }
        let Ok(rel) = dir.strip_prefix(&self.root) else {
            return false;
        };
        let rel: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        rel.len() < self.segments.len()
            && rel
                .iter()
                .zip(&self.segments)
                .all(|(component, segment)| segment.is_match(component))
    }
}

/// Validate that a glob pattern can be compiled.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    GlobPattern::new(pattern).map(|_| ())
}

fn normalize_pattern(pattern: &str) -> String {
    let normalized = pattern.trim().replace('\\', "/");
    if normalized.len() > 1 {
        normalized.trim_end_matches('/').to_string()
    } else {
        normalized
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Split at the last `/` before the first glob character.
fn split_root(pattern: &str) -> (String, String) {
    let Some(first_glob) = pattern.find(['*', '?']) else {
        return (pattern.to_string(), String::new());
    };
    match pattern[..first_glob].rfind('/') {
        Some(0) => ("/".to_string(), pattern[1..].to_string()),
        Some(slash) => (
            pattern[..slash].to_string(),
            pattern[slash + 1..].to_string(),
        ),
        None => (".".to_string(), pattern.to_string()),
    }
}

/// Convert a glob to an anchored regex.
///
/// - `**/` → zero or more whole components
/// - `**`  → anything, separators included
/// - `*`   → anything except `/`
/// - `?`   → one character except `/`
///
/// Every other regex metacharacter is literal.
fn glob_to_regex(glob: &str, original: &str) -> Result<Regex> {
    let mut regex_str = String::with_capacity(glob.len() * 2);
    regex_str.push('^');

    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    regex_str.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    regex_str.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                regex_str.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                regex_str.push_str("[^/]");
                i += 1;
            }
            '.' | '+' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '$' | '|' | '\\' => {
                regex_str.push('\\');
                regex_str.push(chars[i]);
                i += 1;
            }
            c => {
                regex_str.push(c);
                i += 1;
            }
        }
    }

    regex_str.push('$');

    Regex::new(&regex_str).map_err(|err| PswError::InvalidPattern {
        pattern: original.to_string(),
        details: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(p: &str) -> GlobPattern {
        GlobPattern::new(p).unwrap()
    }

    #[test]
    fn root_is_literal_prefix() {
        assert_eq!(glob("/tmp/*").root(), Path::new("/tmp"));
        assert_eq!(glob("/*").root(), Path::new("/"));
        assert_eq!(
            glob("/home/u/.mozilla/firefox/*.default-release/places.sqlite").root(),
            Path::new("/home/u/.mozilla/firefox")
        );
        let literal = glob("/home/u/.config/google-chrome/Default/History");
        assert!(literal.is_literal());
        assert_eq!(
            literal.root(),
            Path::new("/home/u/.config/google-chrome/Default/History")
        );
    }

    #[test]
    fn star_matches_within_component() {
        let g = glob("/tmp/cache-*");
        assert!(g.matches(Path::new("/tmp/cache-abc")));
        assert!(!g.matches(Path::new("/tmp/cache-abc/sub")));
        assert!(g.covers(Path::new("/tmp/cache-abc/sub")));
        assert!(!g.covers(Path::new("/tmp/other/file")));
    }

    #[test]
    fn double_star_matches_across_components() {
        let g = glob("/home/u/Pictures/**/*");
        assert!(g.matches(Path::new("/home/u/Pictures/a.jpg")));
        assert!(g.matches(Path::new("/home/u/Pictures/2024/trip/a.jpg")));
        assert!(!g.matches(Path::new("/home/u/Documents/a.jpg")));
    }

    #[test]
    fn question_mark_matches_single_char() {
        let g = glob("/tmp/build-?");
        assert!(g.matches(Path::new("/tmp/build-A")));
        assert!(!g.matches(Path::new("/tmp/build-AB")));
        assert!(!g.matches(Path::new("/tmp/build-")));
    }

    #[test]
    fn brackets_are_literal() {
        let g = glob("/tmp/[build]");
        assert!(g.matches(Path::new("/tmp/[build]")));
        assert!(!g.matches(Path::new("/tmp/b")));
    }

    #[test]
    fn windows_separators_are_normalized() {
        let g = glob(r"C:\Users\*\Recent");
        assert!(g.matches(Path::new("C:/Users/alice/Recent")));
        assert!(!g.matches(Path::new("C:/Users/alice/Other")));
    }

    #[test]
    fn descend_prunes_non_matching_branches() {
        let g = glob("/home/u/.mozilla/firefox/*.default-release/places.sqlite");
        assert!(g.should_descend(Path::new("/home/u")));
        assert!(g.should_descend(Path::new("/home/u/.mozilla/firefox")));
        assert!(g.should_descend(Path::new("/home/u/.mozilla/firefox/x.default-release")));
        assert!(!g.should_descend(Path::new("/home/u/.mozilla/firefox/x.other")));
        assert!(!g.should_descend(Path::new("/var")));
    }

    #[test]
    fn matched_directory_is_descended() {
        let g = glob("/tmp/*");
        assert!(g.should_descend(Path::new("/tmp/session-1")));
        assert!(g.should_descend(Path::new("/tmp/session-1/deep")));
    }
}
