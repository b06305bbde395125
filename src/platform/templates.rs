//! Path templates: per-OS artifact tables and environment-token expansion.
//!
//! A template is a path with environment tokens (`%NAME%`, `${NAME}`, `$NAME`,
//! a leading `~`) and glob segments (`*`, `**`, `?`). Resolution substitutes
//! the tokens only; glob segments are left for the scanner.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::core::config::{Config, PlatformTable, PlatformsConfig};
use crate::core::errors::{PswError, Result};
use crate::core::model::Category;
use crate::platform::os::Os;
use crate::scanner::glob;

// ──────────────────── built-in tables ────────────────────

fn windows_templates(category: Category) -> &'static [&'static str] {
    match category {
        Category::Browser => &[
            "%LOCALAPPDATA%/Google/Chrome/User Data/Default/History",
            "%APPDATA%/Mozilla/Firefox/Profiles/*.default-release/places.sqlite",
        ],
        Category::Thumbnails => &["%LOCALAPPDATA%/Microsoft/Windows/Explorer/thumbcache_*.db"],
        Category::Temp => &["%TEMP%/*", "C:/Windows/Temp/*"],
        Category::Recent => &["%APPDATA%/Microsoft/Windows/Recent/*"],
        Category::AppCache => &["%LOCALAPPDATA%/Packages/*/AC/INetCache/*"],
        Category::ImageMetadata => &["C:/Users/%USERNAME%/Pictures/**/*"],
    }
}

fn linux_templates(category: Category) -> &'static [&'static str] {
    match category {
        Category::Browser => &[
            "~/.config/google-chrome/Default/History",
            "~/.mozilla/firefox/*.default-release/places.sqlite",
        ],
        Category::Thumbnails => &["~/.cache/thumbnails/**/*"],
        Category::Temp => &["/tmp/*", "/var/tmp/*"],
        Category::Recent => &["~/.local/share/recently-used.xbel"],
        Category::AppCache => &["~/.cache/*"],
        Category::ImageMetadata => &["~/Pictures/**/*"],
    }
}

fn macos_templates(category: Category) -> &'static [&'static str] {
    match category {
        Category::Browser => &[
            "~/Library/Application Support/Google/Chrome/Default/History",
            "~/Library/Application Support/Firefox/Profiles/*.default/places.sqlite",
        ],
        Category::Thumbnails => &["~/Library/Caches/com.apple.QuickLook.thumbnailcache/*"],
        Category::Temp => &["/tmp/*", "~/Library/Caches/TemporaryItems/*"],
        Category::Recent => &["~/Library/RecentItems/*"],
        Category::AppCache => &["~/Library/Caches/*"],
        Category::ImageMetadata => &["~/Pictures/**/*"],
    }
}

/// Built-in template table for `os`.
#[must_use]
pub fn default_table(os: Os) -> PlatformTable {
    let lookup = match os {
        Os::Windows => windows_templates,
        Os::Linux => linux_templates,
        Os::MacOs => macos_templates,
    };
    Category::ALL
        .into_iter()
        .map(|c| {
            let templates = lookup(c).iter().map(|t| (*t).to_string()).collect();
            (c.key().to_string(), templates)
        })
        .collect()
}

// ──────────────────── expansion ────────────────────

/// Outcome of expanding one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expansion {
    Resolved(String),
    /// Named variable had no value.
    Missing(String),
}

/// Substitute environment tokens in `template` using `lookup`.
pub fn expand<F>(template: &str, lookup: &F) -> Expansion
where
    F: Fn(&str) -> Option<String> + ?Sized,
{
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;

    if let Some(after) = rest.strip_prefix('~')
        && (after.is_empty() || after.starts_with('/') || after.starts_with('\\'))
    {
        match lookup("HOME").or_else(|| lookup("USERPROFILE")) {
            Some(home) => out.push_str(home.trim_end_matches(['/', '\\'])),
            None => return Expansion::Missing("HOME".to_string()),
        }
        rest = after;
    }

    let chars: Vec<char> = rest.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '%' => {
                let close = chars[i + 1..].iter().position(|c| *c == '%');
                match close {
                    Some(len) if len > 0 && !chars[i + 1..i + 1 + len].contains(&'/') => {
                        let name: String = chars[i + 1..i + 1 + len].iter().collect();
                        match lookup(&name) {
                            Some(value) => out.push_str(&value),
                            None => return Expansion::Missing(name),
                        }
                        i += len + 2;
                    }
                    _ => {
                        out.push('%');
                        i += 1;
                    }
                }
            }
            '$' if chars.get(i + 1) == Some(&'{') => {
                let close = chars[i + 2..].iter().position(|c| *c == '}');
                match close {
                    Some(len) if len > 0 => {
                        let name: String = chars[i + 2..i + 2 + len].iter().collect();
                        match lookup(&name) {
                            Some(value) => out.push_str(&value),
                            None => return Expansion::Missing(name),
                        }
                        i += len + 3;
                    }
                    _ => {
                        out.push('$');
                        i += 1;
                    }
                }
            }
            '$' if chars
                .get(i + 1)
                .is_some_and(|c| c.is_ascii_alphabetic() || *c == '_') =>
            {
                let len = chars[i + 1..]
                    .iter()
                    .take_while(|c| c.is_ascii_alphanumeric() || **c == '_')
                    .count();
                let name: String = chars[i + 1..=i + len].iter().collect();
                match lookup(&name) {
                    Some(value) => out.push_str(&value),
                    None => return Expansion::Missing(name),
                }
                i += len + 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    Expansion::Resolved(out.replace('\\', "/"))
}

/// Reject templates that can never resolve to a usable pattern.
pub fn validate_template(template: &str) -> Result<()> {
    if template.trim().is_empty() {
        return Err(PswError::InvalidPattern {
            pattern: template.to_string(),
            details: "empty template".to_string(),
        });
    }
    if let Some(start) = template.find("${")
        && !template[start..].contains('}')
    {
        return Err(PswError::InvalidPattern {
            pattern: template.to_string(),
            details: "unterminated ${...} token".to_string(),
        });
    }
    glob::validate_pattern(template)
}

// ──────────────────── resolver ────────────────────

/// Template whose variable was unset in the lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedTemplate {
    pub template: String,
    pub variable: String,
}

/// Resolved patterns for one (OS, category), in table order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub patterns: Vec<String>,
    pub unresolved: Vec<UnresolvedTemplate>,
}

/// Expands per-OS template tables into concrete glob patterns.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    tables: PlatformsConfig,
}

impl PathResolver {
    #[must_use]
    pub const fn new(tables: PlatformsConfig) -> Self {
        Self { tables }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.platforms.clone())
    }

    /// Fails with `UnsupportedPlatform` when `os` has no registered table.
    pub fn table(&self, os: Os) -> Result<&PlatformTable> {
        let table = self.tables.table(os);
        if table.is_empty() {
            return Err(PswError::UnsupportedPlatform {
                details: format!("no artifact table registered for {}", os.key()),
            });
        }
        Ok(table)
    }

    /// Resolve the templates registered for (`os`, `category`).
    pub fn resolve<F>(&self, os: Os, category: Category, lookup: &F) -> Result<Resolution>
    where
        F: Fn(&str) -> Option<String> + ?Sized,
    {
        let table = self.table(os)?;
        let mut resolution = Resolution::default();
        let templates = table
            .iter()
            .filter(|(key, _)| key.parse::<Category>().is_ok_and(|c| c == category))
            .flat_map(|(_, templates)| templates.iter());
        for template in templates {
            match expand(template, lookup) {
                Expansion::Resolved(pattern) => {
                    if !resolution.patterns.contains(&pattern) {
                        resolution.patterns.push(pattern);
                    }
                }
                Expansion::Missing(variable) => resolution.unresolved.push(UnresolvedTemplate {
                    template: template.clone(),
                    variable,
                }),
            }
        }
        Ok(resolution)
    }

    /// Resolve every category in canonical order.
    pub fn resolve_all<F>(&self, os: Os, lookup: &F) -> Result<Vec<(Category, Resolution)>>
    where
        F: Fn(&str) -> Option<String> + ?Sized,
    {
        Category::ALL
            .into_iter()
            .map(|c| self.resolve(os, c, lookup).map(|r| (c, r)))
            .collect()
    }
}

/// Process-environment lookup, ignoring empty values.
pub fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn expands_windows_tokens() {
        let lookup = env(&[("LOCALAPPDATA", r"C:\Users\u\AppData\Local")]);
        assert_eq!(
            expand("%LOCALAPPDATA%/Google/History", &lookup),
            Expansion::Resolved("C:/Users/u/AppData/Local/Google/History".to_string())
        );
    }

    #[test]
    fn expands_tilde_and_dollar_forms() {
        let lookup = env(&[("HOME", "/home/u/"), ("XDG", "/x")]);
        assert_eq!(
            expand("~/.cache/*", &lookup),
            Expansion::Resolved("/home/u/.cache/*".to_string())
        );
        assert_eq!(
            expand("${XDG}/a/$XDG", &lookup),
            Expansion::Resolved("/x/a//x".to_string())
        );
    }

    #[test]
    fn tilde_inside_name_is_literal() {
        let lookup = env(&[]);
        assert_eq!(
            expand("/tmp/~lock", &lookup),
            Expansion::Resolved("/tmp/~lock".to_string())
        );
    }

    #[test]
    fn unset_variable_is_reported() {
        let lookup = env(&[]);
        assert_eq!(
            expand("%TEMP%/*", &lookup),
            Expansion::Missing("TEMP".to_string())
        );
    }

    #[test]
    fn lone_percent_is_literal() {
        let lookup = env(&[]);
        assert_eq!(
            expand("/tmp/100%/x", &lookup),
            Expansion::Resolved("/tmp/100%/x".to_string())
        );
    }

    #[test]
    fn resolve_linux_temp_in_table_order() {
        let resolver = PathResolver::default();
        let lookup = env(&[("HOME", "/home/u")]);
        let res = resolver.resolve(Os::Linux, Category::Temp, &lookup).unwrap();
        assert_eq!(res.patterns, vec!["/tmp/*".to_string(), "/var/tmp/*".to_string()]);
        assert!(res.unresolved.is_empty());
    }

    #[test]
    fn resolve_windows_with_missing_vars_keeps_literal_paths() {
        let resolver = PathResolver::default();
        let lookup = env(&[]);
        let res = resolver.resolve(Os::Windows, Category::Temp, &lookup).unwrap();
        assert_eq!(res.patterns, vec!["C:/Windows/Temp/*".to_string()]);
        assert_eq!(res.unresolved.len(), 1);
        assert_eq!(res.unresolved[0].variable, "TEMP");
    }

    #[test]
    fn resolution_is_deterministic() {
        let resolver = PathResolver::default();
        let lookup = env(&[("HOME", "/Users/u")]);
        let a = resolver.resolve_all(Os::MacOs, &lookup).unwrap();
        let b = resolver.resolve_all(Os::MacOs, &lookup).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), Category::ALL.len());
    }

    #[test]
    fn empty_table_is_unsupported() {
        let mut tables = PlatformsConfig::default();
        tables.macos.clear();
        let resolver = PathResolver::new(tables);
        let err = resolver
            .resolve(Os::MacOs, Category::Browser, &env(&[]))
            .unwrap_err();
        assert_eq!(err.code(), "PSW-1101");
    }

    #[test]
    fn default_tables_cover_every_category() {
        for os in Os::ALL {
            let table = default_table(os);
            for c in Category::ALL {
                assert!(!table[c.key()].is_empty(), "{os} {c}");
            }
            for templates in table.values() {
                for t in templates {
                    validate_template(t).unwrap();
                }
            }
        }
    }

    #[test]
    fn unterminated_brace_rejected() {
        assert!(validate_template("${HOME/x").is_err());
        assert!(validate_template("  ").is_err());
    }
}
