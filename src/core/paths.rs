//! Shared path manipulation utilities.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Resolve a path to an absolute, normalized path.
///
/// If `fs::canonicalize` succeeds (path exists), it is used to resolve symlinks
/// and normalize components. Otherwise the path is made absolute relative to
/// CWD and `..`/`.` components are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

/// Lexically normalize a path without touching the filesystem.
pub fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

/// Current user's home directory.
///
/// `HOME` (or `USERPROFILE` on Windows) wins; on unix the password database is
/// consulted next. Falls back to the system temp dir with a warning.
pub fn home_dir() -> PathBuf {
    let from_env = env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    if let Some(home) = from_env {
        return home;
    }

    #[cfg(unix)]
    {
        if let Ok(Some(user)) = nix::unistd::User::from_uid(nix::unistd::getuid()) {
            return user.dir;
        }
    }

    let fallback = env::temp_dir();
    eprintln!(
        "[PSW-CONFIG] WARNING: home directory unknown, falling back to {}",
        fallback.display()
    );
    fallback
}

/// Default directory holding `config.toml`.
pub fn default_config_dir() -> PathBuf {
    home_dir().join(".config").join("psweep")
}

/// Default directory for backups, reports and logs.
pub fn default_data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("psweep")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_existing_path_canonically() {
        let cwd = env::current_dir().unwrap();
        let resolved = resolve_absolute_path(Path::new("."));
        assert_eq!(resolved, std::fs::canonicalize(&cwd).unwrap());
    }

    #[test]
    fn normalizes_nonexistent_path_syntactically() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("missing").join("foo").join("..").join("bar");
        assert!(std::fs::canonicalize(&input).is_err());

        let resolved = resolve_absolute_path(&input);
        assert!(resolved.ends_with("missing/bar"), "{}", resolved.display());
    }

    #[cfg(unix)]
    #[test]
    fn parent_at_root_is_dropped() {
        assert_eq!(normalize_syntactic(Path::new("/../foo")), Path::new("/foo"));
    }

    #[test]
    fn data_dir_lives_under_home() {
        let data = default_data_dir();
        assert!(data.starts_with(home_dir()));
        assert!(data.ends_with("psweep"));
    }
}
