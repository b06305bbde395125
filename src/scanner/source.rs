//! Filesystem access seam for the scanner and cleanup executor.
//!
//! [`FsSource`] talks to the real filesystem. [`MemorySource`] is an
//! in-memory tree with failure injection for tests and dry runs.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::RwLock;

/// Kind of a filesystem entry as seen by `lstat` (links are not followed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Other,
}

/// Child returned by [`ArtifactSource::list_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// `lstat` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStat {
    pub kind: EntryKind,
    pub size: u64,
    pub modified: SystemTime,
}

/// Everything the engine needs from a filesystem.
pub trait ArtifactSource: Send + Sync {
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<SourceEntry>>;
    fn lstat(&self, path: &Path) -> io::Result<EntryStat>;
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;
    fn remove(&self, path: &Path) -> io::Result<()>;
}

// ──────────────────── real filesystem ────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct FsSource;

fn kind_of(ft: fs::FileType) -> EntryKind {
    if ft.is_symlink() {
        EntryKind::Symlink
    } else if ft.is_dir() {
        EntryKind::Dir
    } else if ft.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    }
}

impl ArtifactSource for FsSource {
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<SourceEntry>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(dir)? {
            let Ok(entry) = entry else {
                continue;
            };
            let Ok(ft) = entry.file_type() else {
                continue;
            };
            out.push(SourceEntry {
                path: entry.path(),
                kind: kind_of(ft),
            });
        }
        Ok(out)
    }

    fn lstat(&self, path: &Path) -> io::Result<EntryStat> {
        let meta = fs::symlink_metadata(path)?;
        Ok(EntryStat {
            kind: kind_of(meta.file_type()),
            size: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        })
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(path)?))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

// ──────────────────── in-memory tree ────────────────────

#[derive(Debug, Clone)]
enum MemNode {
    File { data: Vec<u8>, modified: SystemTime },
    Dir,
    Symlink,
}

/// In-memory filesystem. Parents are created implicitly.
#[derive(Debug, Default)]
pub struct MemorySource {
    nodes: RwLock<BTreeMap<PathBuf, MemNode>>,
    denied: RwLock<HashSet<PathBuf>>,
    undeletable: RwLock<HashSet<PathBuf>>,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_parents(nodes: &mut BTreeMap<PathBuf, MemNode>, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            nodes.entry(ancestor.to_path_buf()).or_insert(MemNode::Dir);
        }
    }

    /// Create or replace a file with the current time as mtime.
    pub fn add_file(&self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) {
        self.add_file_with_mtime(path, data, SystemTime::now());
    }

    pub fn add_file_with_mtime(
        &self,
        path: impl AsRef<Path>,
        data: impl Into<Vec<u8>>,
        modified: SystemTime,
    ) {
        let path = path.as_ref();
        let mut nodes = self.nodes.write();
        Self::ensure_parents(&mut nodes, path);
        nodes.insert(
            path.to_path_buf(),
            MemNode::File {
                data: data.into(),
                modified,
            },
        );
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut nodes = self.nodes.write();
        Self::ensure_parents(&mut nodes, path);
        nodes.insert(path.to_path_buf(), MemNode::Dir);
    }

    pub fn add_symlink(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut nodes = self.nodes.write();
        Self::ensure_parents(&mut nodes, path);
        nodes.insert(path.to_path_buf(), MemNode::Symlink);
    }

    /// Reads and listings of `path` fail with `PermissionDenied`.
    pub fn deny(&self, path: impl AsRef<Path>) {
        self.denied.write().insert(path.as_ref().to_path_buf());
    }

    /// `remove(path)` fails with `PermissionDenied`.
    pub fn forbid_remove(&self, path: impl AsRef<Path>) {
        self.undeletable.write().insert(path.as_ref().to_path_buf());
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.nodes.read().contains_key(path.as_ref())
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.nodes.read().get(path.as_ref()) {
            Some(MemNode::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    fn check_access(&self, path: &Path) -> io::Result<()> {
        if self.denied.read().contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("access denied: {}", path.display()),
            ));
        }
        Ok(())
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such entry: {}", path.display()),
    )
}

impl ArtifactSource for MemorySource {
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<SourceEntry>> {
        self.check_access(dir)?;
        let nodes = self.nodes.read();
        match nodes.get(dir) {
            Some(MemNode::Dir) => {}
            Some(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("not a directory: {}", dir.display()),
                ));
            }
            None => return Err(not_found(dir)),
        }
        Ok(nodes
            .range(dir.to_path_buf()..)
            .skip(1)
            .take_while(|(p, _)| p.starts_with(dir))
            .filter(|(p, _)| p.parent() == Some(dir))
            .map(|(p, node)| SourceEntry {
                path: p.clone(),
                kind: match node {
                    MemNode::File { .. } => EntryKind::File,
                    MemNode::Dir => EntryKind::Dir,
                    MemNode::Symlink => EntryKind::Symlink,
                },
            })
            .collect())
    }

    fn lstat(&self, path: &Path) -> io::Result<EntryStat> {
        let nodes = self.nodes.read();
        match nodes.get(path) {
            Some(MemNode::File { data, modified }) => Ok(EntryStat {
                kind: EntryKind::File,
                size: data.len() as u64,
                modified: *modified,
            }),
            Some(MemNode::Dir) => Ok(EntryStat {
                kind: EntryKind::Dir,
                size: 0,
                modified: SystemTime::UNIX_EPOCH,
            }),
            Some(MemNode::Symlink) => Ok(EntryStat {
                kind: EntryKind::Symlink,
                size: 0,
                modified: SystemTime::UNIX_EPOCH,
            }),
            None => Err(not_found(path)),
        }
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        self.check_access(path)?;
        match self.nodes.read().get(path) {
            Some(MemNode::File { data, .. }) => Ok(Box::new(Cursor::new(data.clone()))),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            )),
            None => Err(not_found(path)),
        }
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        if self.undeletable.read().contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("cannot remove: {}", path.display()),
            ));
        }
        let mut nodes = self.nodes.write();
        match nodes.get(path) {
            Some(MemNode::Dir) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("is a directory: {}", path.display()),
            )),
            Some(_) => {
                nodes.remove(path);
                Ok(())
            }
            None => Err(not_found(path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_lists_direct_children_only() {
        let src = MemorySource::new();
        src.add_file("/r/a.txt", b"a".to_vec());
        src.add_file("/r/sub/b.txt", b"bb".to_vec());
        src.add_symlink("/r/link");

        let mut names: Vec<_> = src
            .list_dir(Path::new("/r"))
            .unwrap()
            .into_iter()
            .map(|e| (e.path, e.kind))
            .collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            names,
            vec![
                (PathBuf::from("/r/a.txt"), EntryKind::File),
                (PathBuf::from("/r/link"), EntryKind::Symlink),
                (PathBuf::from("/r/sub"), EntryKind::Dir),
            ]
        );
    }

    #[test]
    fn memory_sibling_prefix_is_not_a_child() {
        let src = MemorySource::new();
        src.add_file("/r/a", b"1".to_vec());
        src.add_file("/r-other/b", b"2".to_vec());
        let children = src.list_dir(Path::new("/r")).unwrap();
        assert_eq!(children.len(), 1);
    }

    #[test]
    fn memory_denied_entries_fail_with_permission_denied() {
        let src = MemorySource::new();
        src.add_file("/r/secret", b"x".to_vec());
        src.deny("/r/secret");
        let err = src.open(Path::new("/r/secret")).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(src.lstat(Path::new("/r/secret")).is_ok());
    }

    #[test]
    fn memory_remove_and_read_back() {
        let src = MemorySource::new();
        src.add_file("/r/a", b"hello".to_vec());
        let mut buf = String::new();
        src.open(Path::new("/r/a"))
            .unwrap()
            .read_to_string(&mut buf)
            .unwrap();
        assert_eq!(buf, "hello");
        src.remove(Path::new("/r/a")).unwrap();
        assert!(!src.exists("/r/a"));
        assert_eq!(
            src.remove(Path::new("/r/a")).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn fs_source_reports_kinds() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("f"), b"data").unwrap();
        fs::create_dir(tmp.path().join("d")).unwrap();
        let src = FsSource;
        assert_eq!(src.lstat(&tmp.path().join("f")).unwrap().kind, EntryKind::File);
        assert_eq!(src.lstat(&tmp.path().join("f")).unwrap().size, 4);
        assert_eq!(src.lstat(&tmp.path().join("d")).unwrap().kind, EntryKind::Dir);
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(tmp.path().join("f"), tmp.path().join("l")).unwrap();
            assert_eq!(
                src.lstat(&tmp.path().join("l")).unwrap().kind,
                EntryKind::Symlink
            );
        }
    }
}
