//! Category assignment for walked paths.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use memchr::memmem;

use crate::core::errors::Result;
use crate::core::model::Category;
use crate::platform::templates::Resolution;
use crate::scanner::glob::GlobPattern;

/// Bytes read from the head of an image when probing for metadata blocks.
pub const METADATA_PROBE_BYTES: usize = 256 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "jpe", "jfif", "tif", "tiff", "png", "webp", "heic", "heif", "dng", "cr2",
    "nef", "arw",
];

const METADATA_MARKERS: &[&[u8]] = &[
    b"Exif\0\0",
    b"eXIf",
    b"http://ns.adobe.com/xap/1.0/",
    b"<x:xmpmeta",
];

#[derive(Debug, Clone)]
struct PatternEntry {
    category: Category,
    glob: GlobPattern,
}

/// Compiled patterns for every category plus excluded subtrees.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    entries: Vec<PatternEntry>,
    excluded: Vec<PathBuf>,
}

impl PatternSet {
    /// Compile resolved patterns, keeping canonical category order.
    pub fn compile(resolutions: &[(Category, Resolution)], excluded: &[PathBuf]) -> Result<Self> {
        let mut ordered: Vec<&(Category, Resolution)> = resolutions.iter().collect();
        ordered.sort_by_key(|(c, _)| c.precedence());
        let mut entries = Vec::new();
        for (category, resolution) in ordered {
            for pattern in &resolution.patterns {
                entries.push(PatternEntry {
                    category: *category,
                    glob: GlobPattern::new(pattern)?,
                });
            }
        }
        Ok(Self {
            entries,
            excluded: excluded.to_vec(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Minimal set of walk roots: nested roots are dropped.
    pub fn walk_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self
            .entries
            .iter()
            .map(|e| e.glob.root().to_path_buf())
            .filter(|r| !self.is_excluded(r))
            .collect();
        roots.sort();
        roots.dedup();
        let mut minimal: Vec<PathBuf> = Vec::with_capacity(roots.len());
        for root in roots {
            if !minimal.iter().any(|m| root.starts_with(m)) {
                minimal.push(root);
            }
        }
        minimal
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|ex| path.starts_with(ex))
    }

    /// First category (canonical order) whose pattern covers `path`.
    pub fn classify(&self, path: &Path) -> Option<Category> {
        if self.is_excluded(path) {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.glob.covers(path))
            .map(|e| e.category)
    }

    /// Some pattern can still match below `dir`.
    pub fn should_descend(&self, dir: &Path) -> bool {
        !self.is_excluded(dir) && self.entries.iter().any(|e| e.glob.should_descend(dir))
    }
}

/// Path carries a common photo/raw image extension.
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Header bytes contain an EXIF or XMP block.
pub fn has_embedded_metadata(head: &[u8]) -> bool {
    METADATA_MARKERS
        .iter()
        .any(|marker| memmem::find(head, marker).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolution(patterns: &[&str]) -> Resolution {
        Resolution {
            patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
            unresolved: Vec::new(),
        }
    }

    fn linux_like() -> PatternSet {
        PatternSet::compile(
            &[
                (Category::AppCache, resolution(&["/home/u/.cache/*"])),
                (
                    Category::Thumbnails,
                    resolution(&["/home/u/.cache/thumbnails/**/*"]),
                ),
                (Category::Temp, resolution(&["/tmp/*"])),
            ],
            &[PathBuf::from("/tmp/keep")],
        )
        .unwrap()
    }

    #[test]
    fn narrow_category_wins_over_broad() {
        let set = linux_like();
        assert_eq!(
            set.classify(Path::new("/home/u/.cache/thumbnails/large/a.png")),
            Some(Category::Thumbnails)
        );
        assert_eq!(
            set.classify(Path::new("/home/u/.cache/fontconfig/x")),
            Some(Category::AppCache)
        );
        assert_eq!(set.classify(Path::new("/home/u/notes.txt")), None);
    }

    #[test]
    fn walk_roots_drop_nested_roots() {
        let set = linux_like();
        assert_eq!(
            set.walk_roots(),
            vec![PathBuf::from("/home/u/.cache"), PathBuf::from("/tmp")]
        );
    }

    #[test]
    fn excluded_subtrees_are_not_classified() {
        let set = linux_like();
        assert_eq!(set.classify(Path::new("/tmp/keep/a")), None);
        assert!(!set.should_descend(Path::new("/tmp/keep")));
        assert_eq!(set.classify(Path::new("/tmp/other")), Some(Category::Temp));
    }

    #[test]
    fn image_metadata_markers_detected() {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1, 0x00, 0x10];
        jpeg.extend_from_slice(b"Exif\0\0MM");
        assert!(has_embedded_metadata(&jpeg));
        assert!(has_embedded_metadata(b"....<x:xmpmeta xmlns:x=..."));
        assert!(!has_embedded_metadata(&[0xFF, 0xD8, 0xFF, 0xDB, 0, 0]));
    }

    #[test]
    fn image_extension_is_case_insensitive() {
        assert!(has_image_extension(Path::new("/p/IMG_001.JPG")));
        assert!(has_image_extension(Path::new("/p/a.heic")));
        assert!(!has_image_extension(Path::new("/p/notes.txt")));
        assert!(!has_image_extension(Path::new("/p/jpg")));
    }
}
