//! Scanner module for discovering frame files under the monitored directory.
//!
//! The whole tree is walked depth-first on every invocation. De-duplication
//! is by file name against the registry, so a frame that has been relocated
//! elsewhere is still recognised as known.

use crate::registry::Registry;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Frame file extensions accepted by the scanner (case-insensitive matching).
pub const FRAME_EXTENSIONS: &[&str] = &[".fit", ".fits", ".xisf"];

/// A frame file found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCandidate {
    /// Full path to the file.
    pub path: PathBuf,
    /// File name, the registry identity key.
    pub name: String,
    /// Containing directory.
    pub directory: PathBuf,
    /// File size in bytes at discovery time.
    pub size_bytes: u64,
    /// Last modified time of the file.
    pub modified: DateTime<Utc>,
}

/// Checks if a file has a frame extension (case-insensitive).
pub fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            FRAME_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Lazily walks `root` and yields every frame file, depth-first in file name order.
///
/// A missing root yields nothing. Entries that cannot be read are skipped.
pub fn frame_files(root: &Path) -> impl Iterator<Item = ScanCandidate> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file() && is_frame_file(entry.path()))
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.file_name()?.to_str()?.to_string();
            let directory = path.parent()?.to_path_buf();
            let metadata = entry.metadata().ok()?;
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

            Some(ScanCandidate {
                path: path.to_path_buf(),
                name,
                directory,
                size_bytes: metadata.len(),
                modified: DateTime::<Utc>::from(modified),
            })
        })
}

/// Collects the frame files under `root` that the registry does not know yet.
///
/// Two files sharing a name in different subdirectories are reported once.
pub fn scan_new_frames(root: &Path, registry: &Registry) -> Vec<ScanCandidate> {
    let mut found: Vec<ScanCandidate> = Vec::new();
    for candidate in frame_files(root) {
        if registry.contains(&candidate.name) || found.iter().any(|c| c.name == candidate.name) {
            continue;
        }
        found.push(candidate);
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use proptest::prelude::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    #[test]
    fn test_frame_extensions_defined() {
        assert!(FRAME_EXTENSIONS.contains(&".fit"));
        assert!(FRAME_EXTENSIONS.contains(&".fits"));
        assert!(FRAME_EXTENSIONS.contains(&".xisf"));
        assert_eq!(FRAME_EXTENSIONS.len(), 3);
    }

    #[test]
    fn test_is_frame_file() {
        assert!(is_frame_file(Path::new("/data/light_001.fits")));
        assert!(is_frame_file(Path::new("/data/light_001.FIT"))); // case-insensitive
        assert!(is_frame_file(Path::new("/data/light_001.Xisf")));
        assert!(!is_frame_file(Path::new("/data/session.json")));
        assert!(!is_frame_file(Path::new("/data/preview.jpg")));
        assert!(!is_frame_file(Path::new("/data/fits"))); // no extension
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_extension_filter(
            stem in "[a-zA-Z0-9_]{1,20}",
            ext in prop_oneof![
                Just("fit"), Just("FITS"), Just("xisf"),
                Just("tif"), Just("raw"), Just("cr2"), Just("fits.bak"),
            ],
        ) {
            let path = PathBuf::from(format!("/data/{}.{}", stem, ext));
            let expected = matches!(ext.to_lowercase().as_str(), "fit" | "fits" | "xisf");
            prop_assert_eq!(is_frame_file(&path), expected);
        }
    }

    #[test]
    fn test_scan_recurses_and_filters() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::create_dir_all(root.join("Light/Green")).unwrap();
        fs::create_dir_all(root.join("Flat")).unwrap();
        File::create(root.join("Light/Green/g_001.fits")).unwrap();
        File::create(root.join("Flat/f_001.xisf")).unwrap();
        File::create(root.join("top.fit")).unwrap();
        File::create(root.join("notes.txt")).unwrap();
        File::create(root.join("night.json")).unwrap();

        let registry = Registry::new();
        let candidates = scan_new_frames(root, &registry);
        let mut names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();

        assert_eq!(names, vec!["f_001.xisf", "g_001.fits", "top.fit"]);

        let green = candidates.iter().find(|c| c.name == "g_001.fits").unwrap();
        assert_eq!(green.directory, root.join("Light/Green"));
        assert_eq!(green.path, root.join("Light/Green/g_001.fits"));
    }

    #[test]
    fn test_scan_skips_known_names() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        File::create(root.join("a.fits")).unwrap();
        File::create(root.join("b.fits")).unwrap();

        let mut registry = Registry::new();
        // Known under another directory: still known.
        registry.insert(Frame::discovered("a.fits", "/approved", 0, Utc::now()));

        let candidates = scan_new_frames(root, &registry);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "b.fits");
    }

    #[test]
    fn test_scan_reports_duplicate_names_once() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("x")).unwrap();
        fs::create_dir_all(root.join("y")).unwrap();
        File::create(root.join("x/same.fits")).unwrap();
        File::create(root.join("y/same.fits")).unwrap();

        let candidates = scan_new_frames(root, &Registry::new());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].directory, root.join("x"));
    }

    #[test]
    fn test_scan_empty_and_missing_roots() {
        let temp_dir = TempDir::new().unwrap();
        assert!(scan_new_frames(temp_dir.path(), &Registry::new()).is_empty());
        assert!(scan_new_frames(&temp_dir.path().join("missing"), &Registry::new()).is_empty());
    }

    #[test]
    fn test_scan_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        File::create(root.join("a.fits")).unwrap();
        File::create(root.join("b.fit")).unwrap();

        let mut registry = Registry::new();
        for c in scan_new_frames(root, &registry) {
            registry.insert(Frame::discovered(c.name, c.directory, c.size_bytes, c.modified));
        }
        let after_first = registry.clone();

        assert!(scan_new_frames(root, &registry).is_empty());
        assert_eq!(registry, after_first);
    }
}
