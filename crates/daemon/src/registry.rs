//! Frame registry and session persistence.
//!
//! The registry is the ordered collection of every frame known to the
//! current session. It is persisted as a pretty-printed JSON array at
//! `<directory>/<session>.json`.

use crate::frame::{Frame, FrameStatus};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while persisting or loading a session.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Session file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not a session file path: {0:?}")]
    InvalidSessionPath(PathBuf),
}

/// Ordered collection of frames, unique by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    frames: Vec<Frame>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a list, dropping later frames whose name repeats.
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        let mut registry = Self::new();
        for frame in frames {
            let name = frame.name.clone();
            if !registry.insert(frame) {
                warn!(name = %name, "Dropping duplicate frame from session");
            }
        }
        registry
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut [Frame] {
        &mut self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Whether a frame with this name is already known, wherever it lives now.
    pub fn contains(&self, name: &str) -> bool {
        self.frames.iter().any(|f| f.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Frame> {
        self.frames.iter().find(|f| f.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Frame> {
        self.frames.iter_mut().find(|f| f.name == name)
    }

    /// Appends a frame. Returns false, leaving the registry unchanged, if the
    /// name is already present.
    pub fn insert(&mut self, frame: Frame) -> bool {
        if self.contains(&frame.name) {
            return false;
        }
        self.frames.push(frame);
        true
    }

    /// Status of every frame, in registry order.
    pub fn statuses(&self) -> Vec<FrameStatus> {
        self.frames.iter().map(|f| f.status).collect()
    }

    pub fn to_json(&self) -> Result<String, RegistryError> {
        Ok(serde_json::to_string_pretty(&self.frames)?)
    }

    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let frames: Vec<Frame> = serde_json::from_str(json)?;
        Ok(Self::from_frames(frames))
    }

    /// Writes the registry to `<dir>/<name>.json`.
    pub fn save_session(&self, dir: &Path, name: &str) -> Result<PathBuf, RegistryError> {
        fs::create_dir_all(dir)?;
        let path = session_path(dir, name);
        fs::write(&path, self.to_json()?)?;
        debug!(path = %path.display(), frames = self.len(), "Session saved");
        Ok(path)
    }

    /// Reads `<dir>/<name>.json`, failing on I/O or parse errors.
    pub fn try_load_session(dir: &Path, name: &str) -> Result<Self, RegistryError> {
        let content = fs::read_to_string(session_path(dir, name))?;
        Self::from_json(&content)
    }

    /// Reads `<dir>/<name>.json`; a missing or malformed file yields an empty registry.
    pub fn load_session(dir: &Path, name: &str) -> Self {
        match Self::try_load_session(dir, name) {
            Ok(registry) => registry,
            Err(RegistryError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), session = name, "No session file, starting empty");
                Self::new()
            }
            Err(e) => {
                warn!(dir = %dir.display(), session = name, error = %e, "Failed to load session, starting empty");
                Self::new()
            }
        }
    }

    /// Loads an explicitly chosen session file.
    ///
    /// Returns the registry along with the session's directory (the file's
    /// parent) and name (the file stem), so the caller can retarget itself.
    pub fn load_session_file(path: &Path) -> Result<(Self, PathBuf, String), RegistryError> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RegistryError::InvalidSessionPath(path.to_path_buf()))?;
        let dir = path
            .parent()
            .ok_or_else(|| RegistryError::InvalidSessionPath(path.to_path_buf()))?;

        let content = fs::read_to_string(path)?;
        let registry = Self::from_json(&content)?;
        Ok((registry, dir.to_path_buf(), name.to_string()))
    }

    /// Starts an empty session and persists it immediately.
    pub fn new_session(dir: &Path, name: &str) -> Result<Self, RegistryError> {
        let registry = Self::new();
        registry.save_session(dir, name)?;
        Ok(registry)
    }
}

/// Location of the session file for a monitored directory.
pub fn session_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.json", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameInfo, FrameMetrics};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn status_strategy() -> impl Strategy<Value = FrameStatus> {
        proptest::sample::select(FrameStatus::ALL.to_vec())
    }

    /// Hundredths, so values survive the JSON round trip exactly.
    fn hundredths(range: std::ops::Range<i64>) -> impl Strategy<Value = Option<f64>> {
        proptest::option::of(range.prop_map(|v| v as f64 / 100.0))
    }

    fn info_strategy() -> impl Strategy<Value = FrameInfo> {
        (
            (
                proptest::option::of("20[0-9]{2}-0[1-9]-1[0-9]T2[0-3]:[0-5][0-9]:[0-5][0-9]"),
                hundredths(0..3_600_000),
                hundredths(-4_000..4_000),
                proptest::option::of(1u32..5),
                proptest::option::of(1u32..5),
                proptest::option::of("[A-Za-z]{1,6}"),
            ),
            (
                proptest::option::of("(Light|Dark|Flat|Bias) Frame"),
                proptest::option::of("[A-Z]{1,3} ?[0-9]{1,4}"),
                hundredths(0..36_000),
                hundredths(-9_000..9_000),
                hundredths(0..500_000),
                hundredths(0..10_000),
            ),
        )
            .prop_map(
                |(
                    (date_obs, exposure, temperature, binning_x, binning_y, filter),
                    (frame_kind, object, azimuth, altitude, gain, weight),
                )| FrameInfo {
                    date_obs,
                    exposure,
                    temperature,
                    binning_x,
                    binning_y,
                    filter,
                    frame_kind,
                    object,
                    azimuth,
                    altitude,
                    gain,
                    weight,
                },
            )
    }

    fn frame_strategy() -> impl Strategy<Value = Frame> {
        (
            "[a-z0-9_]{1,16}\\.(fit|fits|xisf)",
            proptest::option::of("/[a-z]{1,8}(/[a-z]{1,8}){0,2}"),
            0u64..10_000_000_000,
            0i64..4_000_000_000,
            status_strategy(),
            (0u32..2000, 0u32..100, 0u32..50_000, 0u32..100),
            info_strategy(),
        )
            .prop_map(
                |(name, dir, size, secs, status, (fwhm, ecc, snr, psf), info)| Frame {
                    name,
                    directory: dir.map(PathBuf::from),
                    size,
                    last_modified: Utc.timestamp_opt(secs, 0).unwrap(),
                    status,
                    metrics: FrameMetrics {
                        fwhm: fwhm as f64 / 100.0,
                        eccentricity: ecc as f64 / 100.0,
                        snr: snr as f64 / 100.0,
                        psf: psf as f64 / 100.0,
                    },
                    info,
                },
            )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_session_round_trip(frames in prop::collection::vec(frame_strategy(), 0..20)) {
            let registry = Registry::from_frames(frames);
            let temp_dir = TempDir::new().unwrap();

            registry.save_session(temp_dir.path(), "night").unwrap();
            let loaded = Registry::try_load_session(temp_dir.path(), "night").unwrap();

            prop_assert_eq!(loaded, registry);
        }

        #[test]
        fn prop_names_stay_unique(frames in prop::collection::vec(frame_strategy(), 0..30)) {
            let registry = Registry::from_frames(frames);
            let mut names: Vec<&str> = registry.frames().iter().map(|f| f.name.as_str()).collect();
            let total = names.len();
            names.sort_unstable();
            names.dedup();
            prop_assert_eq!(names.len(), total);
        }
    }

    fn sample_frame(name: &str) -> Frame {
        Frame::discovered(name, "/data", 100, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_insert_rejects_duplicate_name() {
        let mut registry = Registry::new();
        assert!(registry.insert(sample_frame("a.fits")));

        let mut moved = sample_frame("a.fits");
        moved.directory = Some(PathBuf::from("/elsewhere"));
        assert!(!registry.insert(moved));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a.fits").unwrap().directory, Some(PathBuf::from("/data")));
    }

    #[test]
    fn test_load_missing_session_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Registry::load_session(temp_dir.path(), "absent");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_load_malformed_session_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("bad.json"), "{ not json").unwrap();
        assert!(Registry::load_session(temp_dir.path(), "bad").is_empty());

        fs::write(
            temp_dir.path().join("status.json"),
            r#"[{"name":"a.fits","status":"archived"}]"#,
        )
        .unwrap();
        assert!(Registry::load_session(temp_dir.path(), "status").is_empty());
    }

    #[test]
    fn test_load_session_file_returns_dir_and_name() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = Registry::new();
        registry.insert(sample_frame("a.fits"));
        let path = registry.save_session(temp_dir.path(), "m42").unwrap();
        assert_eq!(path, temp_dir.path().join("m42.json"));

        let (loaded, dir, name) = Registry::load_session_file(&path).unwrap();
        assert_eq!(loaded, registry);
        assert_eq!(dir, temp_dir.path());
        assert_eq!(name, "m42");
    }

    #[test]
    fn test_new_session_writes_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Registry::new_session(temp_dir.path(), "fresh").unwrap();
        assert!(registry.is_empty());

        let content = fs::read_to_string(temp_dir.path().join("fresh.json")).unwrap();
        assert_eq!(content.trim(), "[]");
    }
}
