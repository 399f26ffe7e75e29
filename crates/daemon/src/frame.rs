//! Frame model: one monitored data file with its status and metrics.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle status of a frame.
///
/// `discovered -> parsed -> {copied | moved | deleted | error}`, then for
/// relocated frames under the approved root
/// `(copied | moved) -> uploading -> {uploaded | upload_error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    /// Found by the scanner, metrics not yet known.
    #[default]
    Discovered,
    /// Metrics known, classification pending.
    Parsed,
    Copied,
    Moved,
    Deleted,
    /// A relocation failed; retried on the next pass.
    Error,
    Uploading,
    Uploaded,
    UploadError,
}

impl FrameStatus {
    pub const ALL: [FrameStatus; 9] = [
        FrameStatus::Discovered,
        FrameStatus::Parsed,
        FrameStatus::Copied,
        FrameStatus::Moved,
        FrameStatus::Deleted,
        FrameStatus::Error,
        FrameStatus::Uploading,
        FrameStatus::Uploaded,
        FrameStatus::UploadError,
    ];

    /// True for statuses produced by a successful copy or move.
    pub fn is_relocated(self) -> bool {
        matches!(self, FrameStatus::Copied | FrameStatus::Moved)
    }
}

impl std::fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameStatus::Discovered => write!(f, "discovered"),
            FrameStatus::Parsed => write!(f, "parsed"),
            FrameStatus::Copied => write!(f, "copied"),
            FrameStatus::Moved => write!(f, "moved"),
            FrameStatus::Deleted => write!(f, "deleted"),
            FrameStatus::Error => write!(f, "error"),
            FrameStatus::Uploading => write!(f, "uploading"),
            FrameStatus::Uploaded => write!(f, "uploaded"),
            FrameStatus::UploadError => write!(f, "upload_error"),
        }
    }
}

/// The four quality metrics used for classification.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub fwhm: f64,
    pub eccentricity: f64,
    pub snr: f64,
    pub psf: f64,
}

/// Descriptive header fields carried along for display and ordering.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameInfo {
    /// Observation timestamp as written in the header.
    pub date_obs: Option<String>,
    pub exposure: Option<f64>,
    pub temperature: Option<f64>,
    pub binning_x: Option<u32>,
    pub binning_y: Option<u32>,
    pub filter: Option<String>,
    pub frame_kind: Option<String>,
    pub object: Option<String>,
    pub azimuth: Option<f64>,
    pub altitude: Option<f64>,
    pub gain: Option<f64>,
    pub weight: Option<f64>,
}

/// One discovered data file.
///
/// `name` is the identity key; `directory` changes as the file is relocated
/// and is `None` once the file has been deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub name: String,
    pub directory: Option<PathBuf>,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub status: FrameStatus,
    #[serde(flatten)]
    pub metrics: FrameMetrics,
    #[serde(flatten)]
    pub info: FrameInfo,
}

impl Frame {
    /// A freshly discovered frame with no metrics.
    pub fn discovered(
        name: impl Into<String>,
        directory: impl Into<PathBuf>,
        size: u64,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            directory: Some(directory.into()),
            size,
            last_modified,
            status: FrameStatus::Discovered,
            metrics: FrameMetrics::default(),
            info: FrameInfo::default(),
        }
    }

    /// Full path of the file, if it still has a directory.
    pub fn path(&self) -> Option<PathBuf> {
        self.directory.as_ref().map(|dir| dir.join(&self.name))
    }

    /// Parsed observation timestamp, used to order frames chronologically.
    pub fn observed_at(&self) -> Option<NaiveDateTime> {
        self.info.date_obs.as_deref().and_then(parse_date_obs)
    }
}

/// Parses a header timestamp in the forms cameras commonly write.
///
/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS[.fff]` (optionally with a space
/// separator) and a bare `YYYY-MM-DD`.
pub fn parse_date_obs(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
