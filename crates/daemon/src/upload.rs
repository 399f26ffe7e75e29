//! Upload scheduler: sends at most one approved frame per tick, inside a
//! daily hour window.

use crate::config::{Config, TransferConfig};
use crate::frame::{Frame, FrameStatus};
use crate::transport::Transport;
use std::path::Path;
use tracing::{debug, info, warn};

/// Daily upload window.
///
/// Open when `hour >= start_hour - 1` and `hour < stop_hour`; a bound of 0
/// is unbounded on that side. The range does not wrap past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UploadWindow {
    pub start_hour: u8,
    pub stop_hour: u8,
}

impl UploadWindow {
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            start_hour: config.start_hour,
            stop_hour: config.stop_hour,
        }
    }

    pub fn is_open(&self, hour: u32) -> bool {
        let start = u32::from(self.start_hour);
        let stop = u32::from(self.stop_hour);
        (start == 0 || hour + 1 >= start) && (stop == 0 || hour < stop)
    }
}

/// Result of one scheduler tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    OutsideWindow,
    NothingEligible,
    /// The selected frame is no longer on disk.
    SourceMissing(String),
    Uploaded(String),
    Failed(String),
}

impl UploadOutcome {
    /// True when a frame's status changed.
    pub fn changed_status(&self) -> bool {
        matches!(self, UploadOutcome::Uploaded(_) | UploadOutcome::Failed(_))
    }
}

/// Picks and uploads the oldest approved frame.
pub struct UploadScheduler<'a> {
    approved_root: &'a Path,
    window: UploadWindow,
}

impl<'a> UploadScheduler<'a> {
    /// None when no approved directory is configured.
    pub fn from_config(config: &'a Config) -> Option<Self> {
        Some(Self {
            approved_root: config.actions.approved_dir.as_deref()?,
            window: UploadWindow::from_config(&config.transfer),
        })
    }

    pub fn window(&self) -> UploadWindow {
        self.window
    }

    /// Copied or moved, and living under the approved root.
    pub fn is_eligible(&self, frame: &Frame) -> bool {
        frame.status.is_relocated()
            && frame
                .directory
                .as_deref()
                .is_some_and(|dir| dir.starts_with(self.approved_root))
    }

    /// Index of the eligible frame with the oldest observation time.
    ///
    /// Frames without a readable timestamp count as oldest; among equals the
    /// one latest in registry order wins.
    pub fn select(&self, frames: &[Frame]) -> Option<usize> {
        frames
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, f)| self.is_eligible(f))
            .min_by_key(|(_, f)| f.observed_at())
            .map(|(i, _)| i)
    }

    /// Uploads at most one frame if the window is open at `hour`.
    pub async fn tick(&self, frames: &mut [Frame], hour: u32, transport: &dyn Transport) -> UploadOutcome {
        if !self.window.is_open(hour) {
            debug!(hour, window = ?self.window, "Outside upload window");
            return UploadOutcome::OutsideWindow;
        }

        let Some(index) = self.select(frames) else {
            return UploadOutcome::NothingEligible;
        };
        let frame = &mut frames[index];
        let Some(path) = frame.path().filter(|p| p.exists()) else {
            debug!(name = %frame.name, "Selected frame missing on disk, skipping");
            return UploadOutcome::SourceMissing(frame.name.clone());
        };

        frame.status = FrameStatus::Uploading;
        info!(name = %frame.name, "Uploading frame");

        let remote_path = format!("/{}", frame.name);
        let result = match tokio::fs::read(&path).await {
            Ok(bytes) => transport.upload(bytes, &remote_path).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(()) => {
                frame.status = FrameStatus::Uploaded;
                info!(name = %frame.name, "Frame uploaded");
                UploadOutcome::Uploaded(frame.name.clone())
            }
            Err(error) => {
                frame.status = FrameStatus::UploadError;
                warn!(name = %frame.name, %error, "Upload failed");
                UploadOutcome::Failed(frame.name.clone())
            }
        }
    }
}
