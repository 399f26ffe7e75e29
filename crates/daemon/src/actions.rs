//! File action engine: relocates classified frames.
//!
//! Approved and rejected frames are copied or moved into their target root,
//! keeping their path relative to the monitored directory. Rejected frames
//! may instead be deleted. A class with no target directory is left alone.

use crate::config::{ActionsConfig, Config, FrameAction, ThresholdsConfig};
use crate::frame::{Frame, FrameStatus};
use crate::validity::is_valid;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while relocating a single frame.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Failed to create the target directory.
    #[error("Failed to create target directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to copy frame: {0}")]
    Copy(std::io::Error),

    #[error("Failed to move frame: {0}")]
    Move(std::io::Error),

    #[error("Failed to delete frame: {0}")]
    Delete(std::io::Error),

    /// The derived target is the directory the frame already lives in.
    #[error("Target directory is the frame's own directory: {0:?}")]
    SameDirectory(PathBuf),
}

/// Counts of what one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionReport {
    pub copied: usize,
    pub moved: usize,
    pub deleted: usize,
    pub failed: usize,
    /// Failures of frames that had already failed on an earlier pass.
    pub repeated: usize,
}

impl ActionReport {
    pub fn total(&self) -> usize {
        self.copied + self.moved + self.deleted + self.failed
    }
}

/// Derives the target directory by swapping the monitored root prefix for `target_root`.
///
/// A directory outside the monitored root maps to `target_root` itself.
pub fn target_directory(frame_dir: &Path, monitored_root: &Path, target_root: &Path) -> PathBuf {
    match frame_dir.strip_prefix(monitored_root) {
        Ok(relative) => target_root.join(relative),
        Err(_) => target_root.to_path_buf(),
    }
}

/// Moves a file, falling back to copy and remove when rename fails
/// (e.g. across filesystems).
pub fn move_file(source: &Path, target: &Path) -> std::io::Result<()> {
    if fs::rename(source, target).is_err() {
        fs::copy(source, target)?;
        fs::remove_file(source)?;
    }
    Ok(())
}

/// Applies one action to one frame's file, returning the new status and directory.
pub fn relocate(
    path: &Path,
    action: FrameAction,
    target_dir: &Path,
) -> Result<(FrameStatus, Option<PathBuf>), ActionError> {
    match action {
        FrameAction::None => Ok((FrameStatus::Parsed, path.parent().map(Path::to_path_buf))),
        FrameAction::Delete => {
            fs::remove_file(path).map_err(ActionError::Delete)?;
            Ok((FrameStatus::Deleted, None))
        }
        FrameAction::Copy | FrameAction::Move => {
            if path.parent() == Some(target_dir) {
                return Err(ActionError::SameDirectory(target_dir.to_path_buf()));
            }

            if !target_dir.is_dir() {
                fs::create_dir_all(target_dir).map_err(|source| ActionError::CreateDir {
                    path: target_dir.to_path_buf(),
                    source,
                })?;
            }

            let target = target_dir.join(path.file_name().unwrap_or_default());
            let status = if action == FrameAction::Move {
                move_file(path, &target).map_err(ActionError::Move)?;
                FrameStatus::Moved
            } else {
                fs::copy(path, &target).map_err(ActionError::Copy)?;
                FrameStatus::Copied
            };
            Ok((status, Some(target_dir.to_path_buf())))
        }
    }
}

/// Relocates parsed frames according to their classification.
pub struct FileActionEngine<'a> {
    monitored_root: &'a Path,
    actions: &'a ActionsConfig,
    thresholds: &'a ThresholdsConfig,
}

impl<'a> FileActionEngine<'a> {
    /// None when no monitored directory is configured.
    pub fn from_config(config: &'a Config) -> Option<Self> {
        Some(Self {
            monitored_root: config.monitor.directory_path.as_deref()?,
            actions: &config.actions,
            thresholds: &config.thresholds,
        })
    }

    /// Frames awaiting relocation: parsed, or failed on an earlier pass.
    pub fn is_eligible(&self, frame: &Frame) -> bool {
        self.actions.any_active()
            && matches!(frame.status, FrameStatus::Parsed | FrameStatus::Error)
    }

    /// The configured action and target root for a classification.
    fn plan(&self, valid: bool) -> Option<(FrameAction, &'a Path)> {
        let (action, root) = if valid {
            (self.actions.approved_action, self.actions.approved_dir.as_deref())
        } else {
            (self.actions.rejected_action, self.actions.rejected_dir.as_deref())
        };

        match action {
            FrameAction::None => None,
            FrameAction::Delete if valid => None,
            FrameAction::Delete | FrameAction::Copy | FrameAction::Move => root.map(|r| (action, r)),
        }
    }

    /// Indices of eligible frames in ascending observation time.
    ///
    /// Frames without a readable timestamp come first; ties keep registry order.
    pub fn pass_order(&self, frames: &[Frame]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..frames.len())
            .filter(|&i| self.is_eligible(&frames[i]))
            .collect();
        order.sort_by_key(|&i| frames[i].observed_at());
        order
    }

    /// Processes every eligible frame, oldest observation first.
    pub fn apply(&self, frames: &mut [Frame]) -> ActionReport {
        let mut report = ActionReport::default();

        for i in self.pass_order(frames) {
            let frame = &mut frames[i];
            let valid = is_valid(&frame.metrics, self.thresholds);
            let Some((action, root)) = self.plan(valid) else {
                continue;
            };
            let (Some(dir), Some(path)) = (frame.directory.clone(), frame.path()) else {
                continue;
            };

            let target_dir = target_directory(&dir, self.monitored_root, root);
            match relocate(&path, action, &target_dir) {
                Ok((status, directory)) => {
                    info!(
                        name = %frame.name,
                        valid,
                        %status,
                        target = %target_dir.display(),
                        "Frame relocated"
                    );
                    match status {
                        FrameStatus::Copied => report.copied += 1,
                        FrameStatus::Moved => report.moved += 1,
                        _ => report.deleted += 1,
                    }
                    frame.status = status;
                    frame.directory = directory;
                }
                Err(e) => {
                    if frame.status == FrameStatus::Error {
                        debug!(name = %frame.name, %action, error = %e, "Frame action failed again");
                        report.repeated += 1;
                    } else {
                        warn!(name = %frame.name, %action, error = %e, "Frame action failed");
                    }
                    report.failed += 1;
                    frame.status = FrameStatus::Error;
                }
            }
        }

        report
    }
}
