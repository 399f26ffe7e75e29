//! Status snapshot shared between the orchestrator and the status endpoint.

use crate::config::FeaturesConfig;
use crate::frame::Frame;
use crate::summary::SessionSummary;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Feature toggles as reported to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub scanning: bool,
    pub file_actions: bool,
    pub transfer: bool,
}

impl From<FeaturesConfig> for FeatureFlags {
    fn from(f: FeaturesConfig) -> Self {
        Self {
            scanning: f.scanning,
            file_actions: f.file_actions,
            transfer: f.transfer,
        }
    }
}

/// Point-in-time view of the session, refreshed whenever the registry changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp_unix_ms: i64,
    pub session_name: Option<String>,
    pub directory_path: Option<String>,
    pub features: FeatureFlags,
    /// Human-readable upload window bounds.
    pub upload_window: (String, String),
    pub summary: SessionSummary,
    pub frames: Vec<Frame>,
}

/// Shared status state for concurrent access across daemon components
pub type SharedStatus = Arc<RwLock<StatusSnapshot>>;

/// Creates a new SharedStatus instance with default values
pub fn new_shared_status() -> SharedStatus {
    Arc::new(RwLock::new(StatusSnapshot::default()))
}
