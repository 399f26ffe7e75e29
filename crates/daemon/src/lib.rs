//! Subframe Monitor
//!
//! Background service that discovers astrophotography subframes, measures
//! their quality, relocates them by classification and uploads approved ones.

pub mod actions;
pub mod codec;
pub mod daemon;
pub mod frame;
pub mod guard;
pub mod measure;
pub mod registry;
pub mod scan;
pub mod status;
pub mod status_server;
pub mod summary;
pub mod transport;
pub mod upload;
pub mod validity;
pub mod watcher;
pub mod weighting;
pub mod xisf;

pub use subframe_monitor_config as config;
pub use subframe_monitor_config::Config;
pub use actions::{ActionError, ActionReport, FileActionEngine};
pub use codec::{CodecError, FitsCodec, FrameCodec, HeaderCard, HeaderData, MetadataCodec};
pub use daemon::{current_hour, Daemon, DaemonError, TickReport};
pub use frame::{Frame, FrameInfo, FrameMetrics, FrameStatus};
pub use guard::PassGuard;
pub use measure::{
    CommandMeasurement, MeasureError, MeasureOutcome, MeasurementAdapter, MeasurementRow,
    MeasurementService,
};
pub use registry::{session_path, Registry, RegistryError};
pub use scan::{frame_files, is_frame_file, scan_new_frames, ScanCandidate};
pub use status::{new_shared_status, FeatureFlags, SharedStatus, StatusSnapshot};
pub use status_server::{create_status_router, run_status_server, ServerError};
pub use summary::{format_exposure, format_hour, format_size, GroupSummary, SessionSummary};
pub use transport::{HttpTransport, Transport, TransportError};
pub use upload::{UploadOutcome, UploadScheduler, UploadWindow};
pub use validity::is_valid;
pub use watcher::{DirectoryWatcher, MonitorEvent, WatchError};
pub use weighting::{apply_weighting, write_weights, MetricRanges, WeightError, WeightReport, WeightingFormula};
pub use xisf::XisfCodec;
