//! Orchestrator loop for the subframe monitor
//!
//! Owns the configuration, the frame registry and every collaborator, and
//! drives scan, file action and upload passes from a periodic tick.

use crate::actions::{ActionReport, FileActionEngine};
use crate::codec::FrameCodec;
use crate::config::{Config, ConfigError, FeaturesConfig, ValidationError};
use crate::frame::Frame;
use crate::guard::PassGuard;
use crate::measure::{CommandMeasurement, MeasurementAdapter};
use crate::registry::{Registry, RegistryError};
use crate::scan::frame_files;
use crate::status::{new_shared_status, SharedStatus, StatusSnapshot};
use crate::status_server::{run_status_server, ServerError};
use crate::summary::{format_hour, SessionSummary};
use crate::transport::{HttpTransport, Transport, TransportError};
use crate::upload::{UploadOutcome, UploadScheduler};
use crate::watcher::{drain_rescan_requests, DirectoryWatcher, MonitorEvent, WatchError};
use crate::weighting::{apply_weighting, write_weights, WeightReport, WeightingFormula};
use chrono::Timelike;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Debounce applied to filesystem notifications before a rescan is requested.
const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Operator settings rejected before use
    #[error("Invalid settings: {0}")]
    Validation(#[from] ValidationError),

    /// Session persistence error
    #[error("Session error: {0}")]
    Registry(#[from] RegistryError),

    /// Transport setup error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Directory watcher error
    #[error("Watcher error: {0}")]
    Watch(#[from] WatchError),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// What a single tick did. `None` means the pass did not run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Number of newly discovered frames.
    pub scanned: Option<usize>,
    pub actions: Option<ActionReport>,
    pub upload: Option<UploadOutcome>,
}

/// Daemon state containing all runtime components
pub struct Daemon {
    config: Config,
    /// Where the configuration is saved on shutdown
    config_path: Option<PathBuf>,
    registry: Registry,
    adapter: MeasurementAdapter,
    transport: Option<Arc<dyn Transport>>,
    transport_connected: bool,
    scan_guard: PassGuard,
    action_guard: PassGuard,
    status: SharedStatus,
    events_tx: mpsc::UnboundedSender<MonitorEvent>,
    events_rx: mpsc::UnboundedReceiver<MonitorEvent>,
    /// A rescan is due on the next tick
    dirty: bool,
}

impl Daemon {
    /// Initialize the daemon with explicit collaborators
    ///
    /// The session registry is loaded from `<directory_path>/<session_name>.json`
    /// when both are configured; a missing or malformed file starts empty.
    pub fn new(
        config: Config,
        adapter: MeasurementAdapter,
        transport: Option<Arc<dyn Transport>>,
    ) -> Self {
        let registry = load_registry(&config);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            config,
            config_path: None,
            registry,
            adapter,
            transport,
            transport_connected: false,
            scan_guard: PassGuard::new("scan"),
            action_guard: PassGuard::new("file_actions"),
            status: new_shared_status(),
            events_tx,
            events_rx,
            dirty: true,
        }
    }

    /// Initialize the daemon with the production collaborators
    ///
    /// This performs the startup sequence:
    /// 1. Validate operator settings
    /// 2. Build the frame codec and the external measurement command
    /// 3. Build the HTTP transport when a transfer URL is configured
    /// 4. Load the session registry
    pub fn from_config(config: Config, config_path: Option<PathBuf>) -> Result<Self, DaemonError> {
        config.validate()?;

        let adapter = MeasurementAdapter::new(
            Arc::new(FrameCodec),
            Arc::new(CommandMeasurement::from_config(&config.measurement)),
        );

        let transport: Option<Arc<dyn Transport>> = match HttpTransport::from_config(&config.transfer) {
            Ok(t) => Some(Arc::new(t)),
            Err(TransportError::NotConfigured) => None,
            Err(e) => return Err(e.into()),
        };

        let mut daemon = Self::new(config, adapter, transport);
        daemon.config_path = config_path;
        Ok(daemon)
    }

    /// Load config from file (falling back to defaults) and build the daemon
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        let path = config_path.as_ref();
        let (config, err) = Config::load_or_default(path);
        if let Some(e) = err {
            warn!(path = %path.display(), error = %e, "Using default configuration");
        }
        Self::from_config(config, Some(path.to_path_buf()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get the shared status
    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    /// Guard held for the duration of each scan pass
    pub fn scan_guard(&self) -> PassGuard {
        self.scan_guard.clone()
    }

    /// Guard held for the duration of each file action pass
    pub fn action_guard(&self) -> PassGuard {
        self.action_guard.clone()
    }

    /// Sender for change notifications from outside the loop
    pub fn event_sender(&self) -> mpsc::UnboundedSender<MonitorEvent> {
        self.events_tx.clone()
    }

    /// Ask for a scan on the next tick
    pub fn request_rescan(&self) {
        let _ = self.events_tx.send(MonitorEvent::RescanRequested);
    }

    /// Switch features on or off; takes effect from the next tick
    ///
    /// The new combination is validated first and rejected without any
    /// state change if its preconditions do not hold.
    pub fn set_features(&mut self, features: FeaturesConfig) -> Result<(), ValidationError> {
        let mut candidate = self.config.clone();
        candidate.features = features;
        candidate.validate()?;

        if features.transfer && !self.config.features.transfer {
            self.transport_connected = false;
        }
        if features.scanning && !self.config.features.scanning {
            self.dirty = true;
        }
        info!(
            scanning = features.scanning,
            file_actions = features.file_actions,
            transfer = features.transfer,
            "Features updated"
        );
        self.config.features = features;
        Ok(())
    }

    /// Replace the configuration after validating it
    ///
    /// Changing the monitored directory or session name reloads the registry
    /// for the new session.
    pub fn update_config(&mut self, config: Config) -> Result<(), ValidationError> {
        config.validate()?;

        let session_changed = config.monitor.directory_path != self.config.monitor.directory_path
            || config.monitor.session_name != self.config.monitor.session_name;
        let transfer_changed = config.transfer != self.config.transfer;

        self.config = config;
        if session_changed {
            self.registry = load_registry(&self.config);
            self.dirty = true;
        }
        if transfer_changed {
            self.transport = match HttpTransport::from_config(&self.config.transfer) {
                Ok(t) => Some(Arc::new(t)),
                Err(e) => {
                    debug!(error = %e, "No transport configured");
                    None
                }
            };
            self.transport_connected = false;
        }
        Ok(())
    }

    /// Load an explicitly chosen session file and monitor its directory
    pub fn load_session_file(&mut self, path: &Path) -> Result<(), DaemonError> {
        let (registry, dir, name) = Registry::load_session_file(path)?;

        let mut candidate = self.config.clone();
        candidate.monitor.directory_path = Some(dir);
        candidate.monitor.session_name = Some(name);
        candidate.validate()?;

        info!(path = %path.display(), frames = registry.len(), "Session loaded");
        self.config = candidate;
        self.registry = registry;
        self.dirty = true;
        Ok(())
    }

    /// Start a new, empty session in the monitored directory
    pub fn new_session(&mut self, name: &str) -> Result<(), DaemonError> {
        let mut candidate = self.config.clone();
        candidate.monitor.session_name = Some(name.to_string());
        candidate.features.scanning = true;
        candidate.validate()?;

        let dir = candidate
            .monitor
            .directory_path
            .clone()
            .ok_or(ValidationError::MissingDirectory)?;
        self.registry = Registry::new_session(&dir, name)?;
        self.config.monitor.session_name = Some(name.to_string());
        self.dirty = true;
        info!(session = name, dir = %dir.display(), "New session started");
        Ok(())
    }

    /// Run one tick: scan (if requested), file actions, upload, in that order
    pub async fn tick(&mut self, hour: u32) -> TickReport {
        if drain_rescan_requests(&mut self.events_rx) {
            self.dirty = true;
        }

        let mut report = TickReport::default();

        if self.config.features.scanning && self.dirty {
            self.dirty = false;
            report.scanned = self.scan_pass().await;
        }

        if self.config.features.file_actions {
            report.actions = self.action_pass().await;
        }

        if self.config.features.transfer {
            report.upload = self.upload_pass(hour).await;
        }

        report
    }

    /// Discover and measure new frames
    ///
    /// Returns the number of new frames, or None if the pass was skipped
    /// because a previous one is still running or no session is configured.
    pub async fn scan_pass(&mut self) -> Option<usize> {
        let Some(_permit) = self.scan_guard.try_enter() else {
            debug!("Scan pass already running, skipping");
            return None;
        };

        let (Some(root), Some(_)) = (
            self.config.monitor.directory_path.clone(),
            self.config.monitor.session_name.as_ref(),
        ) else {
            debug!("No monitored directory or session, skipping scan");
            return None;
        };

        let mut discovered = 0;
        for candidate in frame_files(&root) {
            if self.registry.contains(&candidate.name) {
                continue;
            }

            let mut frame = Frame::discovered(
                candidate.name,
                candidate.directory,
                candidate.size_bytes,
                candidate.modified,
            );
            info!(name = %frame.name, "Frame discovered");
            self.adapter.measure(&mut frame, &self.config.keywords);
            self.registry.insert(frame);
            discovered += 1;
            self.persist();
        }

        if discovered > 0 {
            info!(discovered, total = self.registry.len(), "Scan finished");
            self.refresh_status().await;
        }
        Some(discovered)
    }

    /// Relocate parsed frames
    ///
    /// Returns None if the pass was skipped (busy, empty registry, or no
    /// monitored directory).
    pub async fn action_pass(&mut self) -> Option<ActionReport> {
        let Some(_permit) = self.action_guard.try_enter() else {
            debug!("File action pass already running, skipping");
            return None;
        };
        if self.registry.is_empty() {
            return None;
        }
        let engine = FileActionEngine::from_config(&self.config)?;

        let before = self.registry.statuses();
        let report = engine.apply(self.registry.frames_mut());

        if self.registry.statuses() != before {
            self.persist();
            self.refresh_status().await;
        }
        Some(report)
    }

    /// Upload at most one approved frame
    pub async fn upload_pass(&mut self, hour: u32) -> Option<UploadOutcome> {
        let transport = self.transport.clone()?;
        let scheduler = UploadScheduler::from_config(&self.config)?;

        if !scheduler.window().is_open(hour) {
            return Some(UploadOutcome::OutsideWindow);
        }

        if !self.transport_connected {
            match transport.connect().await {
                Ok(()) => self.transport_connected = true,
                Err(e) => {
                    warn!(error = %e, "Failed to connect to transfer endpoint");
                    return None;
                }
            }
        }

        let outcome = scheduler
            .tick(self.registry.frames_mut(), hour, transport.as_ref())
            .await;

        if outcome.changed_status() {
            self.persist();
            self.refresh_status().await;
        }
        Some(outcome)
    }

    /// Weigh every frame of the session and write the weights into the files
    ///
    /// Returns what the computation did and what the write-back did.
    pub async fn weigh_frames(&mut self, formula: &WeightingFormula) -> (WeightReport, WeightReport) {
        let computed = apply_weighting(self.registry.frames_mut(), formula);
        let written = write_weights(
            self.registry.frames(),
            self.adapter.codec().as_ref(),
            &self.config.keywords.weight,
        );
        info!(written = written.applied, skipped = written.skipped, "Weights written");

        if computed.applied > 0 {
            self.persist();
            self.refresh_status().await;
        }
        (computed, written)
    }

    /// Save the registry to the session file, logging failures
    fn persist(&self) {
        let (Some(dir), Some(name)) = (
            self.config.monitor.directory_path.as_deref(),
            self.config.monitor.session_name.as_deref(),
        ) else {
            return;
        };
        if let Err(e) = self.registry.save_session(dir, name) {
            warn!(error = %e, "Failed to save session");
        }
    }

    /// Rebuild the shared status snapshot from the registry
    pub async fn refresh_status(&self) {
        let snapshot = StatusSnapshot {
            timestamp_unix_ms: chrono::Utc::now().timestamp_millis(),
            session_name: self.config.monitor.session_name.clone(),
            directory_path: self
                .config
                .monitor
                .directory_path
                .as_ref()
                .map(|p| p.display().to_string()),
            features: self.config.features.into(),
            upload_window: (
                format_hour(self.config.transfer.start_hour),
                format_hour(self.config.transfer.stop_hour),
            ),
            summary: SessionSummary::from_frames(self.registry.frames(), &self.config.thresholds),
            frames: self.registry.frames().to_vec(),
        };
        *self.status.write().await = snapshot;
    }

    /// Start the status HTTP server
    ///
    /// Spawns the HTTP server as a background task when enabled.
    pub fn start_status_server(&self) -> Option<tokio::task::JoinHandle<()>> {
        if !self.config.status.enabled {
            return None;
        }
        let status = self.status.clone();
        let bind = self.config.status.bind.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_status_server(status, &bind).await {
                warn!(error = %e, "Status server stopped");
            }
        }))
    }

    fn start_watcher(&self) -> Option<DirectoryWatcher> {
        let dir = self.config.monitor.directory_path.as_deref()?;
        match DirectoryWatcher::start(dir, WATCH_DEBOUNCE, self.events_tx.clone()) {
            Ok(watcher) => {
                info!(dir = %dir.display(), "Watching directory");
                Some(watcher)
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to watch directory");
                None
            }
        }
    }

    /// Run the daemon until ctrl-c
    pub async fn run(&mut self) -> Result<(), DaemonError> {
        self.run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Run the main loop until `shutdown` completes, then save session and config
    pub async fn run_until<F: Future<Output = ()>>(&mut self, shutdown: F) -> Result<(), DaemonError> {
        let _server_handle = self.start_status_server();
        let mut watched_dir = self.config.monitor.directory_path.clone();
        let mut _watcher = self.start_watcher();
        self.refresh_status().await;

        let period = Duration::from_secs(self.config.monitor.poll_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.tick(current_hour()).await;
                    debug!(?report, "Tick finished");

                    if watched_dir != self.config.monitor.directory_path {
                        watched_dir = self.config.monitor.directory_path.clone();
                        _watcher = self.start_watcher();
                    }
                }
            }
        }

        self.shutdown()
    }

    /// Save the registry and the configuration
    pub fn shutdown(&self) -> Result<(), DaemonError> {
        self.persist();
        if let Some(path) = &self.config_path {
            self.config.save(path)?;
            info!(path = %path.display(), "Configuration saved");
        }
        Ok(())
    }
}

fn load_registry(config: &Config) -> Registry {
    match (&config.monitor.directory_path, &config.monitor.session_name) {
        (Some(dir), Some(name)) if !name.is_empty() => Registry::load_session(dir, name),
        _ => Registry::new(),
    }
}

/// Local hour of day, 0-23
pub fn current_hour() -> u32 {
    chrono::Local::now().hour()
}
