//! Core configuration structures and loading logic

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading or writing the config file
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// TOML serialization error
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Operator settings that cannot be accepted, rejected before any state changes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No monitored directory selected")]
    MissingDirectory,

    #[error("No session name set")]
    MissingSessionName,

    #[error("Target directory {0:?} lies under the monitored directory; it would be rescanned forever")]
    TargetInsideMonitored(PathBuf),

    #[error("Monitored directory lies under the target directory {0:?}; it would be rescanned forever")]
    MonitoredInsideTarget(PathBuf),

    #[error("Delete is only available as the rejected frames action")]
    DeleteNotAllowedForApproved,

    #[error("File transfer requires an approved frames directory")]
    TransferWithoutApprovedDir,

    #[error("File transfer requires a remote URL")]
    TransferWithoutUrl,

    #[error("{field} must be between 0 and 23, got {value}")]
    HourOutOfRange { field: &'static str, value: u8 },
}

/// What happens to a frame once it has been classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrameAction {
    /// Leave the frame where it is
    #[default]
    None,
    /// Copy the frame into the target directory
    Copy,
    /// Move the frame into the target directory
    Move,
    /// Remove the frame (rejected frames only)
    Delete,
}

impl FrameAction {
    /// True for every action except `None`
    pub fn is_active(self) -> bool {
        self != FrameAction::None
    }
}

impl std::fmt::Display for FrameAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameAction::None => write!(f, "none"),
            FrameAction::Copy => write!(f, "copy"),
            FrameAction::Move => write!(f, "move"),
            FrameAction::Delete => write!(f, "delete"),
        }
    }
}

/// Unit of the FWHM limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScaleUnit {
    /// Measured FWHM is multiplied by `subframe_scale` before comparison
    #[default]
    Arcsec,
    /// Measured FWHM is compared as is
    Pixels,
}

/// A quality threshold. Zero disables the check.
///
/// Accepts a TOML number or a string; a string that is not a number
/// deserializes as disabled.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Limit(f64);

impl Limit {
    pub const DISABLED: Limit = Limit(0.0);

    pub fn new(value: f64) -> Self {
        if value.is_finite() {
            Limit(value)
        } else {
            Limit::DISABLED
        }
    }

    /// The limit value if the check is enabled
    pub fn active(self) -> Option<f64> {
        (self.0 > 0.0).then_some(self.0)
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0)
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawLimit {
            Number(f64),
            Text(String),
        }

        Ok(match RawLimit::deserialize(deserializer)? {
            RawLimit::Number(v) => Limit::new(v),
            RawLimit::Text(s) => s.trim().parse::<f64>().map(Limit::new).unwrap_or_default(),
        })
    }
}

/// Monitored directory and session settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    /// Root of the directory tree that is scanned for new frames
    #[serde(default)]
    pub directory_path: Option<PathBuf>,
    /// Session name; the registry is saved as `<directory_path>/<session_name>.json`
    #[serde(default)]
    pub session_name: Option<String>,
    /// Orchestrator tick interval in seconds (default 2)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    2
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            directory_path: None,
            session_name: None,
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl MonitorConfig {
    /// Path of the session file, if both directory and session name are set
    pub fn session_file(&self) -> Option<PathBuf> {
        match (&self.directory_path, &self.session_name) {
            (Some(dir), Some(name)) if !name.is_empty() => Some(dir.join(format!("{}.json", name))),
            _ => None,
        }
    }
}

/// Quality thresholds applied by the validity evaluator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdsConfig {
    #[serde(default)]
    pub fwhm_limit: Limit,
    #[serde(default)]
    pub eccentricity_limit: Limit,
    /// Minimum SNR (frames below it are rejected)
    #[serde(default)]
    pub snr_limit: Limit,
    #[serde(default)]
    pub psf_limit: Limit,
    /// Image scale in arcsec/pixel used to scale FWHM (default 1.0)
    #[serde(default = "default_subframe_scale")]
    pub subframe_scale: f64,
    #[serde(default)]
    pub scale_unit: ScaleUnit,
}

fn default_subframe_scale() -> f64 {
    1.0
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            fwhm_limit: Limit::DISABLED,
            eccentricity_limit: Limit::DISABLED,
            snr_limit: Limit::DISABLED,
            psf_limit: Limit::DISABLED,
            subframe_scale: default_subframe_scale(),
            scale_unit: ScaleUnit::default(),
        }
    }
}

/// Relocation of approved and rejected frames
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ActionsConfig {
    #[serde(default)]
    pub approved_action: FrameAction,
    #[serde(default)]
    pub approved_dir: Option<PathBuf>,
    #[serde(default)]
    pub rejected_action: FrameAction,
    #[serde(default)]
    pub rejected_dir: Option<PathBuf>,
}

impl ActionsConfig {
    /// True when at least one classification has an action configured
    pub fn any_active(&self) -> bool {
        self.approved_action.is_active() || self.rejected_action.is_active()
    }
}

/// Header keyword names for the descriptive frame fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeywordsConfig {
    pub gain: String,
    pub date_obs: String,
    pub exposure: String,
    pub temperature: String,
    pub binning_x: String,
    pub binning_y: String,
    pub frame_kind: String,
    pub filter: String,
    pub azimuth: String,
    pub altitude: String,
    pub object: String,
    pub weight: String,
}

impl Default for KeywordsConfig {
    fn default() -> Self {
        Self {
            gain: "GAIN".to_string(),
            date_obs: "DATE-OBS".to_string(),
            exposure: "EXPTIME".to_string(),
            temperature: "CCD-TEMP".to_string(),
            binning_x: "XBINNING".to_string(),
            binning_y: "YBINNING".to_string(),
            frame_kind: "IMAGETYP".to_string(),
            filter: "FILTER".to_string(),
            azimuth: "OBJCTAZ".to_string(),
            altitude: "OBJCTALT".to_string(),
            object: "OBJECT".to_string(),
            weight: "SSWEIGHT".to_string(),
        }
    }
}

/// External measurement program
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MeasurementConfig {
    /// Program invoked once per unmeasured frame; the frame path is appended to `args`
    #[serde(default)]
    pub program: Option<String>,
    /// Fixed processing arguments
    #[serde(default)]
    pub args: Vec<String>,
}

/// Remote upload endpoint and daily window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub use_tls: bool,
    /// First hour of the upload window (0 = unbounded)
    #[serde(default)]
    pub start_hour: u8,
    /// Hour at which uploads stop (0 = unbounded)
    #[serde(default)]
    pub stop_hour: u8,
    /// Connection handshake timeout in seconds (default 10)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: String::new(),
            password: String::new(),
            use_tls: false,
            start_hour: 0,
            stop_hour: 0,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Independent on/off toggles for the three pipeline features
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FeaturesConfig {
    #[serde(default)]
    pub scanning: bool,
    #[serde(default)]
    pub file_actions: bool,
    #[serde(default)]
    pub transfer: bool,
}

/// Status HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusConfig {
    #[serde(default = "default_status_enabled")]
    pub enabled: bool,
    #[serde(default = "default_status_bind")]
    pub bind: String,
}

fn default_status_enabled() -> bool {
    true
}

fn default_status_bind() -> String {
    "127.0.0.1:7979".to_string()
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: default_status_enabled(),
            bind: default_status_bind(),
        }
    }
}

/// Operator weighting formula
///
/// Evaluated per frame over `FWHM`, `Eccentricity`, `SNR`, `PSF` and the
/// session `...Min` / `...Max` of each. The result is written under the
/// `keywords.weight` keyword.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WeightingConfig {
    #[serde(default)]
    pub formula: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub keywords: KeywordsConfig,
    #[serde(default)]
    pub measurement: MeasurementConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub weighting: WeightingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - MONITOR_DIRECTORY -> monitor.directory_path
    /// - MONITOR_SESSION -> monitor.session_name
    /// - TRANSFER_URL -> transfer.url
    /// - TRANSFER_USERNAME -> transfer.username
    /// - TRANSFER_PASSWORD -> transfer.password
    /// - TRANSFER_START_HOUR -> transfer.start_hour
    /// - TRANSFER_STOP_HOUR -> transfer.stop_hour
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("MONITOR_DIRECTORY") {
            if !val.is_empty() {
                self.monitor.directory_path = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = env::var("MONITOR_SESSION") {
            if !val.is_empty() {
                self.monitor.session_name = Some(val);
            }
        }

        if let Ok(val) = env::var("TRANSFER_URL") {
            if !val.is_empty() {
                self.transfer.url = Some(val);
            }
        }

        if let Ok(val) = env::var("TRANSFER_USERNAME") {
            self.transfer.username = val;
        }

        if let Ok(val) = env::var("TRANSFER_PASSWORD") {
            self.transfer.password = val;
        }

        if let Ok(val) = env::var("TRANSFER_START_HOUR") {
            if let Ok(hour) = val.parse::<u8>() {
                self.transfer.start_hour = hour;
            }
        }

        if let Ok(val) = env::var("TRANSFER_STOP_HOUR") {
            if let Ok(hour) = val.parse::<u8>() {
                self.transfer.stop_hour = hour;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is missing or malformed
    ///
    /// The error that caused the fallback is handed back so the caller can log it.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<ConfigError>) {
        match Self::load(path) {
            Ok(config) => (config, None),
            Err(e) => {
                let mut config = Config::default();
                config.apply_env_overrides();
                (config, Some(e))
            }
        }
    }

    /// Write the configuration as TOML, creating the parent directory if needed
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check operator settings before they are put to use
    ///
    /// Checks run in this order:
    /// 1. Upload window hours are within 0-23
    /// 2. Delete is not configured for approved frames
    /// 3. Target directories and the monitored directory are not nested
    /// 4. Scanning has a monitored directory and a session name
    /// 5. Transfer has an approved directory and a URL
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("start_hour", self.transfer.start_hour),
            ("stop_hour", self.transfer.stop_hour),
        ] {
            if value > 23 {
                return Err(ValidationError::HourOutOfRange { field, value });
            }
        }

        if self.actions.approved_action == FrameAction::Delete {
            return Err(ValidationError::DeleteNotAllowedForApproved);
        }

        if let Some(monitored) = &self.monitor.directory_path {
            let targets = [&self.actions.approved_dir, &self.actions.rejected_dir];
            for target in targets.into_iter().flatten() {
                if target.starts_with(monitored) {
                    return Err(ValidationError::TargetInsideMonitored(target.clone()));
                }
                if monitored.starts_with(target) {
                    return Err(ValidationError::MonitoredInsideTarget(target.clone()));
                }
            }
        }

        if self.features.scanning {
            if self.monitor.directory_path.is_none() {
                return Err(ValidationError::MissingDirectory);
            }
            if self.monitor.session_name.as_deref().map_or(true, str::is_empty) {
                return Err(ValidationError::MissingSessionName);
            }
        }

        if self.features.transfer {
            if self.actions.approved_dir.is_none() {
                return Err(ValidationError::TransferWithoutApprovedDir);
            }
            if self.transfer.url.as_deref().map_or(true, str::is_empty) {
                return Err(ValidationError::TransferWithoutUrl);
            }
        }

        Ok(())
    }
}
