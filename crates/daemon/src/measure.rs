//! Measurement adapter.
//!
//! Reuses quality metrics already embedded in a frame's header, and
//! otherwise runs the external measurement program once and writes the
//! results back into the file.

use crate::codec::{HeaderCard, HeaderData, MetadataCodec};
use crate::config::{KeywordsConfig, MeasurementConfig};
use crate::frame::{Frame, FrameInfo, FrameMetrics, FrameStatus};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const FWHM_KEYWORD: &str = "PFWHM";
pub const ECC_KEYWORD: &str = "PECC";
pub const SNR_KEYWORD: &str = "PSNR";
pub const PSF_KEYWORD: &str = "PPSF";

/// Column offsets in a measurement row.
pub const FWHM_COLUMN: usize = 5;
pub const ECCENTRICITY_COLUMN: usize = 6;
pub const PSF_COLUMN: usize = 7;
pub const SNR_COLUMN: usize = 9;

/// Errors that can occur when measuring a frame.
#[derive(Debug, Error)]
pub enum MeasureError {
    #[error("No measurement program configured")]
    NotConfigured,

    #[error("Failed to run measurement program: {0}")]
    Io(#[from] std::io::Error),

    #[error("Measurement program failed: {0}")]
    Failed(String),

    #[error("Measurement produced no output")]
    EmptyOutput,

    #[error("Measurement row has {found} columns, expected at least {expected}")]
    TooFewColumns { found: usize, expected: usize },

    #[error("Non-numeric measurement column: {0:?}")]
    NonNumeric(String),
}

/// One row of positional measurement columns.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRow {
    pub columns: Vec<f64>,
}

impl MeasurementRow {
    /// Parses a comma or whitespace separated row.
    pub fn parse(line: &str) -> Result<Self, MeasureError> {
        let columns = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<f64>()
                    .map_err(|_| MeasureError::NonNumeric(s.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Err(MeasureError::EmptyOutput);
        }
        if columns.len() <= SNR_COLUMN {
            return Err(MeasureError::TooFewColumns {
                found: columns.len(),
                expected: SNR_COLUMN + 1,
            });
        }
        Ok(Self { columns })
    }

    pub fn metrics(&self) -> FrameMetrics {
        let col = |i: usize| self.columns.get(i).copied().unwrap_or(0.0);
        FrameMetrics {
            fwhm: col(FWHM_COLUMN),
            eccentricity: col(ECCENTRICITY_COLUMN),
            snr: col(SNR_COLUMN),
            psf: col(PSF_COLUMN),
        }
    }
}

/// Derives quality metrics from a frame's content.
pub trait MeasurementService: Send + Sync {
    fn measure(&self, path: &Path) -> Result<MeasurementRow, MeasureError>;
}

/// Runs an external program as `<program> <args...> <path>` and reads the
/// last non-empty line of its stdout as the measurement row.
#[derive(Debug, Clone, Default)]
pub struct CommandMeasurement {
    pub program: Option<String>,
    pub args: Vec<String>,
}

impl CommandMeasurement {
    pub fn from_config(config: &MeasurementConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }
}

impl MeasurementService for CommandMeasurement {
    fn measure(&self, path: &Path) -> Result<MeasurementRow, MeasureError> {
        let program = self
            .program
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(MeasureError::NotConfigured)?;

        let output = Command::new(program).args(&self.args).arg(path).output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MeasureError::Failed(format!(
                "exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or(MeasureError::EmptyOutput)?;
        MeasurementRow::parse(line)
    }
}

/// How a frame's metrics were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureOutcome {
    /// Metrics were already embedded in the header.
    AlreadyParsed,
    /// The measurement service ran and succeeded.
    Measured,
    /// The measurement service failed; metrics are zero.
    Failed,
}

/// Fills in a frame's metrics and descriptive fields.
#[derive(Clone)]
pub struct MeasurementAdapter {
    codec: Arc<dyn MetadataCodec>,
    service: Arc<dyn MeasurementService>,
}

impl MeasurementAdapter {
    pub fn new(codec: Arc<dyn MetadataCodec>, service: Arc<dyn MeasurementService>) -> Self {
        Self { codec, service }
    }

    pub fn codec(&self) -> &Arc<dyn MetadataCodec> {
        &self.codec
    }

    /// Measures `frame` in place. The frame always ends up `parsed`.
    pub fn measure(&self, frame: &mut Frame, keywords: &KeywordsConfig) -> MeasureOutcome {
        let outcome = self.measure_inner(frame, keywords);
        frame.status = FrameStatus::Parsed;
        outcome
    }

    fn measure_inner(&self, frame: &mut Frame, keywords: &KeywordsConfig) -> MeasureOutcome {
        let Some(path) = frame.path() else {
            return MeasureOutcome::Failed;
        };

        let mut header = match self.codec.read(&path) {
            Ok(header) => {
                frame.info = read_info(&header, keywords);
                if let Some(metrics) = embedded_metrics(&header) {
                    frame.metrics = metrics;
                    debug!(name = %frame.name, "Metrics already embedded");
                    return MeasureOutcome::AlreadyParsed;
                }
                Some(header)
            }
            Err(e) => {
                warn!(name = %frame.name, error = %e, "Failed to read frame header");
                None
            }
        };

        let row = match self.service.measure(&path) {
            Ok(row) => row,
            Err(e) => {
                warn!(name = %frame.name, error = %e, "Measurement failed, recording zero metrics");
                frame.metrics = FrameMetrics::default();
                return MeasureOutcome::Failed;
            }
        };

        frame.metrics = row.metrics();
        info!(
            name = %frame.name,
            fwhm = frame.metrics.fwhm,
            eccentricity = frame.metrics.eccentricity,
            snr = frame.metrics.snr,
            psf = frame.metrics.psf,
            "Frame measured"
        );

        match header.as_mut() {
            Some(header) => {
                append_metric_cards(header, &frame.metrics);
                if let Err(e) = self.codec.write(&path, header, true) {
                    warn!(name = %frame.name, error = %e, "Failed to write metrics back to frame");
                }
            }
            None => warn!(name = %frame.name, "Header unreadable, metrics not written back"),
        }

        MeasureOutcome::Measured
    }
}

/// The four metric keywords, if all are present and not a zero FWHM/eccentricity pair.
fn embedded_metrics(header: &HeaderData) -> Option<FrameMetrics> {
    let metrics = FrameMetrics {
        fwhm: header.number(FWHM_KEYWORD)?,
        eccentricity: header.number(ECC_KEYWORD)?,
        snr: header.number(SNR_KEYWORD)?,
        psf: header.number(PSF_KEYWORD)?,
    };

    if metrics.fwhm == 0.0 && metrics.eccentricity == 0.0 {
        return None;
    }
    Some(metrics)
}

fn append_metric_cards(header: &mut HeaderData, metrics: &FrameMetrics) {
    header.push(HeaderCard::new(FWHM_KEYWORD, metrics.fwhm.to_string(), "FWHM"));
    header.push(HeaderCard::new(ECC_KEYWORD, metrics.eccentricity.to_string(), "Eccentricity"));
    header.push(HeaderCard::new(SNR_KEYWORD, metrics.snr.to_string(), "SNR"));
    header.push(HeaderCard::new(PSF_KEYWORD, metrics.psf.to_string(), "PSF"));
}

/// Extracts the descriptive fields named in the keyword configuration.
pub fn read_info(header: &HeaderData, keywords: &KeywordsConfig) -> FrameInfo {
    let text = |name: &str| header.value(name).filter(|v| !v.is_empty());
    let whole = |name: &str| header.number(name).filter(|v| *v >= 0.0).map(|v| v as u32);

    FrameInfo {
        date_obs: text(&keywords.date_obs),
        exposure: header.number(&keywords.exposure),
        temperature: header.number(&keywords.temperature),
        binning_x: whole(&keywords.binning_x),
        binning_y: whole(&keywords.binning_y),
        filter: text(&keywords.filter),
        frame_kind: text(&keywords.frame_kind),
        object: text(&keywords.object),
        azimuth: header.number(&keywords.azimuth),
        altitude: header.number(&keywords.altitude),
        gain: header.number(&keywords.gain),
        weight: header.number(&keywords.weight),
    }
}
