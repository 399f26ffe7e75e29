//! Frame weighting.
//!
//! An operator formula is evaluated once per frame over its metrics and the
//! session-wide minimum and maximum of each, and the result is written into
//! the frame file under the configured weight keyword.

use crate::codec::{CodecError, MetadataCodec};
use crate::frame::{Frame, FrameMetrics};
use evalexpr::{build_operator_tree, ContextWithMutableVariables, EvalexprError, HashMapContext, Node, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

const WEIGHT_COMMENT: &str = "Frame Weight";

/// Errors that can occur while weighting frames.
#[derive(Debug, Error)]
pub enum WeightError {
    #[error("Invalid weighting formula: {0}")]
    Parse(EvalexprError),

    #[error("Failed to evaluate weighting formula: {0}")]
    Eval(EvalexprError),

    #[error("Weighting formula produced {0}")]
    NotFinite(f64),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Session-wide minimum and maximum of each metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricRanges {
    pub min: FrameMetrics,
    pub max: FrameMetrics,
}

impl MetricRanges {
    /// None for an empty session.
    pub fn from_frames(frames: &[Frame]) -> Option<Self> {
        let first = frames.first()?.metrics;
        let mut ranges = Self { min: first, max: first };

        for m in frames.iter().map(|f| &f.metrics) {
            ranges.min.fwhm = ranges.min.fwhm.min(m.fwhm);
            ranges.max.fwhm = ranges.max.fwhm.max(m.fwhm);
            ranges.min.eccentricity = ranges.min.eccentricity.min(m.eccentricity);
            ranges.max.eccentricity = ranges.max.eccentricity.max(m.eccentricity);
            ranges.min.snr = ranges.min.snr.min(m.snr);
            ranges.max.snr = ranges.max.snr.max(m.snr);
            ranges.min.psf = ranges.min.psf.min(m.psf);
            ranges.max.psf = ranges.max.psf.max(m.psf);
        }
        Some(ranges)
    }
}

/// A parsed weighting expression.
///
/// Variables: `FWHM`, `Eccentricity`, `SNR`, `PSF`, and each of them with a
/// `Min` or `Max` suffix for the session range. Write real literals
/// (`1.0`, not `1`) where integer division would truncate.
#[derive(Debug, Clone)]
pub struct WeightingFormula {
    source: String,
    tree: Node,
}

impl WeightingFormula {
    pub fn parse(source: &str) -> Result<Self, WeightError> {
        let tree = build_operator_tree(source).map_err(WeightError::Parse)?;
        Ok(Self {
            source: source.to_string(),
            tree,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Weight of one frame. Non-finite results (e.g. a zero-width range) are errors.
    pub fn evaluate(&self, metrics: &FrameMetrics, ranges: &MetricRanges) -> Result<f64, WeightError> {
        let mut context = HashMapContext::new();
        let variables = [
            ("FWHM", metrics.fwhm),
            ("FWHMMin", ranges.min.fwhm),
            ("FWHMMax", ranges.max.fwhm),
            ("Eccentricity", metrics.eccentricity),
            ("EccentricityMin", ranges.min.eccentricity),
            ("EccentricityMax", ranges.max.eccentricity),
            ("SNR", metrics.snr),
            ("SNRMin", ranges.min.snr),
            ("SNRMax", ranges.max.snr),
            ("PSF", metrics.psf),
            ("PSFMin", ranges.min.psf),
            ("PSFMax", ranges.max.psf),
        ];
        for (name, value) in variables {
            context
                .set_value(name.to_string(), Value::Float(value))
                .map_err(WeightError::Eval)?;
        }

        let weight = self
            .tree
            .eval_number_with_context(&context)
            .map_err(WeightError::Eval)?;
        if !weight.is_finite() {
            return Err(WeightError::NotFinite(weight));
        }
        Ok(weight)
    }
}

/// Counts of what a weighting step did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeightReport {
    pub applied: usize,
    pub skipped: usize,
}

/// Computes the weight of every frame; frames whose evaluation fails keep
/// their previous weight.
pub fn apply_weighting(frames: &mut [Frame], formula: &WeightingFormula) -> WeightReport {
    let mut report = WeightReport::default();
    let Some(ranges) = MetricRanges::from_frames(frames) else {
        return report;
    };

    for frame in frames.iter_mut() {
        match formula.evaluate(&frame.metrics, &ranges) {
            Ok(weight) => {
                frame.info.weight = Some(weight);
                report.applied += 1;
            }
            Err(e) => {
                warn!(name = %frame.name, formula = formula.source(), error = %e, "Weighting skipped");
                report.skipped += 1;
            }
        }
    }
    info!(applied = report.applied, skipped = report.skipped, "Weights computed");
    report
}

fn write_weight(frame: &Frame, weight: f64, codec: &dyn MetadataCodec, keyword: &str) -> Result<bool, WeightError> {
    let Some(path) = frame.path() else {
        return Ok(false);
    };
    let mut header = codec.read(&path)?;
    header.set(keyword, format!("{:.2}", weight), WEIGHT_COMMENT);
    codec.write(&path, &header, true)?;
    Ok(true)
}

/// Writes each computed weight into its frame file, replacing an existing
/// `keyword` card or appending one.
pub fn write_weights(frames: &[Frame], codec: &dyn MetadataCodec, keyword: &str) -> WeightReport {
    let mut report = WeightReport::default();

    for frame in frames {
        let Some(weight) = frame.info.weight else {
            report.skipped += 1;
            continue;
        };
        match write_weight(frame, weight, codec, keyword) {
            Ok(true) => report.applied += 1,
            Ok(false) => {
                debug!(name = %frame.name, "Frame deleted, weight not written");
                report.skipped += 1;
            }
            Err(e) => {
                warn!(name = %frame.name, error = %e, "Failed to write weight");
                report.skipped += 1;
            }
        }
    }
    report
}
