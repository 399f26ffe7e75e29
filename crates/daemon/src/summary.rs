//! Session summary: totals, averages and per-target groups of the registry.

use crate::config::ThresholdsConfig;
use crate::frame::Frame;
use crate::validity::is_valid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const UNKNOWN: &str = "unknown";

/// Mean of each quality metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricAverages {
    pub fwhm: f64,
    pub eccentricity: f64,
    pub snr: f64,
    pub psf: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    count: usize,
    approved: usize,
    total_size: u64,
    total_exposure: f64,
    fwhm: f64,
    eccentricity: f64,
    snr: f64,
    psf: f64,
}

impl Totals {
    fn add(&mut self, frame: &Frame, valid: bool) {
        self.count += 1;
        if valid {
            self.approved += 1;
        }
        self.total_size += frame.size;
        self.total_exposure += frame.info.exposure.unwrap_or(0.0);
        self.fwhm += frame.metrics.fwhm;
        self.eccentricity += frame.metrics.eccentricity;
        self.snr += frame.metrics.snr;
        self.psf += frame.metrics.psf;
    }

    fn averages(&self) -> MetricAverages {
        if self.count == 0 {
            return MetricAverages::default();
        }
        let n = self.count as f64;
        MetricAverages {
            fwhm: self.fwhm / n,
            eccentricity: self.eccentricity / n,
            snr: self.snr / n,
            psf: self.psf / n,
        }
    }
}

/// Totals for one `(object, filter)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub object: String,
    pub filter: String,
    pub count: usize,
    pub approved: usize,
    pub rejected: usize,
    pub total_size: u64,
    pub total_exposure_secs: f64,
    pub averages: MetricAverages,
}

/// Whole-session view of the registry under the current thresholds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub count: usize,
    pub approved: usize,
    pub rejected: usize,
    pub total_size: u64,
    pub total_exposure_secs: f64,
    pub averages: MetricAverages,
    /// Frame count per status name.
    pub by_status: BTreeMap<String, usize>,
    /// Sorted by object, then filter.
    pub groups: Vec<GroupSummary>,
}

impl SessionSummary {
    pub fn from_frames(frames: &[Frame], thresholds: &ThresholdsConfig) -> Self {
        let mut session = Totals::default();
        let mut groups: BTreeMap<(String, String), Totals> = BTreeMap::new();
        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();

        for frame in frames {
            let valid = is_valid(&frame.metrics, thresholds);
            session.add(frame, valid);

            let key = (
                frame.info.object.clone().unwrap_or_else(|| UNKNOWN.to_string()),
                frame.info.filter.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            );
            groups.entry(key).or_default().add(frame, valid);
            *by_status.entry(frame.status.to_string()).or_default() += 1;
        }

        let groups = groups
            .into_iter()
            .map(|((object, filter), t)| GroupSummary {
                object,
                filter,
                count: t.count,
                approved: t.approved,
                rejected: t.count - t.approved,
                total_size: t.total_size,
                total_exposure_secs: t.total_exposure,
                averages: t.averages(),
            })
            .collect();

        Self {
            count: session.count,
            approved: session.approved,
            rejected: session.count - session.approved,
            total_size: session.total_size,
            total_exposure_secs: session.total_exposure,
            averages: session.averages(),
            by_status,
            groups,
        }
    }
}

/// Integration time as `1.5hrs`, `12min` or `30sec`.
pub fn format_exposure(secs: f64) -> String {
    const MIN: f64 = 60.0;
    const HRS: f64 = 60.0 * MIN;

    if secs >= HRS {
        format!("{:.1}hrs", secs / HRS)
    } else if secs >= MIN {
        format!("{:.0}min", secs / MIN)
    } else {
        format!("{}sec", secs)
    }
}

/// Byte count in binary units with three significant digits.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [(&str, u64); 4] = [
        ("TiB", 1 << 40),
        ("GiB", 1 << 30),
        ("MiB", 1 << 20),
        ("KiB", 1 << 10),
    ];

    for (unit, scale) in UNITS {
        if bytes >= scale {
            let value = bytes as f64 / scale as f64;
            let int_digits = (value.log10().floor() as i32 + 1).max(1);
            let decimals = (3 - int_digits).max(0) as usize;
            let text = format!("{:.*}", decimals, value);
            let text = if text.contains('.') {
                text.trim_end_matches('0').trim_end_matches('.').to_string()
            } else {
                text
            };
            return format!("{} {}", text, unit);
        }
    }
    format!("{} B", bytes)
}

/// Window bound as a 12-hour clock time; 0 means unset.
pub fn format_hour(hour: u8) -> String {
    if hour == 0 {
        return "Time not set".to_string();
    }
    let suffix = if hour > 11 { "PM" } else { "AM" };
    format!("{}:00{}", (u32::from(hour) + 11) % 12 + 1, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limit;
    use crate::frame::FrameStatus;
    use chrono::Utc;

    fn frame(name: &str, object: Option<&str>, filter: Option<&str>, fwhm: f64, size: u64, exposure: f64) -> Frame {
        let mut f = Frame::discovered(name, "/data", size, Utc::now());
        f.status = FrameStatus::Parsed;
        f.metrics.fwhm = fwhm;
        f.metrics.snr = 20.0;
        f.info.object = object.map(str::to_string);
        f.info.filter = filter.map(str::to_string);
        f.info.exposure = Some(exposure);
        f
    }

    #[test]
    fn test_format_exposure() {
        assert_eq!(format_exposure(5400.0), "1.5hrs");
        assert_eq!(format_exposure(3600.0), "1.0hrs");
        assert_eq!(format_exposure(720.0), "12min");
        assert_eq!(format_exposure(30.0), "30sec");
        assert_eq!(format_exposure(2.5), "2.5sec");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1 KiB");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(33_554_432), "32 MiB");
        assert_eq!(format_size(1_288_490_189), "1.2 GiB");
        assert_eq!(format_size(3 << 40), "3 TiB");
    }

    #[test]
    fn test_format_hour() {
        assert_eq!(format_hour(0), "Time not set");
        assert_eq!(format_hour(1), "1:00AM");
        assert_eq!(format_hour(11), "11:00AM");
        assert_eq!(format_hour(12), "12:00PM");
        assert_eq!(format_hour(20), "8:00PM");
    }

    #[test]
    fn test_summary_totals_and_groups() {
        let mut thresholds = ThresholdsConfig::default();
        thresholds.fwhm_limit = Limit::new(3.0);

        let frames = vec![
            frame("a.fits", Some("M31"), Some("Ha"), 2.0, 100, 300.0),
            frame("b.fits", Some("M31"), Some("Ha"), 4.0, 100, 300.0),
            frame("c.fits", Some("M31"), Some("OIII"), 2.0, 50, 600.0),
            frame("d.fits", None, None, 1.0, 10, 0.0),
        ];

        let summary = SessionSummary::from_frames(&frames, &thresholds);
        assert_eq!(summary.count, 4);
        assert_eq!(summary.approved, 3);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.total_size, 260);
        assert_eq!(summary.total_exposure_secs, 1200.0);
        assert_eq!(summary.averages.fwhm, 2.25);
        assert_eq!(summary.averages.snr, 20.0);
        assert_eq!(summary.by_status.get("parsed"), Some(&4));

        assert_eq!(summary.groups.len(), 3);
        let ha = &summary.groups[0];
        assert_eq!((ha.object.as_str(), ha.filter.as_str()), ("M31", "Ha"));
        assert_eq!(ha.count, 2);
        assert_eq!(ha.rejected, 1);
        assert_eq!(ha.averages.fwhm, 3.0);
        assert_eq!(summary.groups[2].object, "unknown");
    }

    #[test]
    fn test_empty_summary() {
        let summary = SessionSummary::from_frames(&[], &ThresholdsConfig::default());
        assert_eq!(summary, SessionSummary::default());
    }
}
