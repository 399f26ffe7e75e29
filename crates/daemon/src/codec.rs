//! Metadata codec for reading and writing embedded header keywords.
//!
//! A FITS header is a sequence of 2880-byte blocks holding 80-character
//! ASCII cards, terminated by an `END` card. The payload that follows is
//! carried through untouched. XISF files are handled in [`crate::xisf`];
//! [`FrameCodec`] picks the right one by extension.

use crate::xisf::XisfCodec;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// FITS block size in bytes.
pub const BLOCK_SIZE: usize = 2880;

/// FITS card width in bytes.
pub const CARD_SIZE: usize = 80;

/// Errors that can occur while reading or writing frame metadata.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported file format: {0:?}")]
    UnsupportedFormat(PathBuf),

    #[error("Header has no END card")]
    MissingEnd,

    #[error("Invalid keyword name: {0:?}")]
    InvalidKeyword(String),

    #[error("Malformed XISF file: {0}")]
    InvalidXisf(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

/// One header keyword: `(name, value, comment)`.
///
/// `value` is the raw text of the card, so string values keep their quotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderCard {
    pub name: String,
    pub value: String,
    pub comment: String,
}

impl HeaderCard {
    pub fn new(name: impl Into<String>, value: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            comment: comment.into(),
        }
    }
}

/// Ordered header keywords plus the opaque image payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderData {
    pub cards: Vec<HeaderCard>,
    pub payload: Vec<u8>,
    /// Format-specific header text kept for write-back (the XISF XML document).
    pub envelope: Option<String>,
}

impl HeaderData {
    /// Cleaned value of the last card with this name.
    pub fn value(&self, name: &str) -> Option<String> {
        self.cards
            .iter()
            .rev()
            .find(|c| c.name == name)
            .map(|c| clean_keyword(&c.value))
    }

    /// Value of the last card with this name, parsed as a number.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.value(name).and_then(|v| v.parse::<f64>().ok())
    }

    pub fn push(&mut self, card: HeaderCard) {
        self.cards.push(card);
    }

    /// Replaces the value of every card named `name`, or appends a new card.
    pub fn set(&mut self, name: &str, value: impl Into<String>, comment: &str) {
        let value = value.into();
        let mut found = false;
        for card in self.cards.iter_mut().filter(|c| c.name == name) {
            card.value = value.clone();
            found = true;
        }
        if !found {
            self.push(HeaderCard::new(name, value, comment));
        }
    }
}

/// Reads and writes the embedded key-value metadata of a frame file.
pub trait MetadataCodec: Send + Sync {
    fn read(&self, path: &Path) -> Result<HeaderData, CodecError>;

    /// Writes `data` to `path` and returns the path actually written.
    ///
    /// With `overwrite` false an existing file is left alone and the data
    /// goes to the first free `<stem>_<n>.<ext>` next to it.
    fn write(&self, path: &Path, data: &HeaderData, overwrite: bool) -> Result<PathBuf, CodecError>;
}

/// Strips single quotes and surrounding whitespace from a header value.
pub fn clean_keyword(value: &str) -> String {
    value.replace('\'', "").trim().to_string()
}

pub(crate) fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Writes `bytes` beside `target` first, then renames over it, so a failed
/// write never truncates a frame.
pub(crate) fn replace_file(target: &Path, bytes: &[u8]) -> Result<(), CodecError> {
    let mut tmp = target.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, target) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Dispatches to the FITS or XISF codec by file extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl MetadataCodec for FrameCodec {
    fn read(&self, path: &Path) -> Result<HeaderData, CodecError> {
        if XisfCodec::supports(path) {
            XisfCodec.read(path)
        } else {
            FitsCodec.read(path)
        }
    }

    fn write(&self, path: &Path, data: &HeaderData, overwrite: bool) -> Result<PathBuf, CodecError> {
        if XisfCodec::supports(path) {
            XisfCodec.write(path, data, overwrite)
        } else {
            FitsCodec.write(path, data, overwrite)
        }
    }
}

/// Codec for `.fit` / `.fits` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FitsCodec;

impl FitsCodec {
    pub fn supports(path: &Path) -> bool {
        has_extension(path, &["fit", "fits"])
    }

    fn check_supported(path: &Path) -> Result<(), CodecError> {
        if Self::supports(path) {
            Ok(())
        } else {
            Err(CodecError::UnsupportedFormat(path.to_path_buf()))
        }
    }
}

impl MetadataCodec for FitsCodec {
    fn read(&self, path: &Path) -> Result<HeaderData, CodecError> {
        Self::check_supported(path)?;
        let bytes = fs::read(path)?;
        parse_fits(&bytes)
    }

    fn write(&self, path: &Path, data: &HeaderData, overwrite: bool) -> Result<PathBuf, CodecError> {
        Self::check_supported(path)?;
        let target = if overwrite { path.to_path_buf() } else { free_path(path) };
        let bytes = encode_fits(data)?;
        replace_file(&target, &bytes)?;
        Ok(target)
    }
}

/// First path of the form `<stem>_<n>.<ext>` that does not exist yet.
pub fn free_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    (1u32..)
        .map(|n| {
            let name = match &ext {
                Some(ext) => format!("{}_{}.{}", stem, n, ext),
                None => format!("{}_{}", stem, n),
            };
            path.with_file_name(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

/// Splits a FITS file into header cards and payload.
pub fn parse_fits(bytes: &[u8]) -> Result<HeaderData, CodecError> {
    let mut cards = Vec::new();

    for (index, chunk) in bytes.chunks(CARD_SIZE).enumerate() {
        if chunk.len() < CARD_SIZE {
            break;
        }
        let card = String::from_utf8_lossy(chunk);
        let name = card.get(..8).unwrap_or(&card).trim_end().to_string();

        if name == "END" {
            let header_len = (index + 1) * CARD_SIZE;
            let payload_start = header_len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
            let payload = bytes.get(payload_start..).unwrap_or_default().to_vec();
            return Ok(HeaderData {
                cards,
                payload,
                envelope: None,
            });
        }

        cards.push(parse_card(&card, name));
    }

    Err(CodecError::MissingEnd)
}

fn parse_card(card: &str, name: String) -> HeaderCard {
    let rest = card.get(8..).unwrap_or_default();

    let Some(body) = rest.strip_prefix("= ") else {
        // Commentary card (COMMENT, HISTORY, blank).
        return HeaderCard::new(name, "", rest.trim_end());
    };

    let trimmed = body.trim_start();
    let (value, after) = if trimmed.starts_with('\'') {
        split_quoted(trimmed)
    } else {
        match trimmed.find('/') {
            Some(pos) => (trimmed[..pos].trim_end(), &trimmed[pos..]),
            None => (trimmed.trim_end(), ""),
        }
    };

    let comment = after.trim_start().strip_prefix('/').unwrap_or(after).trim();
    HeaderCard::new(name, value, comment)
}

/// Splits `'text''s' / comment` after the closing quote. Doubled quotes are escapes.
fn split_quoted(s: &str) -> (&str, &str) {
    let bytes = s.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return (&s[..=i], &s[i + 1..]);
        }
        i += 1;
    }
    (s.trim_end(), "")
}

fn format_card(card: &HeaderCard) -> Result<String, CodecError> {
    if card.name.len() > 8 || !card.name.is_ascii() {
        return Err(CodecError::InvalidKeyword(card.name.clone()));
    }

    let mut line = if card.value.is_empty() && is_commentary(&card.name) {
        format!("{:<8}{}", card.name, card.comment)
    } else {
        let value = if card.value.starts_with('\'') {
            format!("{:<20}", card.value)
        } else {
            format!("{:>20}", card.value)
        };
        let mut line = format!("{:<8}= {}", card.name, value);
        if !card.comment.is_empty() {
            line.push_str(" / ");
            line.push_str(&card.comment);
        }
        line
    };

    line.retain(|c| c.is_ascii() && !c.is_ascii_control());
    line.truncate(CARD_SIZE);
    Ok(format!("{:<80}", line))
}

fn is_commentary(name: &str) -> bool {
    matches!(name, "COMMENT" | "HISTORY" | "")
}

/// Re-emits header cards followed by the payload, padding the header to a block boundary.
pub fn encode_fits(data: &HeaderData) -> Result<Vec<u8>, CodecError> {
    let mut header = String::with_capacity((data.cards.len() + 1) * CARD_SIZE);
    for card in &data.cards {
        header.push_str(&format_card(card)?);
    }
    header.push_str(&format!("{:<80}", "END"));

    let padded_len = header.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
    let mut bytes = header.into_bytes();
    bytes.resize(padded_len, b' ');
    bytes.extend_from_slice(&data.payload);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_header() -> HeaderData {
        HeaderData {
            cards: vec![
                HeaderCard::new("SIMPLE", "T", "conforms to FITS standard"),
                HeaderCard::new("BITPIX", "16", ""),
                HeaderCard::new("OBJECT", "'M 31    '", "target"),
                HeaderCard::new("DATE-OBS", "'2024-03-01T22:14:05'", ""),
                HeaderCard::new("EXPTIME", "300.", "seconds"),
                HeaderCard::new("COMMENT", "", "captured unattended"),
            ],
            payload: vec![7u8; 5000],
            envelope: None,
        }
    }

    #[test]
    fn test_clean_keyword() {
        assert_eq!(clean_keyword("'Ha      '"), "Ha");
        assert_eq!(clean_keyword("  300. "), "300.");
        assert_eq!(clean_keyword("'O''Brien'"), "OBrien");
        assert_eq!(clean_keyword(""), "");
    }

    #[test]
    fn test_encode_pads_to_blocks() {
        let bytes = encode_fits(&sample_header()).unwrap();
        assert_eq!((bytes.len() - 5000) % BLOCK_SIZE, 0);
        assert_eq!(&bytes[..6], b"SIMPLE");
    }

    #[test]
    fn test_parse_reads_cards_and_payload() {
        let header = sample_header();
        let parsed = parse_fits(&encode_fits(&header).unwrap()).unwrap();

        assert_eq!(parsed.cards, header.cards);
        assert_eq!(parsed.payload, header.payload);
        assert_eq!(parsed.value("OBJECT").as_deref(), Some("M 31"));
        assert_eq!(parsed.number("EXPTIME"), Some(300.0));
        assert_eq!(parsed.value("FILTER"), None);
    }

    #[test]
    fn test_value_uses_last_occurrence() {
        let mut header = HeaderData::default();
        header.push(HeaderCard::new("PFWHM", "0", ""));
        header.push(HeaderCard::new("PFWHM", "2.75", "FWHM"));
        assert_eq!(header.number("PFWHM"), Some(2.75));
    }

    #[test]
    fn test_quoted_value_with_slash() {
        let card = format!("{:<80}", "FILTER  = 'L/R     '          / filter name");
        let parsed = parse_card(&card, "FILTER".to_string());
        assert_eq!(parsed.value, "'L/R     '");
        assert_eq!(parsed.comment, "filter name");
    }

    #[test]
    fn test_missing_end_is_error() {
        let bytes = format!("{:<80}", "SIMPLE  =                    T").into_bytes();
        assert!(matches!(parse_fits(&bytes), Err(CodecError::MissingEnd)));
    }

    #[test]
    fn test_long_keyword_rejected() {
        let mut header = HeaderData::default();
        header.push(HeaderCard::new("TOOLONGNAME", "1", ""));
        assert!(matches!(encode_fits(&header), Err(CodecError::InvalidKeyword(_))));
    }

    #[test]
    fn test_write_overwrite_and_free_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("light.fits");
        let codec = FitsCodec;

        let written = codec.write(&path, &sample_header(), true).unwrap();
        assert_eq!(written, path);

        let mut updated = codec.read(&path).unwrap();
        updated.push(HeaderCard::new("PFWHM", "2.5", "FWHM"));

        let side = codec.write(&path, &updated, false).unwrap();
        assert_eq!(side, temp_dir.path().join("light_1.fits"));
        assert_eq!(codec.read(&path).unwrap().value("PFWHM"), None);
        assert_eq!(codec.read(&side).unwrap().number("PFWHM"), Some(2.5));

        codec.write(&path, &updated, true).unwrap();
        assert_eq!(codec.read(&path).unwrap().number("PFWHM"), Some(2.5));
        assert!(!temp_dir.path().join("light.fits.tmp").exists());
    }

    #[test]
    fn test_set_replaces_or_appends() {
        let mut header = sample_header();
        header.set("EXPTIME", "120.", "ignored");
        assert_eq!(header.number("EXPTIME"), Some(120.0));
        assert_eq!(header.cards.iter().find(|c| c.name == "EXPTIME").unwrap().comment, "seconds");

        header.set("SSWEIGHT", "0.75", "Frame Weight");
        assert_eq!(header.cards.last(), Some(&HeaderCard::new("SSWEIGHT", "0.75", "Frame Weight")));
        assert_eq!(header.cards.len(), 7);
    }

    #[test]
    fn test_frame_codec_dispatches_fits() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("light.FIT");
        FrameCodec.write(&path, &sample_header(), true).unwrap();
        assert_eq!(FrameCodec.read(&path).unwrap().value("OBJECT").as_deref(), Some("M 31"));
    }

    #[test]
    fn test_fits_codec_rejects_xisf() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("light.xisf");
        fs::write(&path, b"XISF0100").unwrap();

        assert!(matches!(
            FitsCodec.read(&path),
            Err(CodecError::UnsupportedFormat(_))
        ));
    }
}
