//! XISF metadata codec.
//!
//! A monolithic XISF file starts with the `XISF0100` signature, a
//! little-endian header length and four reserved bytes, followed by the XML
//! header. Pixel data lives in attachment blocks at absolute file offsets
//! named by `location="attachment:<position>:<size>"` attributes. FITS
//! keywords are `<FITSKeyword name= value= comment=/>` children of the first
//! `<Image>` element.

use crate::codec::{free_path, has_extension, replace_file, CodecError, HeaderCard, HeaderData, MetadataCodec};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::fs;
use std::path::{Path, PathBuf};

const SIGNATURE: &[u8; 8] = b"XISF0100";

/// Signature, header length and reserved bytes.
const PREFIX_LEN: usize = 16;

/// Step by which attachments move when a grown header no longer fits.
const BLOCK_ALIGN: usize = 4096;

const ATTACHMENT: &str = "attachment:";
const IMAGE: &[u8] = b"Image";
const KEYWORD: &[u8] = b"FITSKeyword";

/// Codec for `.xisf` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct XisfCodec;

impl XisfCodec {
    pub fn supports(path: &Path) -> bool {
        has_extension(path, &["xisf"])
    }

    fn check_supported(path: &Path) -> Result<(), CodecError> {
        if Self::supports(path) {
            Ok(())
        } else {
            Err(CodecError::UnsupportedFormat(path.to_path_buf()))
        }
    }
}

impl MetadataCodec for XisfCodec {
    fn read(&self, path: &Path) -> Result<HeaderData, CodecError> {
        Self::check_supported(path)?;
        let bytes = fs::read(path)?;
        parse_xisf(&bytes)
    }

    fn write(&self, path: &Path, data: &HeaderData, overwrite: bool) -> Result<PathBuf, CodecError> {
        Self::check_supported(path)?;
        let target = if overwrite { path.to_path_buf() } else { free_path(path) };
        let bytes = encode_xisf(data)?;
        replace_file(&target, &bytes)?;
        Ok(target)
    }
}

fn invalid(reason: &str) -> CodecError {
    CodecError::InvalidXisf(reason.to_string())
}

/// Where we are relative to the first `<Image>` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageScope {
    Before,
    Inside,
    After,
}

/// Returns the XML header and the offset just past it.
fn header_xml(bytes: &[u8]) -> Result<(&str, usize), CodecError> {
    if bytes.len() < PREFIX_LEN || &bytes[..SIGNATURE.len()] != SIGNATURE {
        return Err(invalid("missing XISF0100 signature"));
    }
    let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let end = PREFIX_LEN + len;
    let xml = bytes
        .get(PREFIX_LEN..end)
        .ok_or_else(|| invalid("header length exceeds file size"))?;
    let xml = std::str::from_utf8(xml).map_err(|_| invalid("header is not UTF-8"))?;
    Ok((xml.trim_end_matches('\0'), end))
}

/// `(position, size)` of an `attachment:<position>:<size>` location.
fn parse_location(value: &str) -> Option<(usize, usize)> {
    let mut parts = value.strip_prefix(ATTACHMENT)?.split(':');
    let position = parts.next()?.trim().parse().ok()?;
    let size = parts.next()?.trim().parse().ok()?;
    Some((position, size))
}

fn utf8(bytes: &[u8]) -> Result<&str, CodecError> {
    std::str::from_utf8(bytes).map_err(|_| invalid("XML name is not UTF-8"))
}

/// Every attachment block referenced by the header.
pub fn attachments(xml: &str) -> Result<Vec<(usize, usize)>, CodecError> {
    let mut reader = Reader::from_str(xml);
    let mut found = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                for attr in e.attributes() {
                    let attr = attr.map_err(quick_xml::Error::from)?;
                    if attr.key.local_name().as_ref() == b"location" {
                        if let Some(block) = parse_location(&attr.unescape_value()?) {
                            found.push(block);
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(found)
}

fn keyword_card(e: &BytesStart) -> Result<HeaderCard, CodecError> {
    let mut card = HeaderCard::new("", "", "");
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let value = attr.unescape_value()?.into_owned();
        match attr.key.local_name().as_ref() {
            b"name" => card.name = value,
            b"value" => card.value = value,
            b"comment" => card.comment = value,
            _ => {}
        }
    }
    Ok(card)
}

fn read_keywords(xml: &str) -> Result<Vec<HeaderCard>, CodecError> {
    let mut reader = Reader::from_str(xml);
    let mut scope = ImageScope::Before;
    let mut cards = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) if scope == ImageScope::Before && e.local_name().as_ref() == IMAGE => {
                scope = ImageScope::Inside;
            }
            Event::Empty(e) if scope == ImageScope::Before && e.local_name().as_ref() == IMAGE => {
                scope = ImageScope::After;
            }
            Event::Start(e) | Event::Empty(e)
                if scope == ImageScope::Inside && e.local_name().as_ref() == KEYWORD =>
            {
                cards.push(keyword_card(&e)?);
            }
            Event::End(e) if scope == ImageScope::Inside && e.local_name().as_ref() == IMAGE => {
                scope = ImageScope::After;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(cards)
}

/// Splits an XISF file into the first image's keywords, its XML header and
/// the attachment area.
pub fn parse_xisf(bytes: &[u8]) -> Result<HeaderData, CodecError> {
    let (xml, header_end) = header_xml(bytes)?;
    let cards = read_keywords(xml)?;

    let data_start = attachments(xml)?
        .iter()
        .map(|(position, _)| *position)
        .min()
        .unwrap_or(header_end);
    if data_start < header_end {
        return Err(invalid("attachment overlaps the header"));
    }
    let payload = bytes
        .get(data_start..)
        .ok_or_else(|| invalid("attachment beyond end of file"))?
        .to_vec();

    Ok(HeaderData {
        cards,
        payload,
        envelope: Some(xml.to_string()),
    })
}

/// Copy of `e` with every attachment position moved by `shift` bytes.
fn shifted(e: &BytesStart, shift: usize) -> Result<BytesStart<'static>, CodecError> {
    let mut out = BytesStart::new(utf8(e.name().as_ref())?.to_string());
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = utf8(attr.key.as_ref())?.to_string();
        let mut value = attr.unescape_value()?.into_owned();
        if key == "location" {
            if let Some((position, size)) = parse_location(&value) {
                value = format!("{}{}:{}", ATTACHMENT, position + shift, size);
            }
        }
        out.push_attribute((key.as_str(), value.as_str()));
    }
    Ok(out)
}

fn write_keywords(writer: &mut Writer<Vec<u8>>, cards: &[HeaderCard]) -> Result<(), CodecError> {
    for card in cards {
        let mut keyword = BytesStart::new("FITSKeyword");
        keyword.push_attribute(("name", card.name.as_str()));
        keyword.push_attribute(("value", card.value.as_str()));
        keyword.push_attribute(("comment", card.comment.as_str()));
        writer.write_event(Event::Empty(keyword))?;
    }
    Ok(())
}

/// Re-emits `xml` with the first image's keywords replaced by `cards`.
fn rewrite_header(xml: &str, cards: &[HeaderCard], shift: usize) -> Result<String, CodecError> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut scope = ImageScope::Before;

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(e) if scope == ImageScope::Inside && e.local_name().as_ref() == KEYWORD => {
                reader.read_to_end(e.name())?;
            }
            Event::Empty(e) if scope == ImageScope::Inside && e.local_name().as_ref() == KEYWORD => {}
            Event::Start(e) => {
                if scope == ImageScope::Before && e.local_name().as_ref() == IMAGE {
                    scope = ImageScope::Inside;
                }
                writer.write_event(Event::Start(shifted(&e, shift)?))?;
            }
            Event::Empty(e) => {
                if scope == ImageScope::Before && e.local_name().as_ref() == IMAGE {
                    // Open it up so the keywords have somewhere to go.
                    let name = utf8(e.name().as_ref())?.to_string();
                    writer.write_event(Event::Start(shifted(&e, shift)?))?;
                    write_keywords(&mut writer, cards)?;
                    writer.write_event(Event::End(BytesEnd::new(name)))?;
                    scope = ImageScope::After;
                } else {
                    writer.write_event(Event::Empty(shifted(&e, shift)?))?;
                }
            }
            Event::End(e) if scope == ImageScope::Inside && e.local_name().as_ref() == IMAGE => {
                write_keywords(&mut writer, cards)?;
                writer.write_event(Event::End(e))?;
                scope = ImageScope::After;
            }
            other => writer.write_event(other)?,
        }
    }

    String::from_utf8(writer.into_inner()).map_err(|_| invalid("rewritten header is not UTF-8"))
}

/// Rebuilds an XISF file from parsed header data.
///
/// Attachments stay where they are while the new header fits in front of
/// them; otherwise they all move back by whole blocks.
pub fn encode_xisf(data: &HeaderData) -> Result<Vec<u8>, CodecError> {
    let envelope = data
        .envelope
        .as_deref()
        .ok_or_else(|| invalid("no XML header to write"))?;
    let first_block = attachments(envelope)?.iter().map(|(position, _)| *position).min();

    let mut shift = 0;
    loop {
        let xml = rewrite_header(envelope, &data.cards, shift)?;
        let header_end = PREFIX_LEN + xml.len();
        let data_start = match first_block {
            None => header_end,
            Some(position) if header_end <= position + shift => position + shift,
            Some(_) => {
                shift += BLOCK_ALIGN;
                continue;
            }
        };

        let len = u32::try_from(xml.len()).map_err(|_| invalid("header too large"))?;
        let mut bytes = Vec::with_capacity(data_start + data.payload.len());
        bytes.extend_from_slice(SIGNATURE);
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 4]);
        bytes.extend_from_slice(xml.as_bytes());
        bytes.resize(data_start, 0);
        bytes.extend_from_slice(&data.payload);
        return Ok(bytes);
    }
}
