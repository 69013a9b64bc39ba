//! Read-only shared strings table
//!
//! Cells of type `s` store an index into this workbook-level pool instead of
//! their text. The table is loaded once per workbook and borrowed by every
//! sheet decoder; it is never copied per sheet.

use crate::error::{DecodeError, LookupError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::BufRead;

/// Shared strings table (`xl/sharedStrings.xml`)
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SharedStringTable {
    strings: Vec<String>,
}

impl SharedStringTable {
    /// Create an empty table (workbook without a shared strings part)
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from already-resolved strings
    pub fn from_strings<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SharedStringTable {
            strings: strings.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse `sharedStrings.xml` content
    pub fn parse(xml: &str) -> Result<Self> {
        Self::from_reader(xml.as_bytes())
    }

    /// Stream `sharedStrings.xml` from a reader
    ///
    /// Rich-text runs (`<r><t>..</t></r>`) are flattened to plain text and
    /// phonetic guide runs (`<rPh>`) are dropped.
    pub fn from_reader<R: BufRead>(inner: R) -> Result<Self> {
        let mut reader = Reader::from_reader(inner);
        reader.config_mut().trim_text(false);

        let mut buf = Vec::new();
        let mut strings = Vec::new();
        let mut current = String::new();
        let mut in_si = false;
        let mut in_t = false;
        let mut phonetic_depth = 0u32;

        loop {
            let position = reader.buffer_position() as u64;
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|source| DecodeError::Xml { position, source })?;
            match event {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"sst" => {
                        if let Some(count) = attr_usize(&e, b"uniqueCount") {
                            // cap the hint so a bogus count can't force a huge allocation
                            strings.reserve(count.min(1 << 20));
                        }
                    }
                    b"si" => {
                        in_si = true;
                        current.clear();
                    }
                    b"rPh" if in_si => phonetic_depth += 1,
                    b"t" if in_si && phonetic_depth == 0 => in_t = true,
                    _ => {}
                },
                Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
                Event::Text(e) if in_t => {
                    let text = e
                        .unescape()
                        .map_err(|source| DecodeError::Xml { position, source })?;
                    current.push_str(&text);
                }
                Event::CData(e) if in_t => current.push_str(&String::from_utf8_lossy(&e)),
                Event::End(e) => match e.local_name().as_ref() {
                    b"si" => {
                        in_si = false;
                        strings.push(std::mem::take(&mut current));
                    }
                    b"rPh" if phonetic_depth > 0 => phonetic_depth -= 1,
                    b"t" => in_t = false,
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if in_si {
            return Err(DecodeError::InvalidPart {
                part: "sharedStrings.xml",
                message: "unexpected end of input inside <si>".to_string(),
            });
        }

        log::debug!(
            "loaded {} shared strings (~{:.2} MB)",
            strings.len(),
            estimate_size(&strings) as f64 / (1024.0 * 1024.0)
        );

        Ok(SharedStringTable { strings })
    }

    /// Look up a string by its 0-based index
    pub fn get(&self, index: usize) -> std::result::Result<&str, LookupError> {
        self.strings
            .get(index)
            .map(String::as_str)
            .ok_or(LookupError::NotFound {
                index,
                len: self.strings.len(),
            })
    }

    /// Get the number of strings in the table
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

fn attr_usize(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<usize> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| std::str::from_utf8(&a.value).ok()?.parse().ok())
}

fn estimate_size(strings: &[String]) -> usize {
    strings.iter().map(|s| s.len() + 24).sum() // 24 bytes per String overhead
}
