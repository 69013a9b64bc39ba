//! Style index to number-format lookup
//!
//! Only the part of `xl/styles.xml` that affects cell display text is kept:
//! custom `<numFmt>` codes and the `numFmtId` of every `<cellXfs>` entry.
//! The table is read-only once built.

use crate::error::{DecodeError, LookupError, Result};
use indexmap::IndexMap;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::BufRead;

/// First id available to custom (workbook-defined) formats
pub const FIRST_CUSTOM_FORMAT_ID: u32 = 164;

/// A resolved number format: id plus format code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberFormat<'a> {
    /// Format ID
    pub id: u32,
    /// Format code (e.g., "General", "0.00", "mm/dd/yyyy")
    pub code: &'a str,
}

impl<'a> NumberFormat<'a> {
    /// Create a new number format
    #[inline]
    pub fn new(id: u32, code: &'a str) -> Self {
        NumberFormat { id, code }
    }

    /// Check if this is a built-in format (ID < 164)
    #[inline]
    pub fn is_builtin(&self) -> bool {
        self.id < FIRST_CUSTOM_FORMAT_ID
    }

    /// Check if this format renders a date or time
    pub fn is_date_format(&self) -> bool {
        is_builtin_date(self.id) || is_date_format(self.code)
    }
}

/// Style index → number format table (`xl/styles.xml`)
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NumberFormatTable {
    custom: IndexMap<u32, String>,
    cell_formats: Vec<u32>,
}

impl NumberFormatTable {
    /// Create an empty table (workbook without a styles part)
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom format code (builder style)
    pub fn with_custom_format(mut self, id: u32, code: impl Into<String>) -> Self {
        self.custom.insert(id, code.into());
        self
    }

    /// Append a cell style pointing at `num_fmt_id` (builder style)
    pub fn with_cell_style(mut self, num_fmt_id: u32) -> Self {
        self.cell_formats.push(num_fmt_id);
        self
    }

    /// Parse `styles.xml` content
    pub fn parse(xml: &str) -> Result<Self> {
        Self::from_reader(xml.as_bytes())
    }

    /// Stream `styles.xml` from a reader
    pub fn from_reader<R: BufRead>(inner: R) -> Result<Self> {
        let mut reader = Reader::from_reader(inner);
        let mut buf = Vec::new();
        let mut table = NumberFormatTable::default();
        let mut in_num_fmts = false;
        let mut in_cell_xfs = false;

        loop {
            let position = reader.buffer_position() as u64;
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|source| DecodeError::Xml { position, source })?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => match e.local_name().as_ref() {
                    b"numFmts" => in_num_fmts = matches!(event, Event::Start(_)),
                    // <dxf> entries carry their own <numFmt>s for conditional formats
                    b"numFmt" if in_num_fmts => {
                        let id = attr(e, b"numFmtId")?.and_then(|v| v.parse::<u32>().ok());
                        let code = attr(e, b"formatCode")?;
                        match (id, code) {
                            (Some(id), Some(code)) => {
                                table.custom.insert(id, code);
                            }
                            _ => log::warn!("styles.xml: skipping <numFmt> without id or code"),
                        }
                    }
                    b"cellXfs" => in_cell_xfs = matches!(event, Event::Start(_)),
                    b"xf" if in_cell_xfs => {
                        let id = attr(e, b"numFmtId")?
                            .and_then(|v| v.parse::<u32>().ok())
                            .unwrap_or(0);
                        table.cell_formats.push(id);
                    }
                    _ => {}
                },
                Event::End(ref e) => match e.local_name().as_ref() {
                    b"numFmts" => in_num_fmts = false,
                    b"cellXfs" => in_cell_xfs = false,
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        log::debug!(
            "loaded {} cell styles, {} custom number formats",
            table.cell_formats.len(),
            table.custom.len()
        );
        Ok(table)
    }

    /// Number of cell styles (`<cellXfs>` entries)
    pub fn style_count(&self) -> usize {
        self.cell_formats.len()
    }

    /// Resolve the number format of a cell's style
    ///
    /// A cell without a style attribute uses style 0 when the workbook defines
    /// any styles. `Ok(None)` means no format applies; an unknown style index
    /// is a [`LookupError`].
    pub fn format_for(
        &self,
        style: Option<u32>,
    ) -> std::result::Result<Option<NumberFormat<'_>>, LookupError> {
        let index = match style {
            Some(index) => index as usize,
            None if !self.cell_formats.is_empty() => 0,
            None => return Ok(None),
        };

        let id = *self
            .cell_formats
            .get(index)
            .ok_or(LookupError::NotFound {
                index,
                len: self.cell_formats.len(),
            })?;

        Ok(self.format_code(id).map(|code| NumberFormat::new(id, code)))
    }

    /// Format code for a format id: custom definitions win over built-ins
    pub fn format_code(&self, id: u32) -> Option<&str> {
        self.custom
            .get(&id)
            .map(String::as_str)
            .or_else(|| builtin_format_code(id))
    }
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a?;
        if a.key.local_name().as_ref() == key {
            let value = a
                .unescape_value()
                .map_err(|source| DecodeError::Xml { position: 0, source })?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn is_builtin_date(id: u32) -> bool {
    matches!(id, 14..=22 | 45..=47)
}

/// Check if a format code represents a date/time format
///
/// Only the first section is inspected; quoted text, escapes and bracketed
/// modifiers are skipped. Elapsed-time codes (`[h]:mm`) also count.
pub fn is_date_format(format: &str) -> bool {
    let mut escaped = false;
    let mut in_quote = false;
    let mut in_bracket = false;
    let mut bracket = String::new();

    for ch in format.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        if in_quote {
            in_quote = ch != '"';
            continue;
        }
        if in_bracket {
            if ch == ']' {
                in_bracket = false;
                let lower = bracket.to_ascii_lowercase();
                if !lower.is_empty() && lower.chars().all(|c| matches!(c, 'h' | 'm' | 's')) {
                    return true;
                }
                bracket.clear();
            } else {
                bracket.push(ch);
            }
            continue;
        }
        match ch {
            '\\' | '_' | '*' => escaped = true,
            '"' => in_quote = true,
            '[' => in_bracket = true,
            ';' => return false,
            'd' | 'D' | 'm' | 'M' | 'y' | 'Y' | 'h' | 'H' | 's' | 'S' => return true,
            _ => {}
        }
    }
    false
}

/// Get the format code for a built-in number format ID
///
/// Returns `None` if the ID is not a recognized built-in format.
pub fn builtin_format_code(id: u32) -> Option<&'static str> {
    match id {
        0 => Some("General"),
        1 => Some("0"),
        2 => Some("0.00"),
        3 => Some("#,##0"),
        4 => Some("#,##0.00"),
        5 => Some("\"$\"#,##0_);(\"$\"#,##0)"),
        6 => Some("\"$\"#,##0_);[Red](\"$\"#,##0)"),
        7 => Some("\"$\"#,##0.00_);(\"$\"#,##0.00)"),
        8 => Some("\"$\"#,##0.00_);[Red](\"$\"#,##0.00)"),
        9 => Some("0%"),
        10 => Some("0.00%"),
        11 => Some("0.00E+00"),
        12 => Some("# ?/?"),
        13 => Some("# ??/??"),
        14 => Some("m/d/yy"),
        15 => Some("d-mmm-yy"),
        16 => Some("d-mmm"),
        17 => Some("mmm-yy"),
        18 => Some("h:mm AM/PM"),
        19 => Some("h:mm:ss AM/PM"),
        20 => Some("h:mm"),
        21 => Some("h:mm:ss"),
        22 => Some("m/d/yy h:mm"),
        37 => Some("#,##0_);(#,##0)"),
        38 => Some("#,##0_);[Red](#,##0)"),
        39 => Some("#,##0.00_);(#,##0.00)"),
        40 => Some("#,##0.00_);[Red](#,##0.00)"),
        41 => Some("_(* #,##0_);_(* (#,##0);_(* \"-\"_);_(@_)"),
        42 => Some("_(\"$\"* #,##0_);_(\"$\"* (#,##0);_(\"$\"* \"-\"_);_(@_)"),
        43 => Some("_(* #,##0.00_);_(* (#,##0.00);_(* \"-\"??_);_(@_)"),
        44 => Some("_(\"$\"* #,##0.00_);_(\"$\"* (#,##0.00);_(\"$\"* \"-\"??_);_(@_)"),
        45 => Some("mm:ss"),
        46 => Some("[h]:mm:ss"),
        47 => Some("mm:ss.0"),
        48 => Some("##0.0E+0"),
        49 => Some("@"),
        _ => None,
    }
}
