//! Streaming sheet decoder
//!
//! [`SheetDecoder`] consumes the markup tokens of one worksheet and pushes
//! row and cell events to a [`SheetEventSink`]. It holds at most one cell's
//! worth of text plus the row/column cursors; the shared strings, number
//! formats and comments are borrowed for the sheet's lifetime and never
//! modified.
//!
//! **States:**
//! - `Idle`: between rows (also before `<sheetData>`)
//! - `InRow`: inside `<row>`
//! - `InCell`: inside `<c>`, accumulating `<v>`, `<f>` and `<is><t>` text
//! - `SheetEnded`: after `</sheetData>`, only header/footer text is read
//!
//! Missing rows and missing cells are not invented; only cells that carry a
//! comment are synthesized, with no value.

use crate::comments::{CommentIndex, CommentReconciler};
use crate::error::{CellIssue, DecodeError, ReferenceKind, Result};
use crate::format::{DataFormatter, FormatOptions};
use crate::markup::{SheetReader, StartTag, Token};
use crate::sink::SheetEventSink;
use crate::styles::NumberFormat;
use crate::types::{CellAddress, CellValueType, MAX_COLUMN, MAX_ROW};
use crate::workbook::WorkbookTables;
use std::io::BufRead;
use std::ops::ControlFlow;

/// Text emitted for a boolean `1`
pub const TRUE_LITERAL: &str = "TRUE";
/// Text emitted for a boolean `0`
pub const FALSE_LITERAL: &str = "FALSE";
/// Prefix put before the payload of an error cell
pub const ERROR_PREFIX: &str = "ERROR:";

/// Decoder behaviour switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Emit formula source text instead of the cached result
    pub formulas_not_results: bool,
    /// Separators and date system for formatted numbers
    pub format: FormatOptions,
}

impl DecoderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefer formula text over cached results (builder style)
    pub fn with_formulas_not_results(mut self, formulas: bool) -> Self {
        self.formulas_not_results = formulas;
        self
    }

    /// Set number formatting options (builder style)
    pub fn with_format(mut self, format: FormatOptions) -> Self {
        self.format = format;
        self
    }
}

/// Header or footer text found after the sheet data
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeaderFooter {
    /// Element name: `oddHeader`, `evenFooter`, `firstHeader`, ...
    pub kind: String,
    /// Whether this is a header (otherwise a footer)
    pub is_header: bool,
    /// Raw text including `&`-codes
    pub text: String,
}

/// What a finished sheet produced besides its events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetSummary {
    /// Rows seen (`<row>` elements)
    pub rows: u64,
    /// Cell events emitted, including synthesized comment cells
    pub cells: u64,
    /// Recoverable problems, in the order they were found
    pub issues: Vec<CellIssue>,
    /// Header/footer texts in document order
    pub header_footers: Vec<HeaderFooter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SheetState {
    Idle,
    InRow,
    InCell,
    SheetEnded,
}

/// Transient record of the open `<c>` element
#[derive(Debug, Default)]
struct RawCell<'a> {
    address: CellAddress,
    value_type: CellValueType,
    /// `t="str"`: the cached result is text, not a number
    string_result: bool,
    format: Option<NumberFormat<'a>>,
    value: String,
    formula: String,
    has_value: bool,
    has_formula: bool,
}

impl RawCell<'_> {
    fn reset(&mut self, address: CellAddress, value_type: CellValueType) {
        self.address = address;
        self.value_type = value_type;
        self.string_result = false;
        self.format = None;
        self.value.clear();
        self.formula.clear();
        self.has_value = false;
        self.has_formula = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Capture {
    #[default]
    None,
    Value,
    Formula,
    InlineText,
    HeaderFooter,
}

/// Push-driven decoder for one worksheet
///
/// Create one per sheet, feed it every token, then call [`finish`](Self::finish).
/// To abort, stop feeding and drop it.
///
/// # Example
///
/// ```
/// use sheetstream::markup::{StartTag, Token};
/// use sheetstream::sink::{EventRecorder, SheetEvent};
/// use sheetstream::{CellAddress, DecoderOptions, SheetDecoder, WorkbookTables};
///
/// let tables = WorkbookTables::default();
/// let mut decoder = SheetDecoder::new(&tables, None, DecoderOptions::default());
/// let mut sink = EventRecorder::new();
///
/// for token in [
///     Token::Start(StartTag::new("sheetData")),
///     Token::Start(StartTag::new("row").with_attr("r", "1")),
///     Token::Start(StartTag::new("c").with_attr("r", "A1")),
///     Token::Start(StartTag::new("v")),
///     Token::Text("42".into()),
///     Token::End("v"),
///     Token::End("c"),
///     Token::End("row"),
///     Token::End("sheetData"),
/// ] {
///     decoder.feed(token, &mut sink)?;
/// }
/// decoder.finish()?;
///
/// assert_eq!(sink.events[1], SheetEvent::cell(CellAddress::new(0, 0), Some("42"), None));
/// # Ok::<(), sheetstream::DecodeError>(())
/// ```
pub struct SheetDecoder<'a> {
    tables: &'a WorkbookTables,
    formatter: DataFormatter,
    formulas_not_results: bool,
    comments: CommentReconciler<'a>,

    state: SheetState,
    capture: Capture,
    phonetic_depth: u32,
    row: u32,
    next_row: u32,
    next_col: u32,
    cell: RawCell<'a>,
    header_footer: Option<HeaderFooter>,
    position: u64,

    summary: SheetSummary,
}

impl<'a> SheetDecoder<'a> {
    /// Create a decoder for one sheet
    pub fn new(
        tables: &'a WorkbookTables,
        comments: Option<&'a CommentIndex>,
        options: DecoderOptions,
    ) -> Self {
        SheetDecoder {
            tables,
            formatter: DataFormatter::new(options.format),
            formulas_not_results: options.formulas_not_results,
            comments: CommentReconciler::new(comments),
            state: SheetState::Idle,
            capture: Capture::None,
            phonetic_depth: 0,
            row: 0,
            next_row: 0,
            next_col: 0,
            cell: RawCell {
                value: String::with_capacity(64),
                formula: String::with_capacity(64),
                ..RawCell::default()
            },
            header_footer: None,
            position: 0,
            summary: SheetSummary::default(),
        }
    }

    /// Whether `</sheetData>` has been seen
    pub fn is_finished(&self) -> bool {
        self.state == SheetState::SheetEnded
    }

    /// Issues found so far
    pub fn issues(&self) -> &[CellIssue] {
        &self.summary.issues
    }

    /// Feed one token
    pub fn feed<S: SheetEventSink + ?Sized>(&mut self, token: Token<'_>, sink: &mut S) -> Result<()> {
        match token {
            Token::Start(tag) => self.start_element(&tag, sink),
            Token::Text(text) => {
                self.characters(&text);
                Ok(())
            }
            Token::End(name) => self.end_element(name, sink),
        }
    }

    /// Feed one token, recording its byte offset for error messages
    pub fn feed_at<S: SheetEventSink + ?Sized>(
        &mut self,
        token: Token<'_>,
        position: u64,
        sink: &mut S,
    ) -> Result<()> {
        self.position = position;
        self.feed(token, sink)
    }

    /// End of input: the sheet must have been closed
    pub fn finish(self) -> Result<SheetSummary> {
        if self.state != SheetState::SheetEnded {
            return Err(DecodeError::malformed(
                self.position,
                "input ended before </sheetData>",
            ));
        }
        Ok(self.summary)
    }

    fn malformed(&self, message: impl Into<String>) -> DecodeError {
        DecodeError::malformed(self.position, message)
    }

    fn report<S: SheetEventSink + ?Sized>(&mut self, issue: CellIssue, sink: &mut S) {
        log::warn!("{}", issue);
        sink.issue(&issue);
        self.summary.issues.push(issue);
    }

    fn start_element<S: SheetEventSink + ?Sized>(&mut self, tag: &StartTag<'_>, sink: &mut S) -> Result<()> {
        match tag.local_name() {
            "row" => self.start_row(tag, sink),
            "c" => self.start_cell(tag, sink),
            "v" if self.state == SheetState::InCell => {
                self.capture = Capture::Value;
                self.cell.has_value = true;
                Ok(())
            }
            "f" if self.state == SheetState::InCell => {
                self.start_formula(tag);
                Ok(())
            }
            "is" if self.state == SheetState::InCell => {
                self.cell.has_value = true;
                Ok(())
            }
            "rPh" if self.state == SheetState::InCell => {
                self.phonetic_depth += 1;
                Ok(())
            }
            "t" if self.state == SheetState::InCell && self.phonetic_depth == 0 => {
                self.capture = Capture::InlineText;
                Ok(())
            }
            name @ ("oddHeader" | "evenHeader" | "firstHeader" | "oddFooter" | "evenFooter"
            | "firstFooter") => {
                if self.state == SheetState::InCell {
                    return Err(self.malformed(format!("<{}> inside a cell", name)));
                }
                self.capture = Capture::HeaderFooter;
                self.header_footer = Some(HeaderFooter {
                    kind: name.to_string(),
                    is_header: name.ends_with("Header"),
                    text: String::new(),
                });
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn characters(&mut self, text: &str) {
        match self.capture {
            Capture::Value | Capture::InlineText => self.cell.value.push_str(text),
            Capture::Formula => self.cell.formula.push_str(text),
            Capture::HeaderFooter => {
                if let Some(hf) = self.header_footer.as_mut() {
                    hf.text.push_str(text);
                }
            }
            Capture::None => {}
        }
    }

    fn end_element<S: SheetEventSink + ?Sized>(&mut self, name: &str, sink: &mut S) -> Result<()> {
        match name {
            "v" | "t" if self.state == SheetState::InCell => {
                self.capture = Capture::None;
                Ok(())
            }
            "f" if self.state == SheetState::InCell => {
                if self.capture == Capture::Formula {
                    self.cell.has_formula = true;
                }
                self.capture = Capture::None;
                Ok(())
            }
            "rPh" if self.state == SheetState::InCell => {
                self.phonetic_depth = self.phonetic_depth.saturating_sub(1);
                Ok(())
            }
            "c" => self.end_cell(sink),
            "row" => self.end_row(sink),
            "sheetData" => self.end_sheet_data(sink),
            "oddHeader" | "evenHeader" | "firstHeader" | "oddFooter" | "evenFooter" | "firstFooter" => {
                self.capture = Capture::None;
                if let Some(hf) = self.header_footer.take() {
                    self.summary.header_footers.push(hf);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn start_row<S: SheetEventSink + ?Sized>(&mut self, tag: &StartTag<'_>, sink: &mut S) -> Result<()> {
        match self.state {
            SheetState::Idle => {}
            SheetState::InRow | SheetState::InCell => return Err(self.malformed("<row> inside a row")),
            SheetState::SheetEnded => return Err(self.malformed("<row> after </sheetData>")),
        }

        let row = match tag.attr("r") {
            Some(r) => match r.parse::<u32>() {
                Ok(n) if n >= 1 => n - 1,
                _ => return Err(self.malformed(format!("invalid row number '{}'", r))),
            },
            None => self.next_row,
        };
        if row > MAX_ROW {
            return Err(self.malformed(format!("row {} is beyond the last sheet row", u64::from(row) + 1)));
        }

        if self.summary.rows > 0 && row < self.next_row {
            let issue = CellIssue::InvariantViolation {
                address: CellAddress::new(row, 0),
                message: format!("row {} arrives after row {}", row + 1, self.next_row),
            };
            self.report(issue, sink);
        }

        log::trace!("row {} start", row);
        self.row = row;
        self.next_col = 0;
        self.state = SheetState::InRow;
        self.summary.rows += 1;
        sink.start_row(row);
        Ok(())
    }

    fn start_cell<S: SheetEventSink + ?Sized>(&mut self, tag: &StartTag<'_>, sink: &mut S) -> Result<()> {
        match self.state {
            SheetState::InRow => {}
            SheetState::InCell => return Err(self.malformed("<c> inside a cell")),
            SheetState::Idle => return Err(self.malformed("<c> outside a row")),
            SheetState::SheetEnded => return Err(self.malformed("<c> after </sheetData>")),
        }

        let address = match tag.attr("r") {
            Some(r) => CellAddress::parse(r).map_err(|_| self.malformed(format!("invalid cell reference '{}'", r)))?,
            None if self.next_col > MAX_COLUMN => {
                return Err(self.malformed(format!("cell after column {} in row {}", MAX_COLUMN + 1, self.row + 1)))
            }
            None => CellAddress::new(self.row, self.next_col),
        };
        if address.row != self.row {
            let issue = CellIssue::InvariantViolation {
                address,
                message: format!("cell sits in row {} but was written in row {}", address.row + 1, self.row + 1),
            };
            self.report(issue, sink);
        }

        let type_attr = tag.attr("t");
        let value_type = CellValueType::from_attr(type_attr);
        self.cell.reset(address, value_type);
        self.cell.string_result = type_attr == Some("str");
        self.capture = Capture::None;
        self.phonetic_depth = 0;
        self.state = SheetState::InCell;

        // only untyped (numeric) and formula cells go through a number format
        if matches!(value_type, CellValueType::Number | CellValueType::FormulaCachedOrSource) {
            self.cell.format = self.lookup_format(address, tag.attr("s"), sink);
        }
        Ok(())
    }

    fn lookup_format<S: SheetEventSink + ?Sized>(
        &mut self,
        address: CellAddress,
        style: Option<&str>,
        sink: &mut S,
    ) -> Option<NumberFormat<'a>> {
        let tables: &'a WorkbookTables = self.tables;
        let style_index = match style.map(str::parse::<u32>) {
            None => None,
            Some(Ok(index)) => Some(index),
            Some(Err(_)) => {
                let issue = CellIssue::UnresolvedReference {
                    address,
                    kind: ReferenceKind::Style,
                    raw: style.unwrap_or_default().to_string(),
                };
                self.report(issue, sink);
                return None;
            }
        };

        match tables.number_formats.format_for(style_index) {
            Ok(format) => format,
            Err(_) => {
                let issue = CellIssue::UnresolvedReference {
                    address,
                    kind: ReferenceKind::Style,
                    raw: style.unwrap_or_default().to_string(),
                };
                self.report(issue, sink);
                None
            }
        }
    }

    fn start_formula(&mut self, tag: &StartTag<'_>) {
        self.cell.formula.clear();
        if self.cell.value_type == CellValueType::Number {
            self.cell.value_type = CellValueType::FormulaCachedOrSource;
        }

        if tag.attr("t") == Some("shared") && tag.attr("ref").is_none() {
            // dependent of a shared formula: no text of its own
            if self.formulas_not_results {
                log::debug!(
                    "{}: shared formula (si={}) has no text here, using cached result",
                    self.cell.address,
                    tag.attr("si").unwrap_or("?")
                );
            }
            return;
        }
        self.capture = Capture::Formula;
    }

    fn end_cell<S: SheetEventSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        if self.state != SheetState::InCell {
            return Err(self.malformed("</c> without an open cell"));
        }
        self.capture = Capture::None;

        let (value, issue) = self.resolve_value();
        if let Some(issue) = issue {
            self.report(issue, sink);
        }

        let address = self.cell.address;
        let cells = &mut self.summary.cells;
        let matched = self.comments.on_cell(address, |empty, comment| {
            sink.cell(empty, None, Some(comment));
            *cells += 1;
        });
        if matched.out_of_order {
            let issue = CellIssue::InvariantViolation {
                address,
                message: "cell is out of row-major order; its comment may have been emitted earlier"
                    .to_string(),
            };
            self.report(issue, sink);
        }

        sink.cell(address, value.as_deref(), matched.comment);
        self.summary.cells += 1;
        self.next_col = address.col + 1;
        self.state = SheetState::InRow;
        Ok(())
    }

    fn end_row<S: SheetEventSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        match self.state {
            SheetState::InRow => {}
            SheetState::InCell => return Err(self.malformed("</row> inside an open cell")),
            _ => return Err(self.malformed("</row> without an open row")),
        }

        let row = self.row;
        let cells = &mut self.summary.cells;
        self.comments.on_row_end(row, |empty, comment| {
            sink.cell(empty, None, Some(comment));
            *cells += 1;
        });

        sink.end_row(row);
        log::trace!("row {} end", row);
        self.next_row = row + 1;
        self.state = SheetState::Idle;
        Ok(())
    }

    fn end_sheet_data<S: SheetEventSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        match self.state {
            SheetState::Idle => {}
            SheetState::InRow | SheetState::InCell => {
                return Err(self.malformed("</sheetData> inside an open row"))
            }
            SheetState::SheetEnded => return Err(self.malformed("</sheetData> seen twice")),
        }

        let cells = &mut self.summary.cells;
        self.comments.on_sheet_end(|empty, comment| {
            sink.cell(empty, None, Some(comment));
            *cells += 1;
        });

        sink.end_sheet();
        self.state = SheetState::SheetEnded;
        log::debug!(
            "sheet done: {} rows, {} cells, {} issues",
            self.summary.rows,
            self.summary.cells,
            self.summary.issues.len()
        );
        Ok(())
    }

    /// Turn the accumulated payload into display text
    fn resolve_value(&self) -> (Option<String>, Option<CellIssue>) {
        let cell = &self.cell;
        let raw = cell.value.as_str();

        match cell.value_type {
            CellValueType::Boolean => {
                if !cell.has_value || raw.is_empty() {
                    return (cell.has_value.then(String::new), None);
                }
                let text = if raw.starts_with('0') { FALSE_LITERAL } else { TRUE_LITERAL };
                (Some(text.to_string()), None)
            }
            CellValueType::Error => (cell.has_value.then(|| format!("{}{}", ERROR_PREFIX, raw)), None),
            CellValueType::InlineString => (cell.has_value.then(|| raw.to_string()), None),
            CellValueType::SharedString => {
                if !cell.has_value {
                    return (None, None);
                }
                let index = raw.trim().parse::<usize>().ok();
                match index.map(|i| self.tables.shared_strings.get(i)) {
                    Some(Ok(text)) => (Some(text.to_string()), None),
                    _ => (
                        None,
                        Some(CellIssue::UnresolvedReference {
                            address: cell.address,
                            kind: ReferenceKind::SharedString,
                            raw: raw.to_string(),
                        }),
                    ),
                }
            }
            CellValueType::FormulaCachedOrSource => {
                if self.formulas_not_results && cell.has_formula {
                    return (Some(cell.formula.clone()), None);
                }
                if !cell.has_value {
                    return (None, None);
                }
                if cell.string_result {
                    return (Some(raw.to_string()), None);
                }
                self.format_number(raw)
            }
            CellValueType::Number => {
                if !cell.has_value {
                    return (None, None);
                }
                if raw.is_empty() {
                    return (Some(String::new()), None);
                }
                self.format_number(raw)
            }
        }
    }

    fn format_number(&self, raw: &str) -> (Option<String>, Option<CellIssue>) {
        let Some(format) = self.cell.format else {
            return (Some(raw.to_string()), None);
        };
        match raw.trim().parse::<f64>() {
            Ok(number) => (Some(self.formatter.format_raw(number, format)), None),
            Err(_) => (
                Some(raw.to_string()),
                Some(CellIssue::UnparsableNumericPayload {
                    address: self.cell.address,
                    raw: raw.to_string(),
                }),
            ),
        }
    }
}

/// Decode one worksheet XML stream into `sink`
///
/// # Example
///
/// ```
/// use sheetstream::sink::EventRecorder;
/// use sheetstream::{decode_sheet, DecoderOptions, SharedStringTable, WorkbookTables};
///
/// let xml = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
///   <sheetData><row r="1"><c r="A1" t="s"><v>0</v></c></row></sheetData>
/// </worksheet>"#;
///
/// let tables = WorkbookTables::new(SharedStringTable::from_strings(["Alice"]), Default::default());
/// let mut sink = EventRecorder::new();
/// let summary = decode_sheet(xml.as_bytes(), &tables, None, DecoderOptions::default(), &mut sink)?;
///
/// assert_eq!(summary.cells, 1);
/// assert_eq!(sink.cells().next().unwrap().value.as_deref(), Some("Alice"));
/// # Ok::<(), sheetstream::DecodeError>(())
/// ```
pub fn decode_sheet<R, S>(
    reader: R,
    tables: &WorkbookTables,
    comments: Option<&CommentIndex>,
    options: DecoderOptions,
    sink: &mut S,
) -> Result<SheetSummary>
where
    R: BufRead,
    S: SheetEventSink + ?Sized,
{
    let mut decoder = SheetDecoder::new(tables, comments, options);
    let mut tokens = SheetReader::new(reader);
    tokens.for_each_token(|token, position| {
        decoder.feed_at(token, position, sink)?;
        Ok(ControlFlow::Continue(()))
    })?;
    decoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comments::Comment;
    use crate::shared_strings::SharedStringTable;
    use crate::sink::{EventRecorder, SheetEvent};
    use crate::styles::NumberFormatTable;
    use pretty_assertions::assert_eq;

    fn addr(s: &str) -> CellAddress {
        CellAddress::parse(s).unwrap()
    }

    fn c<'t>(r: &'t str) -> StartTag<'t> {
        StartTag::new("c").with_attr("r", r)
    }

    fn row(r: &str) -> Token<'_> {
        Token::Start(StartTag::new("row").with_attr("r", r))
    }

    /// `<c ...><v>payload</v></c>`
    fn cell_tokens<'t>(tag: StartTag<'t>, payload: &'t str) -> Vec<Token<'t>> {
        vec![
            Token::Start(tag),
            Token::Start(StartTag::new("v")),
            Token::Text(payload.into()),
            Token::End("v"),
            Token::End("c"),
        ]
    }

    fn run(
        tables: &WorkbookTables,
        comments: Option<&CommentIndex>,
        options: DecoderOptions,
        tokens: Vec<Token<'_>>,
    ) -> (EventRecorder, SheetSummary) {
        let mut decoder = SheetDecoder::new(tables, comments, options);
        let mut sink = EventRecorder::new();
        decoder.feed(Token::Start(StartTag::new("sheetData")), &mut sink).unwrap();
        for token in tokens {
            decoder.feed(token, &mut sink).unwrap();
        }
        decoder.feed(Token::End("sheetData"), &mut sink).unwrap();
        let summary = decoder.finish().unwrap();
        (sink, summary)
    }

    fn single_cell(tables: &WorkbookTables, options: DecoderOptions, tokens: Vec<Token<'_>>) -> Option<String> {
        let mut all = vec![row("1")];
        all.extend(tokens);
        all.push(Token::End("row"));
        let (sink, _) = run(tables, None, options, all);
        let value = sink.cells().next().and_then(|c| c.value.clone());
        value
    }

    #[test]
    fn test_boolean_literals() {
        let tables = WorkbookTables::default();
        let t = |p| single_cell(&tables, DecoderOptions::default(), cell_tokens(c("A1").with_attr("t", "b"), p));
        assert_eq!(t("0").as_deref(), Some(FALSE_LITERAL));
        assert_eq!(t("1").as_deref(), Some(TRUE_LITERAL));
        assert_eq!(t("7").as_deref(), Some(TRUE_LITERAL));
    }

    #[test]
    fn test_error_prefix() {
        let tables = WorkbookTables::default();
        let v = single_cell(&tables, DecoderOptions::default(), cell_tokens(c("A1").with_attr("t", "e"), "#DIV/0!"));
        assert_eq!(v.as_deref(), Some("ERROR:#DIV/0!"));
    }

    #[test]
    fn test_shared_string_lookup() {
        let tables = WorkbookTables::new(
            SharedStringTable::from_strings(["A", "B", "C", "D", "E"]),
            NumberFormatTable::new(),
        );
        let v = single_cell(&tables, DecoderOptions::default(), cell_tokens(c("A1").with_attr("t", "s"), "3"));
        assert_eq!(v.as_deref(), Some("D"));
    }

    #[test]
    fn test_shared_string_missing_index_is_reported() {
        let tables = WorkbookTables::new(SharedStringTable::from_strings(["A"]), NumberFormatTable::new());
        let mut tokens = vec![row("1")];
        tokens.extend(cell_tokens(c("A1").with_attr("t", "s"), "9"));
        tokens.extend(cell_tokens(c("B1").with_attr("t", "s"), "0"));
        tokens.push(Token::End("row"));
        let (sink, summary) = run(&tables, None, DecoderOptions::default(), tokens);

        let cells: Vec<_> = sink.cells().cloned().collect();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].value, None);
        assert_eq!(cells[1].value.as_deref(), Some("A"));
        assert_eq!(
            summary.issues,
            vec![CellIssue::UnresolvedReference {
                address: addr("A1"),
                kind: ReferenceKind::SharedString,
                raw: "9".to_string(),
            }]
        );
        assert_eq!(sink.issues, summary.issues);
    }

    #[test]
    fn test_number_without_format_is_verbatim() {
        let tables = WorkbookTables::default();
        let v = single_cell(&tables, DecoderOptions::default(), cell_tokens(c("A1"), "1234.5"));
        assert_eq!(v.as_deref(), Some("1234.5"));

        let v = single_cell(&tables, DecoderOptions::default(), cell_tokens(c("A1"), ""));
        assert_eq!(v.as_deref(), Some(""));
    }

    #[test]
    fn test_number_with_style_format() {
        let formats = NumberFormatTable::new().with_cell_style(0).with_cell_style(14).with_cell_style(4);
        let tables = WorkbookTables::new(SharedStringTable::new(), formats);
        let opts = DecoderOptions::default();

        let date = single_cell(&tables, opts, cell_tokens(c("A1").with_attr("s", "1"), "45292"));
        assert_eq!(date.as_deref(), Some("1/1/24"));

        let grouped = single_cell(&tables, opts, cell_tokens(c("A1").with_attr("s", "2"), "1234.5"));
        assert_eq!(grouped.as_deref(), Some("1,234.50"));

        // unstyled cell falls back to style 0 (General)
        let general = single_cell(&tables, opts, cell_tokens(c("A1"), "0.30000000000000004"));
        assert_eq!(general.as_deref(), Some("0.3"));
    }

    #[test]
    fn test_unknown_style_keeps_raw_payload() {
        let tables = WorkbookTables::new(SharedStringTable::new(), NumberFormatTable::new().with_cell_style(0));
        let mut tokens = vec![row("1")];
        tokens.extend(cell_tokens(c("A1").with_attr("s", "5"), "12.50"));
        tokens.push(Token::End("row"));
        let (sink, summary) = run(&tables, None, DecoderOptions::default(), tokens);
        assert_eq!(sink.cells().next().unwrap().value.as_deref(), Some("12.50"));
        assert!(matches!(
            summary.issues[0],
            CellIssue::UnresolvedReference { kind: ReferenceKind::Style, .. }
        ));
    }

    #[test]
    fn test_issues_visible_while_decoding() {
        let tables = WorkbookTables::new(SharedStringTable::from_strings(["A"]), NumberFormatTable::new());
        let mut sink = EventRecorder::new();
        let mut decoder = SheetDecoder::new(&tables, None, DecoderOptions::default());
        decoder.feed(Token::Start(StartTag::new("sheetData")), &mut sink).unwrap();
        decoder.feed(row("1"), &mut sink).unwrap();
        for token in cell_tokens(c("A1").with_attr("t", "s"), "0") {
            decoder.feed(token, &mut sink).unwrap();
        }
        assert!(decoder.issues().is_empty());
        for token in cell_tokens(c("B1").with_attr("t", "s"), "x") {
            decoder.feed(token, &mut sink).unwrap();
        }
        assert_eq!(decoder.issues().len(), 1);
        assert_eq!(decoder.issues()[0].address(), addr("B1"));
    }

    #[test]
    fn test_unparsable_number_falls_back_to_text() {
        let tables = WorkbookTables::new(SharedStringTable::new(), NumberFormatTable::new().with_cell_style(2));
        let mut tokens = vec![row("1")];
        tokens.extend(cell_tokens(c("A1"), "n/a"));
        tokens.push(Token::End("row"));
        let (sink, summary) = run(&tables, None, DecoderOptions::default(), tokens);
        assert_eq!(sink.cells().next().unwrap().value.as_deref(), Some("n/a"));
        assert_eq!(
            summary.issues,
            vec![CellIssue::UnparsableNumericPayload {
                address: addr("A1"),
                raw: "n/a".to_string()
            }]
        );
    }

    fn formula_cell<'t>(tag: StartTag<'t>, f: StartTag<'t>, text: &'t str, cached: &'t str) -> Vec<Token<'t>> {
        vec![
            Token::Start(tag),
            Token::Start(f),
            Token::Text(text.into()),
            Token::End("f"),
            Token::Start(StartTag::new("v")),
            Token::Text(cached.into()),
            Token::End("v"),
            Token::End("c"),
        ]
    }

    #[test]
    fn test_formula_result_or_source() {
        let tables = WorkbookTables::new(SharedStringTable::new(), NumberFormatTable::new().with_cell_style(2));
        let tokens = || formula_cell(c("C1"), StartTag::new("f"), "SUM(A1:B1)", "3");

        let cached = single_cell(&tables, DecoderOptions::default(), tokens());
        assert_eq!(cached.as_deref(), Some("3.00"));

        let source = single_cell(&tables, DecoderOptions::new().with_formulas_not_results(true), tokens());
        assert_eq!(source.as_deref(), Some("SUM(A1:B1)"));
    }

    #[test]
    fn test_string_formula_result_is_not_an_issue() {
        let tables = WorkbookTables::default();
        let mut tokens = vec![row("1")];
        tokens.extend(formula_cell(c("A1").with_attr("t", "str"), StartTag::new("f"), "A2&\"x\"", "hello"));
        tokens.push(Token::End("row"));
        let (sink, summary) = run(&tables, None, DecoderOptions::default(), tokens);
        assert_eq!(sink.cells().next().unwrap().value.as_deref(), Some("hello"));
        assert!(summary.issues.is_empty());
    }

    #[test]
    fn test_shared_formula_dependent_uses_cached_result() {
        let tables = WorkbookTables::default();
        let opts = DecoderOptions::new().with_formulas_not_results(true);
        let master = StartTag::new("f").with_attr("t", "shared").with_attr("ref", "B1:B2").with_attr("si", "0");
        let dependent = StartTag::new("f").with_attr("t", "shared").with_attr("si", "0");

        let mut tokens = vec![row("1")];
        tokens.extend(formula_cell(c("B1"), master, "A1*2", "2"));
        tokens.push(Token::End("row"));
        tokens.push(row("2"));
        tokens.extend(vec![
            Token::Start(c("B2")),
            Token::Start(dependent),
            Token::End("f"),
            Token::Start(StartTag::new("v")),
            Token::Text("4".into()),
            Token::End("v"),
            Token::End("c"),
        ]);
        tokens.push(Token::End("row"));

        let (sink, _) = run(&tables, None, opts, tokens);
        let values: Vec<_> = sink.cells().map(|c| c.value.clone().unwrap()).collect();
        assert_eq!(values, vec!["A1*2", "4"]);
    }

    #[test]
    fn test_inline_string_runs_are_concatenated() {
        let tables = WorkbookTables::default();
        let tokens = vec![
            Token::Start(c("A1").with_attr("t", "inlineStr")),
            Token::Start(StartTag::new("is")),
            Token::Start(StartTag::new("r")),
            Token::Start(StartTag::new("t")),
            Token::Text("Hello".into()),
            Token::Text(", ".into()),
            Token::End("t"),
            Token::End("r"),
            Token::Start(StartTag::new("r")),
            Token::Start(StartTag::new("t")),
            Token::Text("world".into()),
            Token::End("t"),
            Token::End("r"),
            Token::Start(StartTag::new("rPh")),
            Token::Start(StartTag::new("t")),
            Token::Text("ignored".into()),
            Token::End("t"),
            Token::End("rPh"),
            Token::End("is"),
            Token::End("c"),
        ];
        let v = single_cell(&tables, DecoderOptions::default(), tokens);
        assert_eq!(v.as_deref(), Some("Hello, world"));
    }

    #[test]
    fn test_value_fragments_are_concatenated() {
        let tables = WorkbookTables::default();
        let tokens = vec![
            Token::Start(c("A1")),
            Token::Start(StartTag::new("v")),
            Token::Text("12".into()),
            Token::Text("34".into()),
            Token::End("v"),
            Token::End("c"),
        ];
        assert_eq!(single_cell(&tables, DecoderOptions::default(), tokens).as_deref(), Some("1234"));
    }

    #[test]
    fn test_missing_addresses_are_synthesized() {
        let tables = WorkbookTables::default();
        let mut tokens = vec![Token::Start(StartTag::new("row"))];
        tokens.extend(cell_tokens(c("B1"), "1"));
        tokens.extend(cell_tokens(StartTag::new("c"), "2"));
        tokens.push(Token::End("row"));
        tokens.push(Token::Start(StartTag::new("row")));
        tokens.extend(cell_tokens(StartTag::new("c"), "3"));
        tokens.push(Token::End("row"));

        let (sink, summary) = run(&tables, None, DecoderOptions::default(), tokens);
        assert_eq!(
            sink.events,
            vec![
                SheetEvent::StartRow(0),
                SheetEvent::cell(addr("B1"), Some("1"), None),
                SheetEvent::cell(addr("C1"), Some("2"), None),
                SheetEvent::EndRow(0),
                SheetEvent::StartRow(1),
                SheetEvent::cell(addr("A2"), Some("3"), None),
                SheetEvent::EndRow(1),
                SheetEvent::EndSheet,
            ]
        );
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.cells, 3);
    }

    #[test]
    fn test_empty_cell_has_no_value() {
        let tables = WorkbookTables::default();
        let tokens = vec![Token::Start(c("A1").with_attr("s", "0")), Token::End("c")];
        assert_eq!(single_cell(&tables, DecoderOptions::default(), tokens), None);
    }

    #[test]
    fn test_comment_checkpoints() {
        let tables = WorkbookTables::new(SharedStringTable::from_strings(["Alice"]), NumberFormatTable::new());
        let comments: CommentIndex = [
            (addr("A2"), Comment::new("on empty A2")),
            (addr("C2"), Comment::new("on C2")),
            (addr("E2"), Comment::new("on empty E2")),
            (addr("B5"), Comment::new("row never written")),
        ]
        .into_iter()
        .collect();

        let mut tokens = vec![row("2")];
        tokens.extend(cell_tokens(c("C2").with_attr("t", "s"), "0"));
        tokens.push(Token::End("row"));
        let (sink, summary) = run(&tables, Some(&comments), DecoderOptions::default(), tokens);

        assert_eq!(
            sink.events,
            vec![
                SheetEvent::StartRow(1),
                SheetEvent::cell(addr("A2"), None, Some("on empty A2")),
                SheetEvent::cell(addr("C2"), Some("Alice"), Some("on C2")),
                SheetEvent::cell(addr("E2"), None, Some("on empty E2")),
                SheetEvent::EndRow(1),
                SheetEvent::cell(addr("B5"), None, Some("row never written")),
                SheetEvent::EndSheet,
            ]
        );
        assert_eq!(summary.cells, 4);
        assert!(summary.issues.is_empty());
    }

    #[test]
    fn test_comment_on_skipped_row_flushes_at_next_row_end() {
        let tables = WorkbookTables::default();
        let comments: CommentIndex = [(addr("B2"), Comment::new("gap"))].into_iter().collect();
        let mut tokens = vec![row("1"), Token::End("row"), row("3")];
        tokens.extend(cell_tokens(c("A3"), "1"));
        tokens.push(Token::End("row"));
        let (sink, _) = run(&tables, Some(&comments), DecoderOptions::default(), tokens);

        // B2 precedes A3 in row-major order, so it is flushed before A3
        assert_eq!(
            sink.events,
            vec![
                SheetEvent::StartRow(0),
                SheetEvent::EndRow(0),
                SheetEvent::StartRow(2),
                SheetEvent::cell(addr("B2"), None, Some("gap")),
                SheetEvent::cell(addr("A3"), Some("1"), None),
                SheetEvent::EndRow(2),
                SheetEvent::EndSheet,
            ]
        );
    }

    #[test]
    fn test_out_of_order_rows_are_reported_not_fatal() {
        let tables = WorkbookTables::default();
        let mut tokens = vec![row("3")];
        tokens.extend(cell_tokens(c("A3"), "1"));
        tokens.push(Token::End("row"));
        tokens.push(row("2"));
        tokens.extend(cell_tokens(c("A2"), "2"));
        tokens.push(Token::End("row"));
        let (sink, summary) = run(&tables, None, DecoderOptions::default(), tokens);

        assert_eq!(sink.cells().count(), 2);
        assert!(summary
            .issues
            .iter()
            .all(|i| matches!(i, CellIssue::InvariantViolation { .. })));
        assert!(!summary.issues.is_empty());
    }

    #[test]
    fn test_malformed_nesting_is_fatal() {
        let tables = WorkbookTables::default();
        let mut sink = EventRecorder::new();

        let mut decoder = SheetDecoder::new(&tables, None, DecoderOptions::default());
        let err = decoder.feed(Token::Start(c("A1")), &mut sink).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedMarkup { .. }));

        let mut decoder = SheetDecoder::new(&tables, None, DecoderOptions::default());
        decoder.feed(row("1"), &mut sink).unwrap();
        assert!(decoder.feed(row("2"), &mut sink).is_err());

        let mut decoder = SheetDecoder::new(&tables, None, DecoderOptions::default());
        assert!(decoder.feed(Token::End("row"), &mut sink).is_err());

        let mut decoder = SheetDecoder::new(&tables, None, DecoderOptions::default());
        decoder.feed(row("1"), &mut sink).unwrap();
        assert!(decoder.feed(Token::End("sheetData"), &mut sink).is_err());

        let mut decoder = SheetDecoder::new(&tables, None, DecoderOptions::default());
        assert!(decoder.feed(row("0"), &mut sink).is_err());
    }

    #[test]
    fn test_rows_beyond_sheet_limit_are_fatal() {
        let tables = WorkbookTables::default();
        let mut sink = EventRecorder::new();

        let mut decoder = SheetDecoder::new(&tables, None, DecoderOptions::default());
        let err = decoder.feed(row("2000000"), &mut sink).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedMarkup { .. }));

        // the last sheet row is fine, an implicit row after it is not
        let mut decoder = SheetDecoder::new(&tables, None, DecoderOptions::default());
        decoder.feed(row("1048576"), &mut sink).unwrap();
        decoder.feed(Token::End("row"), &mut sink).unwrap();
        assert!(decoder.feed(Token::Start(StartTag::new("row")), &mut sink).is_err());
    }

    #[test]
    fn test_implicit_cell_beyond_last_column_is_fatal() {
        let tables = WorkbookTables::default();
        let mut sink = EventRecorder::new();
        let mut decoder = SheetDecoder::new(&tables, None, DecoderOptions::default());
        decoder.feed(row("1"), &mut sink).unwrap();
        decoder.feed(Token::Start(c("XFD1")), &mut sink).unwrap();
        decoder.feed(Token::End("c"), &mut sink).unwrap();

        let err = decoder.feed(Token::Start(StartTag::new("c")), &mut sink).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedMarkup { .. }));
        let last = sink.cells().last().unwrap().address;
        assert_eq!(CellAddress::parse(&last.reference()).unwrap(), last);
    }

    #[test]
    fn test_no_events_after_sheet_end() {
        let tables = WorkbookTables::default();
        let mut sink = EventRecorder::new();
        let mut decoder = SheetDecoder::new(&tables, None, DecoderOptions::default());
        decoder.feed(Token::Start(StartTag::new("sheetData")), &mut sink).unwrap();
        decoder.feed(Token::End("sheetData"), &mut sink).unwrap();
        assert!(decoder.is_finished());
        assert!(decoder.feed(row("1"), &mut sink).is_err());
        assert_eq!(sink.events, vec![SheetEvent::EndSheet]);
    }

    #[test]
    fn test_finish_requires_closed_sheet() {
        let tables = WorkbookTables::default();
        let decoder = SheetDecoder::new(&tables, None, DecoderOptions::default());
        assert!(decoder.finish().is_err());
    }

    #[test]
    fn test_header_footer_collected_after_sheet() {
        let tables = WorkbookTables::default();
        let mut sink = EventRecorder::new();
        let mut decoder = SheetDecoder::new(&tables, None, DecoderOptions::default());
        for token in [
            Token::Start(StartTag::new("sheetData")),
            Token::End("sheetData"),
            Token::Start(StartTag::new("headerFooter")),
            Token::Start(StartTag::new("oddHeader")),
            Token::Text("&CQuarterly".into()),
            Token::End("oddHeader"),
            Token::Start(StartTag::new("oddFooter")),
            Token::Text("Page &P".into()),
            Token::End("oddFooter"),
            Token::End("headerFooter"),
        ] {
            decoder.feed(token, &mut sink).unwrap();
        }
        let summary = decoder.finish().unwrap();
        assert_eq!(sink.events, vec![SheetEvent::EndSheet]);
        assert_eq!(
            summary.header_footers,
            vec![
                HeaderFooter {
                    kind: "oddHeader".to_string(),
                    is_header: true,
                    text: "&CQuarterly".to_string()
                },
                HeaderFooter {
                    kind: "oddFooter".to_string(),
                    is_header: false,
                    text: "Page &P".to_string()
                },
            ]
        );
    }
}
