//! # sheetstream
//!
//! A streaming decoder for SpreadsheetML (XLSX) worksheets.
//!
//! ## Features
//!
//! - **Streaming**: One pass over the worksheet XML, one cell of state at a time
//! - **Typed Cells**: Booleans, errors, inline and shared strings, numbers and formulas
//! - **Number Formats**: Style-driven display text (fixed, percent, scientific, dates)
//! - **Comments**: Comments merged into the cell stream, including on empty cells
//! - **Push Events**: Rows and cells delivered to any [`SheetEventSink`]
//! - **Parallel Sheets**: Decode independent sheets concurrently (`parallel` feature)
//!
//! ## Quick Start
//!
//! ```rust
//! use sheetstream::{decode_sheet, CellAddress, Comment, DecoderOptions, WorkbookTables};
//! use sheetstream::{NumberFormatTable, SharedStringTable, SheetEventSink};
//!
//! struct Csv(String);
//!
//! impl SheetEventSink for Csv {
//!     fn start_row(&mut self, _row: u32) {}
//!     fn cell(&mut self, address: CellAddress, value: Option<&str>, _comment: Option<&Comment>) {
//!         if address.col > 0 {
//!             self.0.push(',');
//!         }
//!         self.0.push_str(value.unwrap_or(""));
//!     }
//!     fn end_row(&mut self, _row: u32) {
//!         self.0.push('\n');
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sheet = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
//!   <sheetData>
//!     <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" s="1"><v>0.125</v></c></row>
//!   </sheetData>
//! </worksheet>"#;
//!
//! let tables = WorkbookTables::new(
//!     SharedStringTable::from_strings(["ratio"]),
//!     NumberFormatTable::new().with_cell_style(0).with_cell_style(10),
//! );
//!
//! let mut csv = Csv(String::new());
//! let summary = decode_sheet(sheet.as_bytes(), &tables, None, DecoderOptions::default(), &mut csv)?;
//!
//! assert_eq!(csv.0, "ratio,12.50%\n");
//! assert!(summary.issues.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod comments;
pub mod decoder;
pub mod error;
pub mod format;
pub mod markup;
pub mod shared_strings;
pub mod sink;
pub mod styles;
pub mod types;
pub mod workbook;

pub use comments::{Comment, CommentIndex, CommentReconciler};
pub use decoder::{decode_sheet, DecoderOptions, HeaderFooter, SheetDecoder, SheetSummary};
pub use error::{CellIssue, DecodeError, LookupError, ReferenceKind, Result};
pub use format::{DataFormatter, FormatOptions};
pub use shared_strings::SharedStringTable;
pub use sink::{EventRecorder, SheetEvent, SheetEventSink};
pub use styles::{NumberFormat, NumberFormatTable};
pub use types::{CellAddress, CellValueType, ResolvedCell};
pub use workbook::{decode_sheets, DecodedSheet, SheetJob, WorkbookTables};

#[cfg(feature = "parallel")]
pub use workbook::decode_sheets_parallel;
