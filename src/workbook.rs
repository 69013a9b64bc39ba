//! Workbook-level tables and multi-sheet decoding
//!
//! The shared-string pool and the style table are loaded once and borrowed by
//! every sheet decoder. Sheets are independent: they can be decoded one after
//! another with [`decode_sheets`], or concurrently with `decode_sheets_parallel`
//! when the `parallel` feature is enabled.

use crate::comments::CommentIndex;
use crate::decoder::{decode_sheet, DecoderOptions, SheetSummary};
use crate::error::Result;
use crate::shared_strings::SharedStringTable;
use crate::sink::SheetEventSink;
use crate::styles::NumberFormatTable;
use std::io::BufRead;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Read-only lookup tables shared by all sheets of a workbook
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkbookTables {
    /// `xl/sharedStrings.xml`
    pub shared_strings: SharedStringTable,
    /// `xl/styles.xml`
    pub number_formats: NumberFormatTable,
}

impl WorkbookTables {
    pub fn new(shared_strings: SharedStringTable, number_formats: NumberFormatTable) -> Self {
        WorkbookTables {
            shared_strings,
            number_formats,
        }
    }

    /// Load both tables from their parts; a missing part gives an empty table
    pub fn from_parts<S, T>(shared_strings: Option<S>, styles: Option<T>) -> Result<Self>
    where
        S: BufRead,
        T: BufRead,
    {
        let shared_strings = match shared_strings {
            Some(reader) => SharedStringTable::from_reader(reader)?,
            None => SharedStringTable::new(),
        };
        let number_formats = match styles {
            Some(reader) => NumberFormatTable::from_reader(reader)?,
            None => NumberFormatTable::new(),
        };
        Ok(Self::new(shared_strings, number_formats))
    }
}

/// One worksheet waiting to be decoded
#[derive(Debug, Clone)]
pub struct SheetJob {
    /// Sheet name, carried through to the result
    pub name: String,
    /// Worksheet XML
    pub xml: Vec<u8>,
    /// Comments of this sheet, if it has a comments part
    pub comments: Option<CommentIndex>,
}

impl SheetJob {
    pub fn new(name: impl Into<String>, xml: impl Into<Vec<u8>>) -> Self {
        SheetJob {
            name: name.into(),
            xml: xml.into(),
            comments: None,
        }
    }

    /// Attach the sheet's comments (builder style)
    pub fn with_comments(mut self, comments: CommentIndex) -> Self {
        self.comments = Some(comments);
        self
    }

    fn decode<S: SheetEventSink>(
        &self,
        tables: &WorkbookTables,
        options: DecoderOptions,
        mut sink: S,
    ) -> Result<DecodedSheet<S>> {
        log::debug!("decoding sheet '{}' ({} bytes)", self.name, self.xml.len());
        let summary = decode_sheet(
            self.xml.as_slice(),
            tables,
            self.comments.as_ref(),
            options,
            &mut sink,
        )?;
        Ok(DecodedSheet {
            name: self.name.clone(),
            sink,
            summary,
        })
    }
}

/// A finished sheet: its sink (holding whatever it built) and its summary
#[derive(Debug)]
pub struct DecodedSheet<S> {
    pub name: String,
    pub sink: S,
    pub summary: SheetSummary,
}

/// Decode sheets one after another, each into a fresh sink
///
/// A failing sheet does not stop the others; results keep job order.
pub fn decode_sheets<S, F>(
    tables: &WorkbookTables,
    jobs: &[SheetJob],
    options: DecoderOptions,
    mut make_sink: F,
) -> Vec<Result<DecodedSheet<S>>>
where
    S: SheetEventSink,
    F: FnMut(&SheetJob) -> S,
{
    jobs.iter()
        .map(|job| job.decode(tables, options, make_sink(job)))
        .collect()
}

/// Decode sheets concurrently, each into a fresh sink
///
/// Only the order of events within one sheet is defined; results keep job
/// order.
#[cfg(feature = "parallel")]
pub fn decode_sheets_parallel<S, F>(
    tables: &WorkbookTables,
    jobs: &[SheetJob],
    options: DecoderOptions,
    make_sink: F,
) -> Vec<Result<DecodedSheet<S>>>
where
    S: SheetEventSink + Send,
    F: Fn(&SheetJob) -> S + Sync,
{
    jobs.par_iter()
        .map(|job| job.decode(tables, options, make_sink(job)))
        .collect()
}
