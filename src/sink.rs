//! Receiver side of the decoder
//!
//! The decoder pushes events; a sink never pulls. CSV rendering, width
//! analysis and similar consumers live behind [`SheetEventSink`].

use crate::comments::Comment;
use crate::error::CellIssue;
use crate::types::{CellAddress, ResolvedCell};

/// Receives the ordered events of one sheet
///
/// Within a sheet the order is always: `start_row`, the row's cells in
/// address order, `end_row`, ..., then `end_sheet` exactly once.
pub trait SheetEventSink {
    /// A row starts (0-based index)
    fn start_row(&mut self, row: u32);

    /// A cell, written or synthesized for a comment on an empty cell
    ///
    /// `value` is `None` when the cell carried no value.
    fn cell(&mut self, address: CellAddress, value: Option<&str>, comment: Option<&Comment>);

    /// The row `row` ended
    fn end_row(&mut self, row: u32);

    /// Sheet data ended; no more events follow
    fn end_sheet(&mut self) {}

    /// A recoverable problem was found while decoding a cell
    fn issue(&mut self, issue: &CellIssue) {
        let _ = issue;
    }
}

impl<S: SheetEventSink + ?Sized> SheetEventSink for &mut S {
    fn start_row(&mut self, row: u32) {
        (**self).start_row(row)
    }

    fn cell(&mut self, address: CellAddress, value: Option<&str>, comment: Option<&Comment>) {
        (**self).cell(address, value, comment)
    }

    fn end_row(&mut self, row: u32) {
        (**self).end_row(row)
    }

    fn end_sheet(&mut self) {
        (**self).end_sheet()
    }

    fn issue(&mut self, issue: &CellIssue) {
        (**self).issue(issue)
    }
}

/// One event as delivered to a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetEvent {
    StartRow(u32),
    Cell(ResolvedCell),
    EndRow(u32),
    EndSheet,
}

impl SheetEvent {
    /// Shorthand for a cell event
    pub fn cell(address: CellAddress, value: Option<&str>, comment: Option<&str>) -> Self {
        SheetEvent::Cell(ResolvedCell::new(
            address,
            value.map(str::to_string),
            comment.map(str::to_string),
        ))
    }
}

/// Sink that keeps every event and issue in memory
///
/// Meant for tests and small sheets; it defeats streaming for large ones.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventRecorder {
    pub events: Vec<SheetEvent>,
    pub issues: Vec<CellIssue>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded cells only
    pub fn cells(&self) -> impl Iterator<Item = &ResolvedCell> {
        self.events.iter().filter_map(|e| match e {
            SheetEvent::Cell(cell) => Some(cell),
            _ => None,
        })
    }
}

impl SheetEventSink for EventRecorder {
    fn start_row(&mut self, row: u32) {
        self.events.push(SheetEvent::StartRow(row));
    }

    fn cell(&mut self, address: CellAddress, value: Option<&str>, comment: Option<&Comment>) {
        self.events.push(SheetEvent::cell(
            address,
            value,
            comment.map(|c| c.text.as_str()),
        ));
    }

    fn end_row(&mut self, row: u32) {
        self.events.push(SheetEvent::EndRow(row));
    }

    fn end_sheet(&mut self) {
        self.events.push(SheetEvent::EndSheet);
    }

    fn issue(&mut self, issue: &CellIssue) {
        self.issues.push(issue.clone());
    }
}
