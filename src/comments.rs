//! Cell comments and their reconciliation with the cell stream
//!
//! Comments live in their own part (`xl/commentsN.xml`), keyed by address
//! and independent of sheet data. A comment on a cell that was never written
//! (no `<c>` element) still has to reach the sink, in address order, so the
//! decoder walks the comment addresses alongside the rows with a
//! [`CommentReconciler`].

use crate::error::{DecodeError, Result};
use crate::types::CellAddress;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::iter::Peekable;

/// A cell comment
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Comment {
    /// Author name, when the comments part lists one
    pub author: Option<String>,
    /// Plain text, rich-text runs flattened
    pub text: String,
}

impl Comment {
    /// Create a comment without author
    pub fn new(text: impl Into<String>) -> Self {
        Comment {
            author: None,
            text: text.into(),
        }
    }

    /// Set the author (builder style)
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// Comments of one sheet, ordered row-major by address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentIndex {
    comments: BTreeMap<CellAddress, Comment>,
}

impl CommentIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a comment; a second comment on the same address replaces the first
    pub fn insert(&mut self, address: CellAddress, comment: Comment) {
        self.comments.insert(address, comment);
    }

    /// Parse `commentsN.xml` content
    pub fn parse(xml: &str) -> Result<Self> {
        Self::from_reader(xml.as_bytes())
    }

    /// Stream `commentsN.xml` from a reader
    pub fn from_reader<R: BufRead>(inner: R) -> Result<Self> {
        let mut reader = Reader::from_reader(inner);
        reader.config_mut().trim_text(false);

        let mut buf = Vec::new();
        let mut index = CommentIndex::new();
        let mut authors: Vec<String> = Vec::new();
        let mut author = String::new();
        let mut in_author = false;

        let mut current: Option<(CellAddress, Option<usize>)> = None;
        let mut text = String::new();
        let mut in_t = false;
        let mut phonetic_depth = 0u32;

        loop {
            let position = reader.buffer_position() as u64;
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|source| DecodeError::Xml { position, source })?;
            match event {
                Event::Start(ref e) => match e.local_name().as_ref() {
                    b"author" => {
                        in_author = true;
                        author.clear();
                    }
                    b"comment" => {
                        let mut reference = None;
                        let mut author_id = None;
                        for a in e.attributes() {
                            let a = a?;
                            let value = a
                                .unescape_value()
                                .map_err(|source| DecodeError::Xml { position, source })?;
                            match a.key.local_name().as_ref() {
                                b"ref" => reference = Some(value.into_owned()),
                                b"authorId" => author_id = value.parse::<usize>().ok(),
                                _ => {}
                            }
                        }
                        let reference = reference.ok_or_else(|| DecodeError::InvalidPart {
                            part: "comments.xml",
                            message: "<comment> without ref".to_string(),
                        })?;
                        // a range ref ("B2:C3") anchors the comment at its first cell
                        let anchor = reference.split(':').next().unwrap_or(&reference);
                        current = Some((CellAddress::parse(anchor)?, author_id));
                        text.clear();
                    }
                    b"rPh" if current.is_some() => phonetic_depth += 1,
                    b"t" if current.is_some() && phonetic_depth == 0 => in_t = true,
                    _ => {}
                },
                Event::Text(ref e) if in_author || in_t => {
                    let unescaped = e
                        .unescape()
                        .map_err(|source| DecodeError::Xml { position, source })?;
                    if in_author {
                        author.push_str(&unescaped);
                    } else {
                        text.push_str(&unescaped);
                    }
                }
                Event::End(ref e) => match e.local_name().as_ref() {
                    b"author" => {
                        in_author = false;
                        authors.push(std::mem::take(&mut author));
                    }
                    b"comment" => {
                        if let Some((address, author_id)) = current.take() {
                            let comment = Comment {
                                author: author_id.and_then(|id| authors.get(id).cloned()),
                                text: std::mem::take(&mut text),
                            };
                            index.insert(address, comment);
                        }
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

        Ok(index)
    }

    /// Comment at `address`
    pub fn get(&self, address: &CellAddress) -> Option<&Comment> {
        self.comments.get(address)
    }

    /// Commented addresses in row-major order
    pub fn addresses(&self) -> impl Iterator<Item = CellAddress> + '_ {
        self.comments.keys().copied()
    }

    /// Get the number of comments
    pub fn len(&self) -> usize {
        self.comments.len()
    }

    /// Check if the sheet has no comments
    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    /// Cursor that consumes the addresses in order
    pub fn reconciler(&self) -> CommentReconciler<'_> {
        CommentReconciler::new(Some(self))
    }
}

impl FromIterator<(CellAddress, Comment)> for CommentIndex {
    fn from_iter<I: IntoIterator<Item = (CellAddress, Comment)>>(iter: I) -> Self {
        CommentIndex {
            comments: iter.into_iter().collect(),
        }
    }
}

/// Result of matching one written cell against the comment queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CellMatch<'a> {
    /// Comment attached to this cell
    pub comment: Option<&'a Comment>,
    /// The cell arrived at or before an address already passed
    pub out_of_order: bool,
}

/// Queue of commented addresses, consumed monotonically
///
/// The three checkpoints are the only way to consume it:
/// - [`on_cell`](Self::on_cell): before a written cell is emitted
/// - [`on_row_end`](Self::on_row_end): when a row closes
/// - [`on_sheet_end`](Self::on_sheet_end): when sheet data closes
///
/// Every address is handed out exactly once, either attached to a written
/// cell or through the `flush` callback as a comment on an empty cell, and
/// always in non-decreasing row-major order.
#[derive(Debug)]
pub struct CommentReconciler<'a> {
    pending: Option<Peekable<btree_map::Iter<'a, CellAddress, Comment>>>,
    last_cell: Option<CellAddress>,
}

impl<'a> CommentReconciler<'a> {
    /// Cursor over `index`; `None` gives a queue that is always empty
    pub fn new(index: Option<&'a CommentIndex>) -> Self {
        CommentReconciler {
            pending: index.map(|i| i.comments.iter().peekable()),
            last_cell: None,
        }
    }

    /// Checkpoint (a): a written cell is about to be emitted
    ///
    /// Queued addresses before `address` belong to empty cells and are
    /// flushed first; a queued address equal to `address` is attached.
    pub fn on_cell<F>(&mut self, address: CellAddress, mut flush: F) -> CellMatch<'a>
    where
        F: FnMut(CellAddress, &'a Comment),
    {
        let out_of_order = self.last_cell.is_some_and(|last| address <= last);
        if !out_of_order {
            self.last_cell = Some(address);
        }

        let mut comment = None;
        if let Some(pending) = self.pending.as_mut() {
            while let Some(next) = pending.peek().map(|(a, _)| **a) {
                if next > address {
                    break;
                }
                let Some((&next, found)) = pending.next() else { break };
                if next == address {
                    comment = Some(found);
                    break;
                }
                flush(next, found);
            }
        }

        CellMatch {
            comment,
            out_of_order,
        }
    }

    /// Checkpoint (b): row `row` closed
    ///
    /// Flushes queued addresses on this row or any earlier row; they belong to
    /// cells that were never written.
    pub fn on_row_end<F>(&mut self, row: u32, mut flush: F)
    where
        F: FnMut(CellAddress, &'a Comment),
    {
        if let Some(pending) = self.pending.as_mut() {
            while let Some(next) = pending.peek().map(|(a, _)| **a) {
                if next.row > row {
                    break;
                }
                if let Some((&next, found)) = pending.next() {
                    flush(next, found);
                }
            }
        }
    }

    /// Checkpoint (c): sheet data closed, flush everything left
    pub fn on_sheet_end<F>(&mut self, mut flush: F)
    where
        F: FnMut(CellAddress, &'a Comment),
    {
        if let Some(pending) = self.pending.as_mut() {
            for (&next, found) in pending {
                flush(next, found);
            }
        }
    }

    /// Check whether every address has been handed out
    pub fn is_drained(&mut self) -> bool {
        self.pending.as_mut().map_or(true, |p| p.peek().is_none())
    }
}
