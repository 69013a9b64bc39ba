//! Error types for the sheetstream library
//!
//! Two channels exist:
//! - [`DecodeError`] is fatal and aborts the current sheet.
//! - [`CellIssue`] is recoverable: the decoder logs it, substitutes a
//!   best-effort value and keeps going so row/column structure stays intact.

use crate::types::CellAddress;
use std::fmt;
use thiserror::Error;

/// Result type alias for sheetstream operations
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Fatal errors that abort decoding of a sheet
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Unexpected element nesting in the worksheet markup
    #[error("Malformed sheet markup at byte {position}: {message}")]
    MalformedMarkup { position: u64, message: String },

    /// The underlying XML tokenizer failed
    #[error("XML error at byte {position}: {source}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    /// Attribute could not be decoded
    #[error("Invalid attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    /// Invalid cell reference
    #[error("Invalid cell reference: {0}")]
    InvalidCellAddress(String),

    /// Invalid workbook part (sharedStrings.xml, styles.xml, commentsN.xml)
    #[error("Invalid {part}: {message}")]
    InvalidPart { part: &'static str, message: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    pub(crate) fn malformed(position: u64, message: impl Into<String>) -> Self {
        DecodeError::MalformedMarkup {
            position,
            message: message.into(),
        }
    }

    /// Whether the error came from the markup itself rather than from IO
    pub fn is_markup(&self) -> bool {
        matches!(
            self,
            DecodeError::MalformedMarkup { .. } | DecodeError::Xml { .. }
        )
    }
}

/// Failure of an index lookup into a workbook-level table
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("index {index} not found (table holds {len} entries)")]
    NotFound { index: usize, len: usize },
}

/// Which indirection could not be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReferenceKind {
    SharedString,
    Style,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::SharedString => f.write_str("shared string"),
            ReferenceKind::Style => f.write_str("style"),
        }
    }
}

/// Recoverable per-cell problems
///
/// None of these stop the sheet. The cell still gets an event (with an empty or
/// raw value), so later columns never shift.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CellIssue {
    /// Shared-string index or style index missing from its table
    #[error("{address}: unresolved {kind} reference '{raw}'")]
    UnresolvedReference {
        address: CellAddress,
        kind: ReferenceKind,
        raw: String,
    },

    /// Number or formula payload that is not a number
    #[error("{address}: numeric payload '{raw}' does not parse, emitted as text")]
    UnparsableNumericPayload { address: CellAddress, raw: String },

    /// Comment queue inconsistent with row progression
    #[error("{address}: {message}")]
    InvariantViolation {
        address: CellAddress,
        message: String,
    },
}

impl CellIssue {
    /// Address of the cell the issue was raised for
    pub fn address(&self) -> CellAddress {
        match self {
            CellIssue::UnresolvedReference { address, .. }
            | CellIssue::UnparsableNumericPayload { address, .. }
            | CellIssue::InvariantViolation { address, .. } => *address,
        }
    }
}
