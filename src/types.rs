//! Type definitions for decoded sheet data

use crate::error::DecodeError;
use std::fmt;
use std::str::FromStr;

/// Largest column index a worksheet can address (XFD)
pub const MAX_COLUMN: u32 = 16_383;

/// Largest 0-based row index a worksheet can address (row 1048576)
pub const MAX_ROW: u32 = 1_048_575;

/// Position of a cell in a worksheet
///
/// Both fields are 0-based. Ordering is row-major: rows compare first,
/// then columns, which is also the order cells appear in sheet XML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellAddress {
    /// Row index (0-based)
    pub row: u32,
    /// Column index (0-based)
    pub col: u32,
}

impl CellAddress {
    /// Create a new address
    pub fn new(row: u32, col: u32) -> Self {
        CellAddress { row, col }
    }

    /// Parse an `A1`-style reference (`$` anchors are accepted and ignored)
    ///
    /// # Examples
    ///
    /// ```
    /// use sheetstream::types::CellAddress;
    ///
    /// let addr = CellAddress::parse("AA10").unwrap();
    /// assert_eq!(addr, CellAddress::new(9, 26));
    /// ```
    pub fn parse(reference: &str) -> Result<Self, DecodeError> {
        let invalid = || DecodeError::InvalidCellAddress(reference.to_string());
        let bytes = reference.as_bytes();

        let mut pos = 0;
        if bytes.first() == Some(&b'$') {
            pos += 1;
        }

        let mut col: u32 = 0;
        let letters_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
            let digit = (bytes[pos].to_ascii_uppercase() - b'A') as u32 + 1;
            col = col.checked_mul(26).and_then(|c| c.checked_add(digit)).ok_or_else(invalid)?;
            pos += 1;
        }
        if pos == letters_start || col - 1 > MAX_COLUMN {
            return Err(invalid());
        }

        if bytes.get(pos) == Some(&b'$') {
            pos += 1;
        }
        let digits = &reference[pos..];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let row: u32 = digits.parse().map_err(|_| invalid())?;
        if row == 0 || row - 1 > MAX_ROW {
            return Err(invalid());
        }

        Ok(CellAddress::new(row - 1, col - 1))
    }

    /// Get Excel-style cell reference (e.g., "A1", "B2")
    pub fn reference(&self) -> String {
        let mut out = String::with_capacity(8);
        self.push_reference(&mut out);
        out
    }

    /// Append the `A1` form to `out` without an intermediate allocation
    pub fn push_reference(&self, out: &mut String) {
        push_column_letters(self.col, out);
        let mut buf = itoa::Buffer::new();
        out.push_str(buf.format(self.row as u64 + 1));
    }
}

/// Convert column index to Excel letters (0 -> A, 25 -> Z, 26 -> AA)
pub fn column_letters(col: u32) -> String {
    let mut out = String::with_capacity(3);
    push_column_letters(col, &mut out);
    out
}

fn push_column_letters(col: u32, out: &mut String) {
    let mut letters = [0u8; 8];
    let mut len = 0;
    let mut col = col + 1;

    while col > 0 {
        col -= 1;
        letters[len] = b'A' + (col % 26) as u8;
        len += 1;
        col /= 26;
    }

    for &b in letters[..len].iter().rev() {
        out.push(b as char);
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference())
    }
}

impl FromStr for CellAddress {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CellAddress::parse(s)
    }
}

/// How the raw text payload of a cell is interpreted
///
/// Only the `t` attribute decides the type. A style that points at a date
/// format leaves the type as `Number`; it only changes the format string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellValueType {
    /// `t="b"`
    Boolean,
    /// `t="e"`
    Error,
    /// `t="str"`, or a `<f>` element inside an untyped cell
    FormulaCachedOrSource,
    /// `t="inlineStr"`
    InlineString,
    /// `t="s"`
    SharedString,
    /// No type attribute, or `t="n"`
    #[default]
    Number,
}

impl CellValueType {
    /// Classify the value of a `t` attribute
    pub fn from_attr(value: Option<&str>) -> Self {
        match value {
            Some("b") => CellValueType::Boolean,
            Some("e") => CellValueType::Error,
            Some("inlineStr") => CellValueType::InlineString,
            Some("s") => CellValueType::SharedString,
            Some("str") => CellValueType::FormulaCachedOrSource,
            _ => CellValueType::Number,
        }
    }
}

/// A decoded cell as it crosses into the sink
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResolvedCell {
    /// Cell position, explicit or synthesized from the row/column cursors
    pub address: CellAddress,
    /// Display string; `None` when the cell carried no value at all
    pub value: Option<String>,
    /// Text of the comment attached to this cell
    pub comment: Option<String>,
}

impl ResolvedCell {
    /// Create a new resolved cell
    pub fn new(address: CellAddress, value: Option<String>, comment: Option<String>) -> Self {
        ResolvedCell {
            address,
            value,
            comment,
        }
    }

    /// Check if the cell has no value
    pub fn is_empty(&self) -> bool {
        self.value.as_deref().map_or(true, str::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cell_reference() {
        assert_eq!(CellAddress::new(0, 0).reference(), "A1");
        assert_eq!(CellAddress::new(0, 25).reference(), "Z1");
        assert_eq!(CellAddress::new(0, 26).reference(), "AA1");
        assert_eq!(CellAddress::new(4, 1).to_string(), "B5");
        assert_eq!(CellAddress::new(MAX_ROW, MAX_COLUMN).reference(), "XFD1048576");
    }

    #[test]
    fn test_parse_reference() {
        assert_eq!(CellAddress::parse("A1").unwrap(), CellAddress::new(0, 0));
        assert_eq!(CellAddress::parse("c2").unwrap(), CellAddress::new(1, 2));
        assert_eq!(CellAddress::parse("$B$5").unwrap(), CellAddress::new(4, 1));
        assert_eq!("XFD1048576".parse::<CellAddress>().unwrap(), CellAddress::new(MAX_ROW, MAX_COLUMN));
    }

    #[test]
    fn test_parse_rejects_invalid() {
        for bad in ["", "A", "1", "A0", "1A", "A1B", "XFE1", "A1048577", "A-1"] {
            assert!(CellAddress::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_row_major_order() {
        let mut addrs = vec![
            CellAddress::new(1, 0),
            CellAddress::new(0, 5),
            CellAddress::new(0, 1),
        ];
        addrs.sort();
        assert_eq!(
            addrs,
            vec![
                CellAddress::new(0, 1),
                CellAddress::new(0, 5),
                CellAddress::new(1, 0)
            ]
        );
    }

    #[test]
    fn test_resolved_cell_is_empty() {
        let at = CellAddress::new(0, 0);
        assert!(ResolvedCell::new(at, None, Some("note".to_string())).is_empty());
        assert!(ResolvedCell::new(at, Some(String::new()), None).is_empty());
        assert!(!ResolvedCell::new(at, Some("0".to_string()), None).is_empty());
    }

    #[test]
    fn test_value_type_from_attr() {
        assert_eq!(CellValueType::from_attr(None), CellValueType::Number);
        assert_eq!(CellValueType::from_attr(Some("n")), CellValueType::Number);
        assert_eq!(CellValueType::from_attr(Some("s")), CellValueType::SharedString);
        assert_eq!(CellValueType::from_attr(Some("str")), CellValueType::FormulaCachedOrSource);
        assert_eq!(CellValueType::from_attr(Some("inlineStr")), CellValueType::InlineString);
    }

    proptest! {
        #[test]
        fn address_round_trips(row in 0..=MAX_ROW, col in 0..=MAX_COLUMN) {
            let addr = CellAddress::new(row, col);
            prop_assert_eq!(CellAddress::parse(&addr.reference()).unwrap(), addr);
        }
    }
}
