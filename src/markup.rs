//! Token-level view of worksheet XML
//!
//! The decoder does not care where its tokens come from. [`SheetReader`]
//! produces them from any `BufRead` with `quick-xml`, keeping only the
//! SpreadsheetML namespace; hosts with their own tokenizer can build
//! [`Token`]s directly.

use crate::error::{DecodeError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use std::borrow::Cow;
use std::io::BufRead;
use std::ops::ControlFlow;

/// SpreadsheetML main namespace (transitional)
pub const SPREADSHEETML_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";

/// SpreadsheetML main namespace (strict)
pub const SPREADSHEETML_STRICT_NS: &str = "http://purl.oclc.org/ooxml/spreadsheetml/main";

/// One markup token
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    /// Element start with its attributes
    Start(StartTag<'a>),
    /// Character data, already unescaped
    Text(Cow<'a, str>),
    /// Element end, by local name
    End(&'a str),
}

/// Element start: local name plus attributes
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StartTag<'a> {
    name: &'a str,
    attrs: Vec<(&'a str, Cow<'a, str>)>,
}

impl<'a> StartTag<'a> {
    /// Create a tag with no attributes
    pub fn new(name: &'a str) -> Self {
        StartTag {
            name,
            attrs: Vec::new(),
        }
    }

    /// Add an attribute (builder style)
    pub fn with_attr(mut self, key: &'a str, value: impl Into<Cow<'a, str>>) -> Self {
        self.attrs.push((key, value.into()));
        self
    }

    /// Local name of the element
    pub fn local_name(&self) -> &str {
        self.name
    }

    /// Value of the attribute with the given local name
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_ref())
    }

    fn from_bytes(start: &'a BytesStart<'_>) -> Result<Self> {
        let name = utf8_name(start.local_name().into_inner())?;
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = utf8_name(attr.key.local_name().into_inner())?;
            let value = attr
                .unescape_value()
                .map_err(|source| DecodeError::Xml { position: 0, source })?;
            attrs.push((key, value));
        }
        Ok(StartTag { name, attrs })
    }
}

fn utf8_name(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes)
        .map_err(|e| DecodeError::malformed(0, format!("element name is not UTF-8: {}", e)))
}

fn is_sheet_namespace(ns: &ResolveResult<'_>) -> bool {
    match ns {
        ResolveResult::Unbound => true,
        ResolveResult::Bound(Namespace(uri)) => {
            *uri == SPREADSHEETML_NS.as_bytes() || *uri == SPREADSHEETML_STRICT_NS.as_bytes()
        }
        ResolveResult::Unknown(_) => false,
    }
}

/// Streams tokens out of worksheet XML
///
/// Self-closing elements are reported as a start followed by an end.
pub struct SheetReader<R: BufRead> {
    reader: NsReader<R>,
    buf: Vec<u8>,
}

impl<R: BufRead> SheetReader<R> {
    /// Wrap a buffered reader over one worksheet part
    pub fn new(inner: R) -> Self {
        let mut reader = NsReader::from_reader(inner);
        let config = reader.config_mut();
        config.trim_text(false);
        config.expand_empty_elements = true;

        SheetReader {
            reader,
            buf: Vec::with_capacity(64 * 1024),
        }
    }

    /// Byte offset of the tokenizer in the input
    pub fn position(&self) -> u64 {
        self.reader.buffer_position() as u64
    }

    /// Feed every SpreadsheetML token to `on_token` until end of input
    ///
    /// `on_token` returns `ControlFlow::Break` to stop reading early; the rest
    /// of the input is left unread.
    pub fn for_each_token<F>(&mut self, mut on_token: F) -> Result<()>
    where
        F: FnMut(Token<'_>, u64) -> Result<ControlFlow<()>>,
    {
        loop {
            self.buf.clear();
            let position = self.reader.buffer_position() as u64;
            let (ns, event) = self
                .reader
                .read_resolved_event_into(&mut self.buf)
                .map_err(|source| DecodeError::Xml { position, source })?;

            let flow = match event {
                Event::Start(start) => {
                    if !is_sheet_namespace(&ns) {
                        continue;
                    }
                    let tag = StartTag::from_bytes(&start).map_err(|e| at(e, position))?;
                    on_token(Token::Start(tag), position)?
                }
                Event::End(end) => {
                    if !is_sheet_namespace(&ns) {
                        continue;
                    }
                    let name = utf8_name(end.local_name().into_inner()).map_err(|e| at(e, position))?;
                    on_token(Token::End(name), position)?
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|source| DecodeError::Xml { position, source })?;
                    on_token(Token::Text(text), position)?
                }
                Event::CData(data) => {
                    let text = String::from_utf8_lossy(&data).into_owned();
                    on_token(Token::Text(Cow::Owned(text)), position)?
                }
                Event::Eof => return Ok(()),
                _ => ControlFlow::Continue(()),
            };

            if flow.is_break() {
                return Ok(());
            }
        }
    }
}

fn at(err: DecodeError, position: u64) -> DecodeError {
    match err {
        DecodeError::MalformedMarkup { message, .. } => DecodeError::MalformedMarkup { position, message },
        DecodeError::Xml { source, .. } => DecodeError::Xml { position, source },
        other => other,
    }
}
