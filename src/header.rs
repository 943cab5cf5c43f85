//! RFC 5322 header folding, unfolding and header/body splitting

use crate::error::{BounceError, Result};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// Line terminator used for every line this module produces
pub const LINE_TERMINATOR: &str = "\r\n";

/// Width limits used when folding header lines.
///
/// Both widths count characters including the trailing line terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoldOptions {
    /// Preferred maximum physical line length
    pub max_line_length: usize,

    /// Width tried once when no fold point exists within `max_line_length`
    pub fallback_line_length: usize,
}

impl Default for FoldOptions {
    fn default() -> Self {
        Self {
            max_line_length: 78,
            fallback_line_length: 1000,
        }
    }
}

/// A single header field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

impl MessageHeader {
    #[must_use]
    pub fn new(name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        Self {
            name: name.as_ref().trim().to_string(),
            value: value.as_ref().trim().to_string(),
        }
    }

    /// Case-insensitive comparison of the header name
    #[must_use]
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl PartialEq for MessageHeader {
    fn eq(&self, other: &Self) -> bool {
        self.is_named(&other.name) && self.value == other.value
    }
}

impl Eq for MessageHeader {}

/// Ordered list of headers with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderList(Vec<MessageHeader>);

impl HeaderList {
    #[must_use]
    pub const fn new(headers: Vec<MessageHeader>) -> Self {
        Self(headers)
    }

    /// First header with the given name, if any
    #[must_use]
    pub fn get_first(&self, name: &str) -> Option<&MessageHeader> {
        self.0.iter().find(|h| h.is_named(name))
    }

    /// Value of the first header with the given name
    #[must_use]
    pub fn get_value(&self, name: &str) -> Option<&str> {
        self.get_first(name).map(|h| h.value.as_str())
    }

    /// All headers with the given name, in order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MessageHeader> + 'a {
        self.0.iter().filter(move |h| h.is_named(name))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MessageHeader> {
        self.0.iter()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<MessageHeader>> for HeaderList {
    fn from(headers: Vec<MessageHeader>) -> Self {
        Self(headers)
    }
}

impl<'a> IntoIterator for &'a HeaderList {
    type Item = &'a MessageHeader;
    type IntoIter = std::slice::Iter<'a, MessageHeader>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

enum FoldPoint {
    /// Start of a whitespace run; the run moves to the continuation line
    Whitespace(usize),
    /// Position of a `;` that stays on the current line
    Semicolon(usize),
}

/// Fold `Name: Value` into physical lines no longer than `max_line_length`
pub fn fold_header(name: &str, value: &str, max_line_length: usize) -> Result<String> {
    fold_header_with(
        name,
        value,
        &FoldOptions {
            max_line_length,
            ..FoldOptions::default()
        },
    )
}

/// Fold `Name: Value` using explicit width options.
///
/// Every produced line, including the last, ends with [`LINE_TERMINATOR`].
pub fn fold_header_with(name: &str, value: &str, options: &FoldOptions) -> Result<String> {
    let value = value.replace(['\r', '\n'], "");
    let mut remaining = format!("{}: {}", name.trim(), value.trim());
    let mut width = options
        .max_line_length
        .saturating_sub(LINE_TERMINATOR.len());
    let mut escalated = false;
    let mut folded = String::with_capacity(remaining.len() + LINE_TERMINATOR.len());

    loop {
        let Some(limit) = char_offset(&remaining, width) else {
            folded.push_str(&remaining);
            folded.push_str(LINE_TERMINATOR);
            return Ok(folded);
        };

        match find_fold_point(&remaining[..limit]) {
            Some(FoldPoint::Whitespace(start)) => {
                folded.push_str(&remaining[..start]);
                folded.push_str(LINE_TERMINATOR);
                remaining = remaining.split_off(start);
            }
            Some(FoldPoint::Semicolon(pos)) => {
                folded.push_str(&remaining[..=pos]);
                folded.push_str(LINE_TERMINATOR);
                remaining = format!(" {}", &remaining[pos + 1..]);
            }
            None if !escalated => {
                warn!(
                    "No fold point for {} within {} characters, retrying at {}",
                    name, options.max_line_length, options.fallback_line_length
                );
                width = options
                    .fallback_line_length
                    .saturating_sub(LINE_TERMINATOR.len());
                escalated = true;
            }
            None => {
                return Err(BounceError::UnfoldableHeader {
                    header: name.to_string(),
                    width: options.fallback_line_length,
                });
            }
        }
    }
}

/// Byte offset of the `n`th character, or `None` when `s` has at most `n` characters
fn char_offset(s: &str, n: usize) -> Option<usize> {
    s.char_indices().nth(n).map(|(idx, _)| idx)
}

fn find_fold_point(chunk: &str) -> Option<FoldPoint> {
    let mut chars = chunk.char_indices().rev().peekable();
    while let Some((idx, c)) = chars.next() {
        if !c.is_whitespace() {
            continue;
        }
        // walk back to the first character of this run
        let mut start = idx;
        while let Some(&(prev, p)) = chars.peek() {
            if !p.is_whitespace() {
                break;
            }
            start = prev;
            chars.next();
        }
        if start > 0 {
            return Some(FoldPoint::Whitespace(start));
        }
        break;
    }

    chunk
        .char_indices()
        .rev()
        .find(|&(idx, c)| c == ';' && idx > 0 && idx + 1 < chunk.len())
        .map(|(idx, _)| FoldPoint::Semicolon(idx))
}

/// Join continuation lines onto the logical line they continue.
///
/// Continuations are appended verbatim; logical lines are separated by
/// [`LINE_TERMINATOR`].
#[must_use]
pub fn unfold_headers(text: &str) -> String {
    unfold_lines(text).join(LINE_TERMINATOR)
}

pub(crate) fn unfold_lines(text: &str) -> Vec<String> {
    let mut logical: Vec<String> = Vec::new();
    for line in text.lines() {
        if line.starts_with(char::is_whitespace)
            && let Some(current) = logical.last_mut()
        {
            current.push_str(line);
        } else {
            logical.push(line.to_string());
        }
    }
    logical
}

/// Split a message at the first blank line.
///
/// Without a blank line the whole input is body. Input starting with a line
/// terminator has no headers.
#[must_use]
pub fn split_header_and_body(raw: &str) -> (&str, &str) {
    if let Some(body) = raw.strip_prefix(LINE_TERMINATOR).or_else(|| raw.strip_prefix('\n')) {
        return ("", body);
    }

    let crlf = raw.find("\r\n\r\n").map(|pos| (pos, 4));
    let lf = raw.find("\n\n").map(|pos| (pos, 2));
    let boundary = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };

    match boundary {
        Some((pos, len)) => (&raw[..pos], &raw[pos + len..]),
        None => ("", raw),
    }
}

/// Parse the header section of a message into an ordered header list
#[must_use]
pub fn parse_headers(raw: &str) -> HeaderList {
    let (header_section, _) = split_header_and_body(raw);
    let mut headers = Vec::new();

    for line in unfold_lines(header_section) {
        if line.trim().is_empty() {
            break;
        }
        match line.split_once(':') {
            Some((name, value)) => headers.push(MessageHeader::new(name, value)),
            None => trace!("Skipping header line without a colon: {line}"),
        }
    }

    HeaderList(headers)
}
