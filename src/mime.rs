//! Recursive multipart MIME decoding
//!
//! A parsed message is an owned tree of [`MimePart`] nodes. Only multipart
//! parts have children; each child is the byte range between two delimiter
//! lines of its parent's body. Structure problems are recorded on the part
//! they belong to, so everything parsed around them stays available.

use crate::error::{BounceError, Result};
use crate::header::{HeaderList, parse_headers, split_header_and_body};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use tracing::debug;

const DEFAULT_MEDIA_TYPE: &str = "text/plain";
const DELIVERY_STATUS: &str = "message/delivery-status";
const EMBEDDED_MESSAGE: &str = "message/rfc822";

/// Parsed `Content-Type` header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentType {
    /// Lower-cased `type/subtype`
    pub media_type: String,

    /// Parameters keyed by lower-cased name
    pub params: BTreeMap<String, String>,
}

impl ContentType {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let parsed = mailparse::parse_content_type(value);
        let media_type = parsed.mimetype.trim().to_lowercase();

        Self {
            media_type: if media_type.is_empty() {
                DEFAULT_MEDIA_TYPE.to_string()
            } else {
                media_type
            },
            params: parsed
                .params
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        }
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(&name.to_lowercase()).map(String::as_str)
    }

    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary").filter(|b| !b.is_empty())
    }

    #[must_use]
    pub fn charset(&self) -> &str {
        self.param("charset").unwrap_or("us-ascii")
    }

    #[must_use]
    pub fn is(&self, media_type: &str) -> bool {
        self.media_type.eq_ignore_ascii_case(media_type)
    }

    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.media_type.starts_with("multipart/")
    }
}

impl Default for ContentType {
    fn default() -> Self {
        Self {
            media_type: DEFAULT_MEDIA_TYPE.to_string(),
            params: BTreeMap::from([("charset".to_string(), "us-ascii".to_string())]),
        }
    }
}

/// Content-Transfer-Encoding of a part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEncoding {
    SevenBit,
    EightBit,
    Binary,
    Base64,
    QuotedPrintable,
    Other(String),
}

impl TransferEncoding {
    /// Interpret a `Content-Transfer-Encoding` value; absent means 7bit
    #[must_use]
    pub fn from_header(value: Option<&str>) -> Self {
        let Some(value) = value.map(str::trim) else {
            return Self::SevenBit;
        };
        match value.to_ascii_lowercase().as_str() {
            "" | "7bit" => Self::SevenBit,
            "8bit" => Self::EightBit,
            "binary" => Self::Binary,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            _ => Self::Other(value.to_string()),
        }
    }
}

/// Limits applied while parsing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MimeOptions {
    /// Deepest multipart nesting that is split into children.
    /// Parts below this depth are kept as leaves with a structure error.
    pub max_depth: Option<usize>,
}

/// A node of the MIME body-part tree
#[derive(Debug, Clone)]
pub struct MimePart {
    pub headers: HeaderList,
    pub content_type: ContentType,
    pub transfer_encoding: TransferEncoding,

    /// Body exactly as it appeared, before transfer decoding
    pub encoded_body: String,

    /// Sub-parts in declared order; empty unless multipart
    pub children: Vec<MimePart>,

    /// Structure problem found while splitting this part's body
    pub structure_error: Option<BounceError>,
}

/// The root of a parsed message is an ordinary part
pub type MimeMessage = MimePart;

impl MimePart {
    /// Parse a full message without a nesting limit
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self::parse_with(raw, &MimeOptions::default())
    }

    #[must_use]
    pub fn parse_with(raw: &str, options: &MimeOptions) -> Self {
        Self::parse_at_depth(raw, options, 0)
    }

    fn parse_at_depth(raw: &str, options: &MimeOptions, depth: usize) -> Self {
        let headers = parse_headers(raw);
        let (_, body) = split_header_and_body(raw);
        let content_type = headers
            .get_value("Content-Type")
            .map_or_else(ContentType::default, ContentType::parse);
        let transfer_encoding =
            TransferEncoding::from_header(headers.get_value("Content-Transfer-Encoding"));

        let mut part = Self {
            headers,
            content_type,
            transfer_encoding,
            encoded_body: body.to_string(),
            children: Vec::new(),
            structure_error: None,
        };

        if part.content_type.is_multipart() {
            match options.max_depth {
                Some(max) if depth >= max => {
                    part.record_structure_error(format!("nesting deeper than {max} levels"));
                }
                _ => part.split_multipart(body, options, depth),
            }
        }

        part
    }

    fn split_multipart(&mut self, body: &str, options: &MimeOptions, depth: usize) {
        let Some(boundary) = self.content_type.boundary().map(str::to_string) else {
            let details = format!("{} without a boundary parameter", self.content_type.media_type);
            self.record_structure_error(details);
            return;
        };
        let delimiter = format!("--{boundary}");
        let close_delimiter = format!("--{boundary}--");

        let mut segment_start: Option<usize> = None;
        let mut offset = 0;

        for line in body.split_inclusive('\n') {
            let line_start = offset;
            offset += line.len();
            let content = line.trim_end();

            if content == close_delimiter {
                if let Some(start) = segment_start {
                    self.push_child(&body[start..line_start], options, depth);
                }
                return;
            }
            if content == delimiter
                && let Some(start) = segment_start.replace(offset)
            {
                self.push_child(&body[start..line_start], options, depth);
            }
        }

        match segment_start {
            Some(start) => {
                self.push_child(&body[start..], options, depth);
                self.record_structure_error(format!("missing closing delimiter {close_delimiter}"));
            }
            None => self.record_structure_error(format!("boundary {boundary} not found in body")),
        }
    }

    fn push_child(&mut self, segment: &str, options: &MimeOptions, depth: usize) {
        let trimmed = segment
            .strip_suffix("\r\n")
            .or_else(|| segment.strip_suffix('\n'))
            .unwrap_or(segment);
        // A header-only part loses its blank line to the delimiter's line break
        let header_only = split_header_and_body(trimmed).0.is_empty()
            && !split_header_and_body(segment).0.is_empty();
        let segment = if header_only { segment } else { trimmed };
        self.children
            .push(Self::parse_at_depth(segment, options, depth + 1));
    }

    fn record_structure_error(&mut self, details: String) {
        debug!(
            "Malformed {} part: {}",
            self.content_type.media_type, details
        );
        self.structure_error = Some(BounceError::MalformedMime(details));
    }

    /// Body with the transfer encoding removed
    pub fn decoded_body(&self) -> Result<Vec<u8>> {
        match &self.transfer_encoding {
            TransferEncoding::SevenBit | TransferEncoding::EightBit | TransferEncoding::Binary => {
                Ok(self.encoded_body.as_bytes().to_vec())
            }
            TransferEncoding::Base64 => {
                let compact: Vec<u8> = self
                    .encoded_body
                    .bytes()
                    .filter(|b| !b.is_ascii_whitespace())
                    .collect();
                base64::engine::general_purpose::STANDARD
                    .decode(compact)
                    .map_err(|e| {
                        BounceError::Decode(format!(
                            "base64 in {}: {e}",
                            self.content_type.media_type
                        ))
                    })
            }
            TransferEncoding::QuotedPrintable => quoted_printable::decode(
                self.encoded_body.as_bytes(),
                quoted_printable::ParseMode::Strict,
            )
            .map_err(|e| {
                BounceError::Decode(format!(
                    "quoted-printable in {}: {e}",
                    self.content_type.media_type
                ))
            }),
            TransferEncoding::Other(name) => Err(BounceError::Decode(format!(
                "unsupported transfer encoding {name}"
            ))),
        }
    }

    /// Decoded body as text, replacing invalid UTF-8
    pub fn decoded_text(&self) -> Result<String> {
        self.decoded_body()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Parse the message carried by a `message/rfc822` part
    pub fn embedded_message(&self) -> Result<Option<Self>> {
        if !self.content_type.is(EMBEDDED_MESSAGE) {
            return Ok(None);
        }
        let text = self.decoded_text()?;
        Ok(Some(Self::parse(&text)))
    }

    /// First `message/delivery-status` part in document order, looking
    /// inside embedded `message/rfc822` parts as well
    #[must_use]
    pub fn find_delivery_status_part(&self) -> Option<Cow<'_, Self>> {
        if self.content_type.is(DELIVERY_STATUS) {
            return Some(Cow::Borrowed(self));
        }

        if self.content_type.is(EMBEDDED_MESSAGE) {
            return match self.embedded_message() {
                Ok(Some(inner)) => inner
                    .find_delivery_status_part()
                    .map(Cow::into_owned)
                    .map(Cow::Owned),
                Ok(None) => None,
                Err(e) => {
                    debug!("Skipping undecodable embedded message: {e}");
                    None
                }
            };
        }

        self.children.iter().find_map(Self::find_delivery_status_part)
    }

    /// Depth-first, document-order walk over this part and its descendants
    #[must_use]
    pub fn iter(&self) -> DepthFirst<'_> {
        DepthFirst { stack: vec![self] }
    }

    /// Every structure error in the tree, in document order
    #[must_use]
    pub fn structure_errors(&self) -> Vec<&BounceError> {
        self.iter()
            .filter_map(|part| part.structure_error.as_ref())
            .collect()
    }

    /// Fails with the first structure error anywhere in the tree
    pub fn check_structure(&self) -> Result<()> {
        match self.structure_errors().first() {
            Some(err) => Err((*err).clone()),
            None => Ok(()),
        }
    }
}

/// Iterator returned by [`MimePart::iter`]
pub struct DepthFirst<'a> {
    stack: Vec<&'a MimePart>,
}

impl<'a> Iterator for DepthFirst<'a> {
    type Item = &'a MimePart;

    fn next(&mut self) -> Option<Self::Item> {
        let part = self.stack.pop()?;
        self.stack.extend(part.children.iter().rev());
        Some(part)
    }
}
