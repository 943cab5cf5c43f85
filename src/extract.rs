//! Bounce code extraction from SMTP replies and delivery status reports

use crate::error::{BounceError, Result};
use crate::header::{HeaderList, MessageHeader, unfold_lines};
use crate::mime::{MimeOptions, MimePart};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

// An optional leading NDR code, then an SMTP code and/or NDR code in either
// order, then the rest of the line.
static SMTP_RESPONSE_REGEX: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?P<lead_ndr>\d\.\d{1,3}\.\d{1,3})\b[\s-]*)?(?:(?P<smtp>\d{3})\b[\s-]*)?(?:(?P<ndr>\d\.\d{1,3}\.\d{1,3})\b[\s-]*)?(?P<detail>.*)$",
    )
    .unwrap()
});

static NDR_CODE_REGEX: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"\b\d\.\d{1,3}\.\d{1,3}\b").unwrap());

/// Codes found by the SMTP-response pattern on a single line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpCodeMatch {
    pub smtp_code: Option<String>,
    pub ndr_code: Option<String>,
    pub detail: String,
}

impl SmtpCodeMatch {
    #[must_use]
    pub const fn has_code(&self) -> bool {
        self.smtp_code.is_some() || self.ndr_code.is_some()
    }
}

/// Apply the SMTP-response pattern to one line of text
#[must_use]
pub fn match_smtp_response(line: &str) -> SmtpCodeMatch {
    let Some(caps) = SMTP_RESPONSE_REGEX.captures(line) else {
        return SmtpCodeMatch {
            detail: line.trim().to_string(),
            ..SmtpCodeMatch::default()
        };
    };
    let group = |name: &str| caps.name(name).map(|m| m.as_str().to_string());

    SmtpCodeMatch {
        smtp_code: group("smtp"),
        ndr_code: group("lead_ndr").or_else(|| group("ndr")),
        detail: caps
            .name("detail")
            .map_or("", |m| m.as_str())
            .trim()
            .to_string(),
    }
}

/// First `d.ddd.ddd` status code anywhere in the text
#[must_use]
pub fn find_ndr_code(text: &str) -> Option<&str> {
    NDR_CODE_REGEX.find(text).map(|m| m.as_str())
}

/// Everything extracted from a bounce artifact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    pub smtp_code: Option<String>,
    pub ndr_code: Option<String>,

    /// Free text following the codes
    pub detail: String,

    /// Text to surface to operators as the bounce message
    pub message: String,

    /// `Final-Recipient` address from a delivery status report
    pub final_recipient: Option<String>,

    /// `Action` from a delivery status report
    pub action: Option<String>,

    /// `Reporting-MTA` name from a delivery status report
    pub reporting_mta: Option<String>,
}

/// Pulls status codes out of raw failure artifacts
#[derive(Debug, Clone, Copy, Default)]
pub struct BounceExtractor {
    /// Limits for parsing full messages
    pub mime: MimeOptions,
}

impl BounceExtractor {
    #[must_use]
    pub const fn new(mime: MimeOptions) -> Self {
        Self { mime }
    }

    /// Extract codes from an SMTP reply.
    ///
    /// Only the first line is searched; the whole reply becomes the message.
    pub fn extract_from_smtp_response(&self, text: &str) -> Result<Extraction> {
        let first_line = text.lines().next().unwrap_or_default();
        let matched = match_smtp_response(first_line);
        if !matched.has_code() {
            return Err(BounceError::Extraction(format!(
                "no SMTP or NDR code in reply: {first_line}"
            )));
        }

        trace!(
            "SMTP reply codes: smtp={:?} ndr={:?}",
            matched.smtp_code, matched.ndr_code
        );

        Ok(Extraction {
            smtp_code: matched.smtp_code,
            ndr_code: matched.ndr_code,
            detail: matched.detail,
            message: text.to_string(),
            ..Extraction::default()
        })
    }

    /// Extract codes from the fields of an RFC 3464 delivery status report.
    ///
    /// Codes come from the first per-recipient record. `Diagnostic-Code` is
    /// preferred; `Status` is only consulted when the diagnostic is missing
    /// or carries no code.
    pub fn extract_from_ndr(&self, report: &str) -> Result<Extraction> {
        self.extract_from_ndr_for(report, None)
    }

    /// Like [`Self::extract_from_ndr`], but reads the record whose
    /// `Final-Recipient` matches `recipient` when there is one.
    pub fn extract_from_ndr_for(
        &self,
        report: &str,
        recipient: Option<&str>,
    ) -> Result<Extraction> {
        let records = parse_report_records(report);
        let record = select_recipient_record(&records, recipient).ok_or_else(|| {
            BounceError::Extraction("report has no per-recipient fields".into())
        })?;

        let diagnostic = non_empty(record.get_value("Diagnostic-Code"));
        let status = non_empty(record.get_value("Status"));

        let mut extraction = Extraction {
            final_recipient: final_recipient(record).map(str::to_string),
            action: non_empty(record.get_value("Action")).map(str::to_lowercase),
            reporting_mta: records
                .iter()
                .find_map(|r| non_empty(r.get_value("Reporting-MTA")))
                .map(|v| strip_type_prefix(v).to_string()),
            ..Extraction::default()
        };

        if let Some(diagnostic) = diagnostic {
            let matched = match_smtp_response(strip_type_prefix(diagnostic));
            if matched.has_code() {
                extraction.smtp_code = matched.smtp_code;
                extraction.ndr_code = matched.ndr_code;
                extraction.detail = matched.detail;
                extraction.message = diagnostic.to_string();
                return Ok(extraction);
            }
            debug!("Diagnostic-Code has no status code, trying Status: {diagnostic}");
        }

        if let Some(status) = status
            && let Some(code) = find_ndr_code(status)
        {
            extraction.ndr_code = Some(code.to_string());
            extraction.detail = diagnostic.map_or_else(
                || status.replacen(code, "", 1).trim().to_string(),
                |d| strip_type_prefix(d).to_string(),
            );
            extraction.message = diagnostic.unwrap_or(status).to_string();
            return Ok(extraction);
        }

        Err(BounceError::Extraction(
            "recipient record has no usable Diagnostic-Code or Status".into(),
        ))
    }

    /// Locate the delivery status part of a full message and extract from it
    pub fn extract_from_message(&self, raw: &str) -> Result<Extraction> {
        self.extract_from_message_for(raw, None)
    }

    /// Like [`Self::extract_from_message`], preferring the record for
    /// `recipient`
    pub fn extract_from_message_for(
        &self,
        raw: &str,
        recipient: Option<&str>,
    ) -> Result<Extraction> {
        let message = MimePart::parse_with(raw, &self.mime);
        let part = message.find_delivery_status_part().ok_or_else(|| {
            BounceError::Extraction("message has no message/delivery-status part".into())
        })?;
        let report = part.decoded_text()?;
        self.extract_from_ndr_for(&report, recipient)
    }
}

/// Blank-line separated records of a report, each with its fields unfolded
fn parse_report_records(report: &str) -> Vec<HeaderList> {
    let mut records = Vec::new();
    let mut record = String::new();

    for line in report.lines().chain(std::iter::once("")) {
        if !line.trim().is_empty() {
            record.push_str(line);
            record.push('\n');
            continue;
        }
        if record.is_empty() {
            continue;
        }
        let fields = unfold_lines(&record)
            .iter()
            .filter_map(|logical| logical.split_once(':'))
            .map(|(name, value)| MessageHeader::new(name, value))
            .collect();
        records.push(HeaderList::new(fields));
        record.clear();
    }

    records
}

/// The per-recipient record to read codes from.
///
/// A record whose `Final-Recipient` matches `recipient` wins, then the first
/// record naming any recipient, then the first record carrying a status.
fn select_recipient_record<'a>(
    records: &'a [HeaderList],
    recipient: Option<&str>,
) -> Option<&'a HeaderList> {
    if let Some(wanted) = recipient.map(str::trim).filter(|w| !w.is_empty()) {
        let matching = records.iter().find(|record| {
            final_recipient(record).is_some_and(|address| address.eq_ignore_ascii_case(wanted))
        });
        if matching.is_some() {
            return matching;
        }
        trace!("No report record for {wanted}, using the first recipient record");
    }

    records
        .iter()
        .find(|record| final_recipient(record).is_some())
        .or_else(|| {
            records.iter().find(|record| {
                record.get_value("Diagnostic-Code").is_some() || record.get_value("Status").is_some()
            })
        })
}

fn final_recipient(record: &HeaderList) -> Option<&str> {
    non_empty(record.get_value("Final-Recipient")).map(strip_type_prefix)
}

/// Drop a leading `type;` such as `smtp;` or `rfc822;`
fn strip_type_prefix(value: &str) -> &str {
    match value.split_once(';') {
        Some((kind, rest)) if is_type_token(kind.trim()) => rest.trim(),
        _ => value.trim(),
    }
}

fn is_type_token(s: &str) -> bool {
    s.starts_with(|c: char| c.is_ascii_alphabetic())
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
