//! Assembles classified bounce events from raw failure artifacts

use crate::classify::{BounceClassifier, RuleTable};
use crate::error::Result;
use crate::extract::{BounceExtractor, Extraction};
use crate::types::{BounceEvent, EventType};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// What kind of text the caller is handing over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// Reply text from a remote SMTP server
    SmtpResponse,
    /// Body of an RFC 3464 delivery status report
    NdrReport,
    /// Full internet message carrying a delivery status part
    Message,
}

/// Runs extraction and classification for one artifact at a time
#[derive(Debug, Clone, Default)]
pub struct EventAssembler {
    extractor: BounceExtractor,
    classifier: BounceClassifier,
}

impl EventAssembler {
    #[must_use]
    pub const fn new(extractor: BounceExtractor, classifier: BounceClassifier) -> Self {
        Self {
            extractor,
            classifier,
        }
    }

    #[must_use]
    pub fn with_rules(rules: Arc<RuleTable>) -> Self {
        Self::new(BounceExtractor::default(), BounceClassifier::new(rules))
    }

    #[must_use]
    pub const fn classifier(&self) -> &BounceClassifier {
        &self.classifier
    }

    pub fn extract(&self, raw: &str, kind: ArtifactKind) -> Result<Extraction> {
        self.extract_for(raw, kind, None)
    }

    /// Extract, reading a report's record for `recipient` when present
    pub fn extract_for(
        &self,
        raw: &str,
        kind: ArtifactKind,
        recipient: Option<&str>,
    ) -> Result<Extraction> {
        match kind {
            ArtifactKind::SmtpResponse => self.extractor.extract_from_smtp_response(raw),
            ArtifactKind::NdrReport => self.extractor.extract_from_ndr_for(raw, recipient),
            ArtifactKind::Message => self.extractor.extract_from_message_for(raw, recipient),
        }
    }

    /// Build the bounce event for one recipient.
    ///
    /// An `Err` means the artifact is not classifiable as a bounce. Reports
    /// are read from the record for `recipient`; an empty `recipient` is
    /// replaced by the report's first `Final-Recipient`, if any.
    pub fn build_bounce_event(
        &self,
        raw: &str,
        kind: ArtifactKind,
        recipient: &str,
        send_id: &str,
    ) -> Result<BounceEvent> {
        let wanted = Some(recipient.trim()).filter(|r| !r.is_empty());
        let extraction = self.extract_for(raw, kind, wanted)?;
        let bounce_info = self.classifier.classify(
            extraction.smtp_code.as_deref(),
            extraction.ndr_code.as_deref(),
            &extraction.message,
        );

        let email_address = match recipient.trim() {
            "" => extraction.final_recipient.unwrap_or_default(),
            address => address.to_string(),
        };

        debug!("Bounce for {} ({}): {}", email_address, send_id, bounce_info);

        Ok(BounceEvent {
            email_address,
            event_type: EventType::Bounce,
            bounce_info,
            message: extraction.message,
            send_id: send_id.to_string(),
            timestamp: Utc::now(),
        })
    }
}
