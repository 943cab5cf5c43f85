//! Core bounce classification types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Permanence of a delivery failure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BounceType {
    /// Permanent failure; do not retry
    Hard,
    /// Temporary failure; retry later
    Soft,
    /// Indeterminate
    Unknown,
}

impl BounceType {
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        matches!(self, Self::Hard)
    }
}

impl fmt::Display for BounceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hard => "Hard",
            Self::Soft => "Soft",
            Self::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

/// Semantic reason for a bounce
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BounceCode {
    BadEmailAddress,
    MailboxFull,
    MessageTooLarge,
    PolicyRejection,
    ServiceUnavailable,
    RateLimitedByReceivingMta,
    UnableToConnect,
    NotABounce,
    Unknown,
}

impl fmt::Display for BounceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Classification result: how permanent, and why
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BouncePair {
    pub bounce_type: BounceType,
    pub bounce_code: BounceCode,
}

impl BouncePair {
    /// Used whenever nothing more specific applies
    pub const UNKNOWN: Self = Self::new(BounceType::Unknown, BounceCode::Unknown);

    #[must_use]
    pub const fn new(bounce_type: BounceType, bounce_code: BounceCode) -> Self {
        Self {
            bounce_type,
            bounce_code,
        }
    }

    /// Whether the retry subsystem should attempt delivery again
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        matches!(self.bounce_type, BounceType::Soft)
    }
}

impl fmt::Display for BouncePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bounce_type, self.bounce_code)
    }
}

/// Kind of event handed to the queue subsystem
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventType {
    #[default]
    Bounce,
}

/// A classified delivery failure for one recipient
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BounceEvent {
    /// Recipient the failure applies to
    pub email_address: String,

    pub event_type: EventType,

    pub bounce_info: BouncePair,

    /// Original failure text, surfaced to operators
    pub message: String,

    /// Caller's identifier for the send attempt
    pub send_id: String,

    pub timestamp: DateTime<Utc>,
}
