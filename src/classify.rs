//! Rule-based mapping of SMTP and NDR codes to bounce classifications

use crate::error::{BounceError, Result};
use crate::types::{BounceCode, BouncePair, BounceType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// An enhanced status code, `class.subject.detail`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NdrCode {
    pub class: u8,
    pub subject: u16,
    pub detail: u16,
}

impl FromStr for NdrCode {
    type Err = BounceError;

    fn from_str(input: &str) -> Result<Self> {
        let invalid = || BounceError::InvalidRule {
            rule: input.to_string(),
            details: "expected an NDR code of the form d.ddd.ddd".into(),
        };
        let mut parts = input.trim().split('.');
        let class = parts.next().filter(|p| p.len() == 1).ok_or_else(invalid)?;
        let subject = parts.next().ok_or_else(invalid)?;
        let detail = parts.next().ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            class: parse_digits(class, 1).ok_or_else(invalid)?,
            subject: parse_digits(subject, 3).ok_or_else(invalid)?,
            detail: parse_digits(detail, 3).ok_or_else(invalid)?,
        })
    }
}

impl fmt::Display for NdrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

fn parse_digits<T: FromStr>(s: &str, max_len: usize) -> Option<T> {
    if s.is_empty() || s.len() > max_len || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_smtp_code(code: &str) -> Option<u16> {
    let code = code.trim();
    if code.len() == 3 { parse_digits(code, 3) } else { None }
}

fn parse_subject_key(key: &str) -> Option<(u16, u16)> {
    let (subject, detail) = key.trim().split_once('.')?;
    Some((parse_digits(subject, 3)?, parse_digits(detail, 3)?))
}

/// Maps a vendor marker found in the reply text to a classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRule {
    pub marker: String,
    pub bounce: BouncePair,
}

/// Serialized form of additional classification rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleFile {
    /// Exact 3-digit SMTP reply codes
    pub smtp: BTreeMap<String, BouncePair>,

    /// Exact NDR codes such as `4.2.1`
    pub ndr: BTreeMap<String, BouncePair>,

    /// `subject.detail` keys applied to class 4 and 5 NDR codes
    pub ndr_subject: BTreeMap<String, BounceCode>,

    /// Vendor markers, tried in order
    pub providers: Vec<ProviderRule>,
}

/// Immutable classification rules, shared between classifiers
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    smtp: HashMap<u16, BouncePair>,
    ndr: HashMap<NdrCode, BouncePair>,
    ndr_subject: HashMap<(u16, u16), BounceCode>,
    providers: Vec<ProviderRule>,
}

impl RuleTable {
    /// The built-in rule set
    #[must_use]
    pub fn builtin() -> Self {
        use BounceCode::{
            BadEmailAddress, MailboxFull, MessageTooLarge, NotABounce, PolicyRejection,
            RateLimitedByReceivingMta, ServiceUnavailable, UnableToConnect,
        };
        use BounceType::{Hard, Soft};

        let smtp = [
            (101, Soft, UnableToConnect),
            (111, Soft, UnableToConnect),
            (421, Soft, ServiceUnavailable),
            (450, Soft, BadEmailAddress),
            (452, Soft, MailboxFull),
            (550, Hard, BadEmailAddress),
            (551, Hard, BadEmailAddress),
            (552, Soft, MailboxFull),
            (553, Hard, BadEmailAddress),
        ];

        let ndr = [
            ((4, 2, 1), Soft, RateLimitedByReceivingMta),
            ((4, 3, 2), Soft, ServiceUnavailable),
            ((4, 4, 1), Soft, UnableToConnect),
            ((4, 4, 2), Soft, UnableToConnect),
            ((4, 7, 28), Soft, RateLimitedByReceivingMta),
            ((5, 2, 2), Soft, MailboxFull),
            ((5, 4, 4), Hard, UnableToConnect),
        ];

        let ndr_subject = [
            ((1, 1), BadEmailAddress),
            ((1, 2), BadEmailAddress),
            ((1, 3), BadEmailAddress),
            ((1, 5), NotABounce),
            ((1, 6), BadEmailAddress),
            ((2, 1), BadEmailAddress),
            ((2, 2), MailboxFull),
            ((2, 3), MessageTooLarge),
            ((3, 2), ServiceUnavailable),
            ((3, 4), MessageTooLarge),
            ((4, 1), UnableToConnect),
            ((4, 2), UnableToConnect),
            ((4, 4), UnableToConnect),
            ((7, 1), PolicyRejection),
        ];

        let rate_limited = BouncePair::new(Soft, RateLimitedByReceivingMta);
        let providers = ["(S3140)", "(S3150)", "[TS01]", "[TS02]", "[TS03]"]
            .into_iter()
            .map(|marker| ProviderRule {
                marker: marker.to_string(),
                bounce: rate_limited,
            })
            .collect();

        Self {
            smtp: smtp
                .into_iter()
                .map(|(code, t, c)| (code, BouncePair::new(t, c)))
                .collect(),
            ndr: ndr
                .into_iter()
                .map(|((class, subject, detail), t, c)| {
                    (
                        NdrCode {
                            class,
                            subject,
                            detail,
                        },
                        BouncePair::new(t, c),
                    )
                })
                .collect(),
            ndr_subject: ndr_subject.into_iter().collect(),
            providers,
        }
    }

    fn provider_rule(&self, response_text: &str) -> Option<&ProviderRule> {
        self.providers
            .iter()
            .find(|rule| response_text.contains(rule.marker.as_str()))
    }
}

/// Validates and accumulates rules into a [`RuleTable`]
#[derive(Debug, Default)]
pub struct RuleTableBuilder {
    table: RuleTable,
}

impl RuleTableBuilder {
    /// Start from an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the built-in rules
    #[must_use]
    pub fn with_builtin_rules() -> Self {
        Self {
            table: RuleTable::builtin(),
        }
    }

    pub fn add_smtp_rule(&mut self, code: &str, bounce: BouncePair) -> Result<()> {
        let parsed = parse_smtp_code(code).ok_or_else(|| BounceError::InvalidRule {
            rule: code.to_string(),
            details: "expected a 3-digit SMTP reply code".into(),
        })?;
        self.table.smtp.insert(parsed, bounce);
        Ok(())
    }

    pub fn add_ndr_rule(&mut self, code: &str, bounce: BouncePair) -> Result<()> {
        self.table.ndr.insert(code.parse()?, bounce);
        Ok(())
    }

    pub fn add_ndr_subject_rule(&mut self, key: &str, bounce_code: BounceCode) -> Result<()> {
        let parsed = parse_subject_key(key).ok_or_else(|| BounceError::InvalidRule {
            rule: key.to_string(),
            details: "expected subject.detail".into(),
        })?;
        self.table.ndr_subject.insert(parsed, bounce_code);
        Ok(())
    }

    /// Provider rules are tried in insertion order
    pub fn add_provider_rule(&mut self, marker: &str, bounce: BouncePair) -> Result<()> {
        if marker.is_empty() {
            return Err(BounceError::InvalidRule {
                rule: marker.to_string(),
                details: "provider marker must not be empty".into(),
            });
        }
        self.table.providers.push(ProviderRule {
            marker: marker.to_string(),
            bounce,
        });
        Ok(())
    }

    /// Merge a rule file; its entries replace existing ones with the same key
    pub fn merge(&mut self, file: RuleFile) -> Result<()> {
        for (code, bounce) in &file.smtp {
            self.add_smtp_rule(code, *bounce)?;
        }
        for (code, bounce) in &file.ndr {
            self.add_ndr_rule(code, *bounce)?;
        }
        for (key, bounce_code) in &file.ndr_subject {
            self.add_ndr_subject_rule(key, *bounce_code)?;
        }
        for rule in file.providers {
            self.add_provider_rule(&rule.marker, rule.bounce)?;
        }
        Ok(())
    }

    pub fn merge_json(&mut self, json: &str) -> Result<()> {
        let file: RuleFile =
            serde_json::from_str(json).map_err(|err| BounceError::InvalidRule {
                rule: "rule file".into(),
                details: format!("decoding JSON: {err:#}"),
            })?;
        self.merge(file)
    }

    #[must_use]
    pub fn build(self) -> RuleTable {
        self.table
    }
}

/// Which rule produced a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleSource {
    Provider,
    SmtpExact,
    SmtpClass,
    NdrExact,
    NdrSubject,
    NdrClass,
    Unresolved,
}

/// A classification together with the rule that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub pair: BouncePair,
    pub source: RuleSource,
}

impl Classification {
    const fn new(pair: BouncePair, source: RuleSource) -> Self {
        Self { pair, source }
    }

    const fn unresolved() -> Self {
        Self::new(BouncePair::UNKNOWN, RuleSource::Unresolved)
    }
}

/// Maps extracted codes to a [`BouncePair`]. Cheap to clone; clones share
/// one rule table.
#[derive(Debug, Clone)]
pub struct BounceClassifier {
    rules: Arc<RuleTable>,
}

static BUILTIN_RULES: std::sync::LazyLock<Arc<RuleTable>> =
    std::sync::LazyLock::new(|| Arc::new(RuleTable::builtin()));

/// Shares the built-in rule table, which is built once per process
impl Default for BounceClassifier {
    fn default() -> Self {
        Self::new(Arc::clone(&BUILTIN_RULES))
    }
}

impl BounceClassifier {
    #[must_use]
    pub const fn new(rules: Arc<RuleTable>) -> Self {
        Self { rules }
    }

    #[must_use]
    pub fn rules(&self) -> &Arc<RuleTable> {
        &self.rules
    }

    /// Classify extracted codes. Never fails; unknown input maps to
    /// Unknown/Unknown or a class default.
    ///
    /// `response_text` is the full reply or diagnostic the codes came from and
    /// is searched for provider markers.
    #[must_use]
    pub fn classify(
        &self,
        smtp_code: Option<&str>,
        ndr_code: Option<&str>,
        response_text: &str,
    ) -> BouncePair {
        self.classify_detailed(smtp_code, ndr_code, response_text).pair
    }

    #[must_use]
    pub fn classify_detailed(
        &self,
        smtp_code: Option<&str>,
        ndr_code: Option<&str>,
        response_text: &str,
    ) -> Classification {
        let smtp_code = smtp_code.map(str::trim).filter(|c| !c.is_empty());
        let ndr_code = ndr_code.map(str::trim).filter(|c| !c.is_empty());

        let from_smtp = smtp_code.map(|code| self.classify_smtp(code, response_text));
        let from_ndr = ndr_code.map(|code| self.classify_ndr(code));

        let result = match (from_smtp, from_ndr) {
            (Some(smtp), _) if smtp.source == RuleSource::Provider => smtp,
            (Some(_), Some(ndr)) if ndr.source == RuleSource::NdrExact => ndr,
            (Some(smtp), _) => smtp,
            (None, Some(ndr)) => ndr,
            (None, None) => Classification::unresolved(),
        };

        debug!(
            "Classified smtp={:?} ndr={:?} as {} via {:?}",
            smtp_code, ndr_code, result.pair, result.source
        );
        result
    }

    fn classify_smtp(&self, code: &str, response_text: &str) -> Classification {
        if let Some(rule) = self.rules.provider_rule(response_text) {
            return Classification::new(rule.bounce, RuleSource::Provider);
        }

        if let Some(pair) = parse_smtp_code(code).and_then(|c| self.rules.smtp.get(&c)) {
            return Classification::new(*pair, RuleSource::SmtpExact);
        }

        let pair = match code.chars().next() {
            Some('2' | '3') => BouncePair::new(BounceType::Unknown, BounceCode::NotABounce),
            Some('4') => BouncePair::new(BounceType::Soft, BounceCode::Unknown),
            Some('5') => BouncePair::new(BounceType::Hard, BounceCode::Unknown),
            Some(c) if c.is_ascii_digit() => BouncePair::UNKNOWN,
            _ => return Classification::unresolved(),
        };
        Classification::new(pair, RuleSource::SmtpClass)
    }

    fn classify_ndr(&self, code: &str) -> Classification {
        let Ok(ndr) = code.parse::<NdrCode>() else {
            return Classification::unresolved();
        };

        if let Some(pair) = self.rules.ndr.get(&ndr) {
            return Classification::new(*pair, RuleSource::NdrExact);
        }

        let bounce_type = match ndr.class {
            2 => {
                return Classification::new(
                    BouncePair::new(BounceType::Unknown, BounceCode::NotABounce),
                    RuleSource::NdrClass,
                );
            }
            4 => BounceType::Soft,
            5 => BounceType::Hard,
            _ => return Classification::unresolved(),
        };

        match self.rules.ndr_subject.get(&(ndr.subject, ndr.detail)) {
            Some(bounce_code) => Classification::new(
                BouncePair::new(bounce_type, *bounce_code),
                RuleSource::NdrSubject,
            ),
            None => Classification::new(
                BouncePair::new(bounce_type, BounceCode::Unknown),
                RuleSource::NdrClass,
            ),
        }
    }
}
