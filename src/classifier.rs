//! Field classifier
//!
//! Buckets tokenized header fields into the groups the report and the scorer
//! work from, and extracts authentication verdicts, the SPF record, HELO
//! strings, Received hops and the From/Reply-To addresses.

use crate::error::{token_at, FieldError};
use crate::received::Hop;
use crate::tokenizer::HeaderField;
use serde::{Deserialize, Serialize};

const GENERAL_FIELDS: [&str; 4] = ["Date:", "From:", "To:", "Subject:"];
const OTHER_FIELDS: [&str; 4] = ["MIME-Version:", "Return-Path:", "Reply-To:", "Message-ID:"];

const RECEIVED_SPF: &str = "Received-SPF:";
const SPF_DOMAIN_INDEX: usize = 5;
const SPF_IP_INDEX: usize = 7;

/// Verdicts copied from `Authentication-Results`, absent when never reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    pub spf: Option<String>,
    pub dkim: Option<String>,
    pub dmarc: Option<String>,
}

impl AuthResult {
    pub fn passed(verdict: &Option<String>) -> bool {
        verdict.as_deref() == Some("pass")
    }

    pub fn display(verdict: &Option<String>) -> &str {
        verdict.as_deref().unwrap_or("none")
    }

    fn absorb(&mut self, field: &HeaderField) {
        for token in field.value.split_whitespace() {
            let slot = if token.contains("spf=") {
                &mut self.spf
            } else if token.contains("dkim=") {
                &mut self.dkim
            } else if token.contains("dmarc=") {
                &mut self.dmarc
            } else {
                continue;
            };
            *slot = Some(after_last_equals(token).to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpfRecord {
    pub domain: String,
    pub ip: String,
}

impl SpfRecord {
    fn from_tokens(tokens: &[String]) -> Result<Self, FieldError> {
        let sender = token_at(tokens, SPF_DOMAIN_INDEX, RECEIVED_SPF)?;
        let ip = token_at(tokens, SPF_IP_INDEX, RECEIVED_SPF)?;

        let segments: Vec<&str> = sender.split('.').collect();
        let start = segments.len().saturating_sub(2);

        Ok(Self {
            domain: segments[start..].join("."),
            ip: ip.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPair {
    pub from: Option<String>,
    pub reply_to: Option<String>,
}

impl AddressPair {
    /// True when a Reply-To exists and differs from From.
    pub fn reply_mismatch(&self) -> bool {
        match &self.reply_to {
            Some(reply_to) => self.from.as_ref() != Some(reply_to),
            None => false,
        }
    }
}

/// Everything the chain analyzer and scorer need, built once per document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub general: Vec<HeaderField>,
    pub other: Vec<HeaderField>,
    pub auth: AuthResult,
    pub spf: Option<SpfRecord>,
    pub helo: Vec<String>,
    pub received: Vec<Hop>,
    pub addresses: AddressPair,
    /// Fields skipped because a fixed token position was missing
    pub malformed: Vec<FieldError>,
}

#[derive(Default)]
pub struct FieldClassifier {
    context: AnalysisContext,
    spf_seen: bool,
}

impl FieldClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(fields: &[HeaderField]) -> AnalysisContext {
        let mut classifier = Self::new();
        for field in fields {
            classifier.accept(field);
        }
        classifier.finish()
    }

    pub fn accept(&mut self, field: &HeaderField) {
        let name = field.name.as_str();

        if GENERAL_FIELDS.contains(&name) {
            if name == "From:" {
                self.context.addresses.from = field.last_token().map(strip_angle_brackets);
            }
            self.context.general.push(field.clone());
        } else if OTHER_FIELDS.contains(&name) {
            if name == "Reply-To:" {
                self.context.addresses.reply_to = field.last_token().map(strip_angle_brackets);
            }
            self.context.other.push(field.clone());
        } else if name == "Authentication-Results:" {
            self.context.auth.absorb(field);
        } else if name == RECEIVED_SPF {
            self.accept_received_spf(field);
        } else if name == "Received:" {
            self.accept_received(field);
        }
    }

    fn accept_received_spf(&mut self, field: &HeaderField) {
        let first = !self.spf_seen;
        self.spf_seen = true;

        let tokens = field.tokens();
        match SpfRecord::from_tokens(&tokens) {
            Ok(record) => {
                // Only the first Received-SPF supplies the record
                if first {
                    self.context.spf = Some(record);
                } else {
                    log::debug!("Keeping first Received-SPF record, collecting HELO only");
                }
                self.collect_helo(&tokens, ';');
            }
            Err(e) => {
                log::warn!("Skipping malformed field: {e}");
                self.context.malformed.push(e);
            }
        }
    }

    fn accept_received(&mut self, field: &HeaderField) {
        let hop = Hop::from_field(self.context.received.len(), field);
        match hop.validate() {
            Ok(()) => self.collect_helo(&hop.tokens, ')'),
            Err(e) => {
                log::warn!("Skipping malformed field: {e}");
                self.context.malformed.push(e);
            }
        }
        self.context.received.push(hop);
    }

    fn collect_helo(&mut self, tokens: &[String], terminator: char) {
        self.context.helo.extend(
            tokens
                .iter()
                .filter(|t| t.contains("helo="))
                .map(|t| after_last_equals(t).trim_end_matches(terminator).to_string()),
        );
    }

    pub fn finish(self) -> AnalysisContext {
        self.context
    }
}

fn after_last_equals(token: &str) -> &str {
    token.rsplit('=').next().unwrap_or(token)
}

fn strip_angle_brackets(token: &str) -> String {
    token.trim_matches('<').trim_end_matches('>').to_string()
}
