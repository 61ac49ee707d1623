//! Received chain analysis
//!
//! Each `Received:` field becomes a [`Hop`]. Hops are read at fixed token
//! offsets of the whitespace-split record:
//!
//! | index | content                                  |
//! |-------|------------------------------------------|
//! | 0     | `Received:` label                        |
//! | 1     | relation keyword (`from`, `by`, ...)     |
//! | 2     | claimed host, possibly `[a.b.c.d]`       |
//! | 3     | parenthesised literal, e.g. `(a.b.c.d)`  |
//! | 4, 5  | auxiliary key/value pair                 |
//! | 6..   | trailing tokens (timestamp etc.)         |

use crate::classifier::SpfRecord;
use crate::error::{token_at, FieldError};
use crate::tokenizer::HeaderField;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref IPV4_LITERAL: Regex = Regex::new(r"^(\d{1,3}\.){3}\d{1,3}$").unwrap();
}

const RECEIVED: &str = "Received:";
const RELATION_BY: &str = "by";
/// Tokens a non-`by` hop needs for classification (indices 0..=3)
const MIN_CLASSIFIABLE_TOKENS: usize = 4;

pub fn is_ipv4_literal(candidate: &str) -> bool {
    IPV4_LITERAL.is_match(candidate)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    /// Position in the sequence of `Received:` fields, newest first
    pub ordinal: usize,
    pub tokens: Vec<String>,
}

impl Hop {
    pub fn from_field(ordinal: usize, field: &HeaderField) -> Self {
        Self {
            ordinal,
            tokens: field.tokens(),
        }
    }

    pub fn relation_keyword(&self) -> Result<&str, FieldError> {
        token_at(&self.tokens, 1, RECEIVED)
    }

    pub fn claimed_host(&self) -> Result<&str, FieldError> {
        token_at(&self.tokens, 2, RECEIVED)
    }

    pub fn bracketed_address(&self) -> Result<&str, FieldError> {
        token_at(&self.tokens, 3, RECEIVED)
    }

    pub fn auxiliary_pair(&self) -> Option<(&str, &str)> {
        match (self.tokens.get(4), self.tokens.get(5)) {
            (Some(key), Some(value)) => Some((key.as_str(), value.as_str())),
            _ => None,
        }
    }

    pub fn timestamp_tokens(&self) -> &[String] {
        self.tokens.get(6..).unwrap_or(&[])
    }

    /// `by` hops describe the receiving side only and never score.
    pub fn is_receiving_side(&self) -> bool {
        self.relation_keyword() == Ok(RELATION_BY)
    }

    /// Checks that every fixed position the classifier reads is present.
    pub fn validate(&self) -> Result<(), FieldError> {
        if self.relation_keyword()? == RELATION_BY {
            return Ok(());
        }
        token_at(&self.tokens, MIN_CLASSIFIABLE_TOKENS - 1, RECEIVED).map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HopCategory {
    /// Relay announced an IPv4 literal instead of a hostname
    BareIpSource,
    /// Connection IP is known and consistent with the SPF record
    Resolvable,
    SpfDomainMismatch,
    HeloMismatch,
    LocalhostSource,
    Plain,
    /// Too few tokens to classify; shown but never scored
    Malformed(FieldError),
}

impl HopCategory {
    pub fn is_signal(&self) -> bool {
        matches!(
            self,
            HopCategory::BareIpSource
                | HopCategory::SpfDomainMismatch
                | HopCategory::HeloMismatch
                | HopCategory::LocalhostSource
        )
    }

    /// Verdict note for categories that carry a mark.
    pub fn note(&self) -> Option<&'static str> {
        match self {
            HopCategory::BareIpSource => Some("Received from without domain name."),
            HopCategory::SpfDomainMismatch => Some("Received from not same domain as SPF."),
            HopCategory::HeloMismatch => Some("Received from domain not in HELO."),
            HopCategory::LocalhostSource => Some("Received from localhost."),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopAssessment {
    pub hop: Hop,
    pub category: HopCategory,
    /// IP to hand to the geolocation collaborator, in hop order
    pub lookup_ip: Option<String>,
}

pub struct ReceivedChainAnalyzer<'a> {
    spf: Option<&'a SpfRecord>,
    helo: &'a [String],
}

impl<'a> ReceivedChainAnalyzer<'a> {
    pub fn new(spf: Option<&'a SpfRecord>, helo: &'a [String]) -> Self {
        Self { spf, helo }
    }

    /// Classify every sending-side hop, preserving newest-first order.
    pub fn analyze(&self, hops: &[Hop]) -> Vec<HopAssessment> {
        hops.iter()
            .filter(|hop| !hop.is_receiving_side())
            .map(|hop| {
                let (category, lookup_ip) = match self.classify(hop) {
                    Ok(result) => result,
                    Err(e) => {
                        log::debug!("Hop {} left unclassified: {e}", hop.ordinal);
                        (HopCategory::Malformed(e), None)
                    }
                };
                log::debug!("Hop {} classified as {:?}", hop.ordinal, category);
                HopAssessment {
                    hop: hop.clone(),
                    category,
                    lookup_ip,
                }
            })
            .collect()
    }

    fn classify(&self, hop: &Hop) -> Result<(HopCategory, Option<String>), FieldError> {
        hop.validate()?;
        let host = hop.claimed_host()?;
        let literal = hop.bracketed_address()?;

        let host_ip = host.trim_matches('[').trim_end_matches(']');
        if is_ipv4_literal(host_ip) {
            return Ok((HopCategory::BareIpSource, Some(host_ip.to_string())));
        }

        let connect_ip = literal.trim_matches('(').trim_end_matches(')');
        if is_ipv4_literal(connect_ip) {
            let category = match self.spf {
                Some(spf) if spf.ip == connect_ip => {
                    if !host.contains(spf.domain.as_str()) {
                        HopCategory::SpfDomainMismatch
                    } else if !self.helo.iter().any(|h| h.as_str() == host) {
                        HopCategory::HeloMismatch
                    } else {
                        HopCategory::Resolvable
                    }
                }
                _ => HopCategory::Resolvable,
            };
            return Ok((category, Some(connect_ip.to_string())));
        }

        if host.contains("localhost") {
            return Ok((HopCategory::LocalhostSource, None));
        }

        Ok((HopCategory::Plain, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(ordinal: usize, line: &str) -> Hop {
        let (name, value) = line.split_once(' ').unwrap();
        Hop::from_field(
            ordinal,
            &HeaderField {
                name: name.to_string(),
                value: value.to_string(),
            },
        )
    }

    fn spf() -> SpfRecord {
        SpfRecord {
            domain: "example.com".to_string(),
            ip: "10.0.0.1".to_string(),
        }
    }

    fn classify_one(line: &str, helo: &[String]) -> HopAssessment {
        let spf = spf();
        let analyzer = ReceivedChainAnalyzer::new(Some(&spf), helo);
        let mut result = analyzer.analyze(&[hop(0, line)]);
        assert_eq!(result.len(), 1);
        result.remove(0)
    }

    #[test]
    fn test_ipv4_literal() {
        assert!(is_ipv4_literal("8.8.8.8"));
        assert!(is_ipv4_literal("192.168.100.200"));
        assert!(!is_ipv4_literal("8.8.8"));
        assert!(!is_ipv4_literal("mail.example.com"));
        assert!(!is_ipv4_literal("1.2.3.4a"));
    }

    #[test]
    fn test_hop_positions() {
        let h = hop(
            0,
            "Received: from mail.example.com (10.0.0.1) with ESMTPS id abc; Mon, 1 Jan 2024",
        );
        assert_eq!(h.relation_keyword(), Ok("from"));
        assert_eq!(h.claimed_host(), Ok("mail.example.com"));
        assert_eq!(h.bracketed_address(), Ok("(10.0.0.1)"));
        assert_eq!(h.auxiliary_pair(), Some(("with", "ESMTPS")));
        assert_eq!(h.timestamp_tokens().len(), 6);
    }

    #[test]
    fn test_bare_ip_source() {
        let a = classify_one("Received: from [8.8.8.8] (10.0.0.1) by mx.example.org", &[]);
        assert_eq!(a.category, HopCategory::BareIpSource);
        assert_eq!(a.lookup_ip.as_deref(), Some("8.8.8.8"));
    }

    #[test]
    fn test_spf_domain_mismatch() {
        let a = classify_one("Received: from mail.unknown.net (10.0.0.1) by mx", &[]);
        assert_eq!(a.category, HopCategory::SpfDomainMismatch);
        assert_eq!(a.lookup_ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_helo_mismatch() {
        let helo = vec!["other.example.com".to_string()];
        let a = classify_one("Received: from mail.example.com (10.0.0.1) by mx", &helo);
        assert_eq!(a.category, HopCategory::HeloMismatch);
    }

    #[test]
    fn test_clean_resolvable() {
        let helo = vec!["mail.example.com".to_string()];
        let a = classify_one("Received: from mail.example.com (10.0.0.1) by mx", &helo);
        assert_eq!(a.category, HopCategory::Resolvable);
        assert!(!a.category.is_signal());
        assert_eq!(a.lookup_ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_resolvable_other_ip_is_clean() {
        let a = classify_one("Received: from mail.unknown.net (10.9.9.9) by mx", &[]);
        assert_eq!(a.category, HopCategory::Resolvable);
        assert_eq!(a.lookup_ip.as_deref(), Some("10.9.9.9"));
    }

    #[test]
    fn test_localhost_source() {
        let a = classify_one("Received: from localhost (localhost [127.0.0.1]) by mx", &[]);
        assert_eq!(a.category, HopCategory::LocalhostSource);
        assert_eq!(a.lookup_ip, None);
    }

    #[test]
    fn test_plain_hop() {
        let a = classify_one(
            "Received: from mail.example.com (mail.example.com [10.0.0.1]) by mx",
            &[],
        );
        assert_eq!(a.category, HopCategory::Plain);
        assert_eq!(a.category.note(), None);
    }

    #[test]
    fn test_by_hops_are_excluded() {
        let analyzer = ReceivedChainAnalyzer::new(None, &[]);
        let hops = vec![
            hop(0, "Received: by 2002:a05:6402::1 with SMTP id x;"),
            hop(1, "Received: by localhost"),
            hop(2, "Received: from localhost (localhost) by mx"),
        ];
        let result = analyzer.analyze(&hops);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].hop.ordinal, 2);
    }

    #[test]
    fn test_short_hop_is_malformed() {
        let a = classify_one("Received: from [8.8.8.8]", &[]);
        assert!(matches!(a.category, HopCategory::Malformed(_)));
        assert!(!a.category.is_signal());
        assert_eq!(a.lookup_ip, None);
    }
}
