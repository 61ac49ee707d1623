//! Analysis pipeline: tokenize, classify, walk the Received chain, score.
//!
//! The core is synchronous and pure. Geolocation is a separate step that
//! awaits one lookup at a time, in hop order.

use crate::classifier::{AnalysisContext, FieldClassifier};
use crate::ip_info::{GeoDetail, IpInfoClient};
use crate::received::{HopAssessment, ReceivedChainAnalyzer};
use crate::scorer::{TrustScorer, VerdictSet};
use crate::tokenizer::{HeaderTokenizer, TokenizedDocument};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub document: TokenizedDocument,
    pub context: AnalysisContext,
    /// Sending-side hops, receiver first
    pub chain: Vec<HopAssessment>,
    pub verdict: VerdictSet,
}

impl Analysis {
    pub fn from_text(raw: &str) -> Self {
        let document = HeaderTokenizer::tokenize(raw);
        let context = FieldClassifier::classify(&document.fields);
        let chain = ReceivedChainAnalyzer::new(context.spf.as_ref(), &context.helo)
            .analyze(&context.received);
        let verdict = TrustScorer::score(&context, &chain);

        log::info!(
            "Analyzed {} fields, {} hops, {} marks",
            document.fields.len(),
            chain.len(),
            verdict.marks()
        );

        Self {
            document,
            context,
            chain,
            verdict,
        }
    }

    /// Read and analyze a header file. A missing file is fatal.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            anyhow::bail!("No such file: {}", path.display());
        }
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read header file: {}", path.display()))?;
        Ok(Self::from_text(&String::from_utf8_lossy(&bytes)))
    }

    /// Geolocation detail per chain entry, aligned with `self.chain`.
    pub async fn locate(&self, client: &IpInfoClient) -> Vec<Option<GeoDetail>> {
        let mut details = Vec::with_capacity(self.chain.len());
        for assessment in &self.chain {
            let detail = match &assessment.lookup_ip {
                Some(ip) => Some(client.lookup(ip).await),
                None => None,
            };
            details.push(detail);
        }
        details
    }
}
