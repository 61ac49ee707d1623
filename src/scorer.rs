use crate::classifier::{AnalysisContext, AuthResult};
use crate::received::HopAssessment;
use serde::{Deserialize, Serialize};

/// Display anchor for the mark count. Per-occurrence rules may exceed it.
pub const TOTAL_MARKS: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuspicionBand {
    Low,
    Medium,
    High,
}

impl SuspicionBand {
    pub fn from_marks(marks: usize) -> Self {
        match marks {
            m if m < 2 => SuspicionBand::Low,
            m if m < TOTAL_MARKS / 2 => SuspicionBand::Medium,
            _ => SuspicionBand::High,
        }
    }
}

/// Marks and the notes explaining them, one note per mark.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictSet {
    marks: usize,
    notes: Vec<String>,
}

impl VerdictSet {
    fn flag(&mut self, note: &str) {
        self.marks += 1;
        self.notes.push(note.to_string());
    }

    pub fn marks(&self) -> usize {
        self.marks
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn band(&self) -> SuspicionBand {
        SuspicionBand::from_marks(self.marks)
    }
}

pub struct TrustScorer;

impl TrustScorer {
    /// Apply every rule in report order: authentication, HELO, hops, reply address.
    pub fn score(context: &AnalysisContext, chain: &[HopAssessment]) -> VerdictSet {
        let mut verdict = VerdictSet::default();

        let auth = &context.auth;
        for (verdict_value, note) in [
            (&auth.spf, "SPF not passed."),
            (&auth.dkim, "DKIM not passed."),
            (&auth.dmarc, "DMARC not passed."),
        ] {
            if !AuthResult::passed(verdict_value) {
                verdict.flag(note);
            }
        }

        for helo in &context.helo {
            if !helo.contains('.') {
                verdict.flag("HELO string without domain.");
            }
        }

        for assessment in chain {
            if let Some(note) = assessment.category.note() {
                verdict.flag(note);
            }
        }

        if context.addresses.reply_mismatch() {
            verdict.flag("REPLY address not same as FROM.");
        }

        log::debug!(
            "Scored {} marks ({:?})",
            verdict.marks(),
            verdict.band()
        );
        verdict
    }
}
