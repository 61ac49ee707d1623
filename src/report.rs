use crate::analysis::Analysis;
use crate::classifier::AuthResult;
use crate::ip_info::{GeoDetail, PROFILE_KEYS};
use crate::received::{HopAssessment, HopCategory};
use crate::scorer::{SuspicionBand, TOTAL_MARKS};

const RED: &str = "\x1b[31m";
const RED_BOLD: &str = "\x1b[31m\x1b[1m";
const BLUE_BOLD: &str = "\x1b[34m\x1b[1m";
const ORANGE_BOLD: &str = "\x1b[33m\x1b[1m";
const END: &str = "\x1b[0m";

const GEO_INDENT: &str = "  |                  ";
const AUX_INDENT: &str = "  |              ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Alert,
    Failed,
    Notice,
    Highlight,
}

impl Tone {
    fn code(self) -> &'static str {
        match self {
            Tone::Alert => RED,
            Tone::Failed => RED_BOLD,
            Tone::Notice => ORANGE_BOLD,
            Tone::Highlight => BLUE_BOLD,
        }
    }
}

/// Renders an [`Analysis`] as the sectioned text report.
pub struct ReportPresenter {
    color: bool,
}

impl ReportPresenter {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn paint(&self, text: &str, tone: Tone) -> String {
        if self.color {
            format!("{}{}{}", tone.code(), text, END)
        } else {
            text.to_string()
        }
    }

    /// `geo` is aligned with `analysis.chain`; it may be shorter when
    /// lookups were skipped.
    pub fn render(&self, analysis: &Analysis, geo: &[Option<GeoDetail>]) -> String {
        let ctx = &analysis.context;
        let mut out: Vec<String> = Vec::new();

        out.push("[General info]".to_string());
        out.extend(ctx.general.iter().map(|f| format!("  {}", f.line())));

        out.push(String::new());
        out.push("[Other info]".to_string());
        out.extend(ctx.other.iter().map(|f| format!("  {}", f.line())));

        out.push(String::new());
        out.push("[Authentication]".to_string());
        for (label, verdict) in [
            ("SPF", &ctx.auth.spf),
            ("DKIM", &ctx.auth.dkim),
            ("DMARC", &ctx.auth.dmarc),
        ] {
            let shown = AuthResult::display(verdict);
            if AuthResult::passed(verdict) {
                out.push(format!("  {label}: {shown}"));
            } else {
                out.push(format!("  {label}: {}", self.paint(shown, Tone::Failed)));
            }
        }

        out.push(String::new());
        out.push("[HELO strings]".to_string());
        for helo in &ctx.helo {
            let tone = if helo.contains('.') {
                Tone::Highlight
            } else {
                Tone::Failed
            };
            out.push(format!("  HELO: {}", self.paint(helo, tone)));
        }

        out.push(String::new());
        out.push("[Received-SPF]".to_string());
        match &ctx.spf {
            Some(spf) => out.push(format!(
                "  Received-SPF: {} ({})",
                self.paint(&spf.domain, Tone::Highlight),
                spf.ip
            )),
            None => out.push("  Received-SPF: none".to_string()),
        }

        out.push(String::new());
        out.push("[Email path through network]".to_string());
        out.push("  |-(Receiver)".to_string());
        for (index, assessment) in analysis.chain.iter().enumerate() {
            let detail = geo.get(index).and_then(Option::as_ref);
            self.render_hop(&mut out, assessment, detail);
        }
        out.push("  |-(Sender)".to_string());

        out.push(String::new());
        out.push("[Verdict]".to_string());
        let verdict = &analysis.verdict;
        let tone = match verdict.band() {
            SuspicionBand::Low => Tone::Highlight,
            SuspicionBand::Medium => Tone::Notice,
            SuspicionBand::High => Tone::Failed,
        };
        out.push(format!(
            "  {}",
            self.paint(
                &format!("Number of suspect features: {}/{}", verdict.marks(), TOTAL_MARKS),
                tone
            )
        ));
        out.extend(verdict.notes().iter().map(|note| format!("  - {note}")));
        out.extend(
            ctx.malformed
                .iter()
                .map(|e| format!("  ! Skipped malformed field: {e}")),
        );

        out.push(String::new());
        let body = &analysis.document.body;
        if !body.base64_present {
            out.push("No embedded base64 encodings.".to_string());
        } else if body.decode().is_empty() {
            out.push("Embedded base64 encoding found, no viewable content.".to_string());
        } else {
            out.push("Embedded base64 encoding found.".to_string());
        }

        let mut text = out.join("\n");
        text.push('\n');
        text
    }

    fn render_hop(&self, out: &mut Vec<String>, assessment: &HopAssessment, detail: Option<&GeoDetail>) {
        let tokens = &assessment.hop.tokens;
        let token = |i: usize| tokens.get(i).map(String::as_str).unwrap_or("");
        let label = format!("{} {}:", token(0), token(1));
        let aux_line = || {
            assessment
                .hop
                .auxiliary_pair()
                .map(|(key, value)| format!("{AUX_INDENT}{key}: {value}"))
        };

        match &assessment.category {
            HopCategory::BareIpSource => {
                let ip = assessment.lookup_ip.as_deref().unwrap_or("");
                out.push(format!(
                    "  |  {}",
                    self.paint(&format!("{label} Source without URL --> {ip}"), Tone::Failed)
                ));
                self.render_geo(out, detail, true);
            }
            HopCategory::Resolvable | HopCategory::SpfDomainMismatch | HopCategory::HeloMismatch => {
                let tone = if assessment.category.is_signal() {
                    Tone::Failed
                } else {
                    Tone::Highlight
                };
                out.push(format!("  |  {label} {} {}", self.paint(token(2), tone), token(3)));
                out.extend(aux_line());
                self.render_geo(out, detail, false);
            }
            HopCategory::LocalhostSource => {
                out.push(format!(
                    "  |  {}",
                    self.paint(&format!("{label} Source without URL --> {}", token(2)), Tone::Notice)
                ));
            }
            HopCategory::Plain => {
                out.push(format!("  |  {label} {}", token(2)));
                out.extend(aux_line());
            }
            HopCategory::Malformed(e) => {
                let line = format!("{} (unparseable: {e})", tokens.join(" "));
                out.push(format!("  |  {}", self.paint(&line, Tone::Notice)));
            }
        }
    }

    fn render_geo(&self, out: &mut Vec<String>, detail: Option<&GeoDetail>, alert: bool) {
        match detail {
            None => {}
            Some(GeoDetail::Bogon) => out.push(format!(
                "{GEO_INDENT}{}",
                self.paint("IP: Bogon address reserved for special use.", Tone::Notice)
            )),
            Some(GeoDetail::Unavailable) => {
                out.push(format!("{GEO_INDENT}No additional detail available."))
            }
            Some(GeoDetail::Profile(profile)) => {
                for key in PROFILE_KEYS {
                    if key == "ip" && !alert {
                        continue;
                    }
                    let value = if key == "org" {
                        profile.organisation()
                    } else {
                        profile.get(key)
                    };
                    let Some(value) = value else { continue };
                    let line = format!("{key} = {value}");
                    if alert {
                        out.push(format!("{GEO_INDENT}{}", self.paint(&line, Tone::Alert)));
                    } else {
                        out.push(format!("{GEO_INDENT}{line}"));
                    }
                }
            }
        }
    }
}
