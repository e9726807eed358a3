//! Text summary builder for CLI output.
//!
//! Formats a job header and its result view as human-readable lines for text mode.

use crate::model::Job;
use crate::view::{Expansion, ResultView, Section};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

pub(crate) fn job_header(job: &Job) -> String {
    let mut line = format!(
        "[{}] {} {} ({})",
        job.id, job.category, job.target, job.status
    );
    if let Some(ports) = job.parameters.ports.as_deref() {
        line.push_str(&format!(" ports={ports}"));
    }
    if let Some(d) = job.parameters.duration {
        line.push_str(&format!(" duration={}", humantime::format_duration(d)));
    }
    line
}

/// Build a text summary for a job and its rendered results.
///
/// Only items open in `expansion` show their details.
pub(crate) fn build_text_summary(
    job: &Job,
    view: &ResultView,
    expansion: &Expansion,
) -> TextSummary {
    let mut lines = vec![job_header(job)];
    lines.extend(render_sections(view, expansion));
    TextSummary { lines }
}

pub(crate) fn render_sections(view: &ResultView, expansion: &Expansion) -> Vec<String> {
    let mut lines = Vec::new();
    for section in &view.sections {
        lines.push(format!("  {}:", section.title()));
        if section.is_empty() {
            lines.push("    no data".into());
            continue;
        }
        match section {
            Section::Ports(rows) => {
                for r in rows {
                    lines.push(format!("    {:>5}  {:<8} {}", r.port, r.state, r.service));
                }
            }
            Section::Findings(findings) => {
                for f in findings {
                    let cve = f
                        .cve_id
                        .as_deref()
                        .map(|c| format!(" [{c}]"))
                        .unwrap_or_default();
                    lines.push(format!("    [{}] {}{cve}", f.priority, f.title));
                    if !f.description.is_empty() {
                        lines.push(format!("      {}", f.description));
                    }
                    if expansion.is_expanded(&f.key) {
                        if !f.technical_details.is_empty() {
                            lines.push(format!("      details: {}", f.technical_details));
                        }
                        if !f.recommendation.is_empty() {
                            lines.push(format!("      fix: {}", f.recommendation));
                        }
                    }
                }
            }
            Section::Protocols(protocols) => {
                for p in protocols {
                    lines.push(format!("    {}: {}", p.name, p.summary));
                    if expansion.is_expanded(&p.key) {
                        for (k, v) in &p.stats {
                            lines.push(format!("      {k}: {v}"));
                        }
                    }
                }
            }
            Section::Artifacts { items, .. } => {
                for a in items {
                    lines.push(format!("    {}", a.name));
                    if expansion.is_expanded(&a.key) {
                        for (k, v) in &a.details {
                            lines.push(format!("      {k}: {v}"));
                        }
                    }
                }
            }
        }
    }
    lines
}
