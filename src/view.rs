//! Presentation mapping for result payloads.
//!
//! Turns a [`ResultPayload`] into display-ready sections. Findings and protocol
//! summaries carry stable keys so a front end can expand them independently.

use crate::payload::{
    ForensicResult, NetworkResult, ResultPayload, Severity, TrafficAnalysisResult,
    VulnerabilityResult,
};
use std::collections::HashSet;
use std::fmt;

/// Display priority derived from a finding's severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Critical,
    Warning,
    Notice,
    Informational,
}

impl From<&Severity> for Priority {
    fn from(s: &Severity) -> Self {
        match s {
            Severity::High => Priority::Critical,
            Severity::Medium => Priority::Warning,
            Severity::Low => Priority::Notice,
            Severity::Other(_) => Priority::Informational,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::Critical => "critical",
            Priority::Warning => "warning",
            Priority::Notice => "notice",
            Priority::Informational => "info",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRow {
    pub port: u16,
    pub service: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingView {
    pub key: String,
    pub title: String,
    pub priority: Priority,
    pub severity: String,
    pub cve_id: Option<String>,
    pub description: String,
    /// Shown only while expanded.
    pub technical_details: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolView {
    pub key: String,
    pub name: String,
    pub summary: String,
    /// Key/value statistics, shown only while expanded.
    pub stats: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactView {
    pub key: String,
    pub name: String,
    pub details: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section {
    Ports(Vec<PortRow>),
    Findings(Vec<FindingView>),
    Protocols(Vec<ProtocolView>),
    Artifacts { tool: String, items: Vec<ArtifactView> },
}

impl Section {
    pub fn title(&self) -> String {
        match self {
            Section::Ports(_) => "Open ports".into(),
            Section::Findings(_) => "Vulnerabilities".into(),
            Section::Protocols(_) => "Traffic analysis".into(),
            Section::Artifacts { tool, .. } => format!("Forensic artifacts ({tool})"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Section::Ports(v) => v.is_empty(),
            Section::Findings(v) => v.is_empty(),
            Section::Protocols(v) => v.is_empty(),
            Section::Artifacts { items, .. } => items.is_empty(),
        }
    }

    /// Keys of the items in this section that can be expanded.
    pub fn expandable_keys(&self) -> Vec<&str> {
        match self {
            Section::Findings(v) => v.iter().map(|f| f.key.as_str()).collect(),
            Section::Protocols(v) => v.iter().map(|p| p.key.as_str()).collect(),
            Section::Artifacts { items, .. } => items.iter().map(|a| a.key.as_str()).collect(),
            Section::Ports(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultView {
    pub sections: Vec<Section>,
}

impl ResultView {
    pub fn expandable_keys(&self) -> Vec<&str> {
        self.sections
            .iter()
            .flat_map(Section::expandable_keys)
            .collect()
    }
}

/// Which expandable items are currently open. Everything starts collapsed.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    open: HashSet<String>,
}

impl Expansion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything in `view` expanded.
    pub fn all(view: &ResultView) -> Self {
        let mut e = Self::new();
        e.expand_all(view);
        e
    }

    pub fn is_expanded(&self, key: &str) -> bool {
        self.open.contains(key)
    }

    /// Flip one item; returns whether it is now expanded.
    pub fn toggle(&mut self, key: &str) -> bool {
        if self.open.remove(key) {
            false
        } else {
            self.open.insert(key.to_string());
            true
        }
    }

    pub fn expand_all(&mut self, view: &ResultView) {
        self.open
            .extend(view.expandable_keys().into_iter().map(str::to_string));
    }

    pub fn collapse_all(&mut self) {
        self.open.clear();
    }
}

pub fn build_view(payload: &ResultPayload) -> ResultView {
    let sections = match payload {
        ResultPayload::Network(r) => vec![ports_section(r)],
        ResultPayload::Vulnerability(r) => vec![findings_section(r)],
        ResultPayload::TrafficAnalysis(r) => vec![protocols_section(r)],
        ResultPayload::Combined(r) => vec![
            ports_section(&r.network),
            findings_section(&r.vulnerability),
            protocols_section(&r.traffic),
        ],
        ResultPayload::Forensic(r) => vec![artifacts_section(r)],
    };
    ResultView { sections }
}

fn ports_section(r: &NetworkResult) -> Section {
    let rows = r
        .open_ports
        .iter()
        .map(|p| PortRow {
            port: p.port,
            service: p.service.clone(),
            state: p.state.clone(),
        })
        .collect();
    Section::Ports(rows)
}

fn findings_section(r: &VulnerabilityResult) -> Section {
    let findings = r
        .findings
        .iter()
        .enumerate()
        .map(|(i, f)| FindingView {
            key: format!("vuln-{i}"),
            title: f.name.clone(),
            priority: Priority::from(&f.severity),
            severity: f.severity.to_string(),
            cve_id: f.cve_id.clone(),
            description: f.description.clone(),
            technical_details: f.technical_details.clone(),
            recommendation: f.recommendation.clone(),
        })
        .collect();
    Section::Findings(findings)
}

fn protocols_section(r: &TrafficAnalysisResult) -> Section {
    Section::Protocols(
        r.protocols
            .iter()
            .enumerate()
            .map(|(i, p)| ProtocolView {
                key: format!("proto-{i}"),
                name: p.name.clone(),
                summary: format!("{} packets, {} bytes", p.packet_count, p.byte_count),
                stats: p
                    .stats
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            })
            .collect(),
    )
}

fn artifacts_section(r: &ForensicResult) -> Section {
    Section::Artifacts {
        tool: r.tool.clone(),
        items: r
            .artifacts
            .iter()
            .enumerate()
            .map(|(i, a)| ArtifactView {
                key: format!("artifact-{i}"),
                name: a.name.clone(),
                details: a
                    .details
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            })
            .collect(),
    }
}
