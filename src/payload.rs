//! Typed result payloads, one shape per job category.
//!
//! Payloads are built from the backend's loosely-typed result blobs at the gateway
//! boundary (see `gateway::wire`); nothing downstream ever touches raw JSON.

use crate::model::{ForensicTool, JobCategory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultPayload {
    Network(NetworkResult),
    Vulnerability(VulnerabilityResult),
    TrafficAnalysis(TrafficAnalysisResult),
    /// `full` scans carry every section.
    Combined(CombinedResult),
    Forensic(ForensicResult),
}

impl ResultPayload {
    /// Whether this payload is the shape produced for `category`.
    pub fn matches(&self, category: JobCategory) -> bool {
        match (self, category) {
            (ResultPayload::Network(_), JobCategory::Network) => true,
            (ResultPayload::Vulnerability(_), JobCategory::Vulnerability) => true,
            (ResultPayload::TrafficAnalysis(_), JobCategory::NetworkAnalysis) => true,
            (
                ResultPayload::TrafficAnalysis(_),
                JobCategory::Forensic(ForensicTool::NetworkTraffic),
            ) => true,
            (ResultPayload::Combined(_), JobCategory::Full) => true,
            (ResultPayload::Forensic(r), JobCategory::Forensic(tool)) => r.tool == tool.as_str(),
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResultPayload::Network(_) => "network",
            ResultPayload::Vulnerability(_) => "vulnerability",
            ResultPayload::TrafficAnalysis(_) => "traffic_analysis",
            ResultPayload::Combined(_) => "combined",
            ResultPayload::Forensic(_) => "forensic",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkResult {
    #[serde(default)]
    pub open_ports: Vec<OpenPort>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPort {
    pub port: u16,
    pub service: String,
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilityResult {
    #[serde(default)]
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub name: String,
    pub severity: Severity,
    #[serde(default)]
    pub cve_id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub technical_details: String,
    #[serde(default)]
    pub recommendation: String,
}

/// Backend severity label. Anything outside high/medium/low is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    High,
    Medium,
    Low,
    Other(String),
}

impl From<String> for Severity {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Severity::High,
            "medium" => Severity::Medium,
            "low" => Severity::Low,
            _ => Severity::Other(s),
        }
    }
}

impl From<Severity> for String {
    fn from(s: Severity) -> Self {
        s.to_string()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::High => f.write_str("high"),
            Severity::Medium => f.write_str("medium"),
            Severity::Low => f.write_str("low"),
            Severity::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficAnalysisResult {
    #[serde(default)]
    pub protocols: Vec<ProtocolSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSummary {
    pub name: String,
    pub packet_count: u64,
    pub byte_count: u64,
    #[serde(default)]
    pub stats: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedResult {
    #[serde(default)]
    pub network: NetworkResult,
    #[serde(default)]
    pub vulnerability: VulnerabilityResult,
    #[serde(default)]
    pub traffic: TrafficAnalysisResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForensicResult {
    pub tool: String,
    #[serde(default)]
    pub artifacts: Vec<ForensicArtifact>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForensicArtifact {
    pub name: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_is_case_insensitive_and_keeps_unknown_labels() {
        assert_eq!(Severity::from("HIGH".to_string()), Severity::High);
        assert_eq!(Severity::from("Medium".to_string()), Severity::Medium);
        assert_eq!(
            Severity::from("info".to_string()),
            Severity::Other("info".into())
        );
        assert_eq!(
            Severity::from("CRITICAL".to_string()),
            Severity::Other("CRITICAL".into())
        );
        assert_eq!(Severity::from("moderate".to_string()).to_string(), "moderate");
    }

    #[test]
    fn payload_tag_must_match_category() {
        let net = ResultPayload::Network(NetworkResult::default());
        assert!(net.matches(JobCategory::Network));
        assert!(!net.matches(JobCategory::Vulnerability));

        let traffic = ResultPayload::TrafficAnalysis(TrafficAnalysisResult::default());
        assert!(traffic.matches(JobCategory::NetworkAnalysis));
        assert!(traffic.matches(JobCategory::Forensic(ForensicTool::NetworkTraffic)));

        let forensic = ResultPayload::Forensic(ForensicResult {
            tool: "processes".into(),
            artifacts: Vec::new(),
        });
        assert!(forensic.matches(JobCategory::Forensic(ForensicTool::Processes)));
        assert!(!forensic.matches(JobCategory::Forensic(ForensicTool::Files)));
    }
}
