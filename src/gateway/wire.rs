//! Wire formats of the analysis service and their conversion into typed models.

use crate::error::ClientError;
use crate::gateway::SubmitRequest;
use crate::model::{
    ForensicTool, Job, JobCategory, JobId, JobParameters, JobStatus, ResultsRef, ScanProfile,
};
use crate::payload::{
    CombinedResult, Finding, ForensicArtifact, ForensicResult, NetworkResult, OpenPort,
    ProtocolSummary, ResultPayload, Severity, TrafficAnalysisResult, VulnerabilityResult,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum SubmitBody<'a> {
    Scan {
        scan_type: &'a str,
        target: &'a str,
        parameters: Map<String, Value>,
    },
    Forensic {
        tool: &'a str,
        path: &'a str,
    },
}

impl<'a> SubmitBody<'a> {
    pub(crate) fn from_request(req: &'a SubmitRequest) -> Self {
        match req.category {
            JobCategory::Forensic(tool) => SubmitBody::Forensic {
                tool: tool.as_str(),
                path: &req.target,
            },
            category => SubmitBody::Scan {
                scan_type: category.as_str(),
                target: &req.target,
                parameters: parameters_to_wire(&req.parameters),
            },
        }
    }
}

fn parameters_to_wire(p: &JobParameters) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(ports) = &p.ports {
        out.insert("ports".into(), Value::from(ports.as_str()));
    }
    if let Some(d) = p.duration {
        out.insert("duration".into(), Value::from(d.as_secs()));
    }
    if let Some(profile) = p.profile {
        out.insert("scan_type".into(), serde_json::to_value(profile).unwrap_or(Value::Null));
    }
    if !p.scripts.is_empty() {
        out.insert("scripts".into(), Value::from(p.scripts.clone()));
    }
    out
}

fn parameters_from_wire(v: &Value) -> JobParameters {
    let Some(obj) = v.as_object() else {
        return JobParameters::default();
    };
    JobParameters {
        ports: obj.get("ports").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }),
        duration: obj
            .get("duration")
            .and_then(Value::as_u64)
            .map(Duration::from_secs),
        profile: obj
            .get("scan_type")
            .and_then(|v| serde_json::from_value::<ScanProfile>(v.clone()).ok()),
        scripts: obj
            .get("scripts")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|s| s.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
    }
}

/// Job snapshot as returned by submit and status endpoints of both route families.
#[derive(Debug, Deserialize)]
pub(crate) struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    #[serde(default)]
    pub scan_type: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default, alias = "created_at")]
    pub started_at: Option<String>,
    #[serde(default)]
    pub report_id: Option<Value>,
}

impl JobSnapshot {
    /// Convert into a `Job` for a job of `expected` category.
    ///
    /// Fields the backend omits are left empty (`target`) or defaulted; the registry
    /// keeps the submitted values for tracked jobs.
    pub(crate) fn into_job(self, expected: JobCategory) -> Result<Job, ClientError> {
        let reported = self.scan_type.as_deref().or(self.tool.as_deref());
        if let Some(reported) = reported {
            match reported.parse::<JobCategory>() {
                Ok(c) if c != expected => {
                    return Err(ClientError::Server {
                        status: None,
                        detail: format!(
                            "job {} reported as '{reported}', expected '{expected}'",
                            self.id
                        ),
                    });
                }
                _ => {}
            }
        }

        let results_ref = if self.status == JobStatus::Completed {
            let report = self.report_id.as_ref().and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
            Some(ResultsRef(report.unwrap_or_else(|| self.id.to_string())))
        } else {
            None
        };

        Ok(Job {
            target: self.target.or(self.path).unwrap_or_default(),
            parameters: self
                .parameters
                .as_ref()
                .map(parameters_from_wire)
                .unwrap_or_default(),
            created_at: self
                .started_at
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_else(OffsetDateTime::now_utc),
            id: self.id,
            category: expected,
            status: self.status,
            results_ref,
        })
    }
}

/// Accepts RFC 3339 and the naive ISO timestamps the backend emits (taken as UTC).
pub(crate) fn parse_timestamp(s: &str) -> Option<OffsetDateTime> {
    use time::format_description::well_known::Rfc3339;
    if let Ok(t) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(t);
    }
    let naive = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    PrimitiveDateTime::parse(s, naive)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// Extract the human-readable `detail` from an error body.
pub(crate) fn error_detail(body: &[u8]) -> Option<String> {
    let v: Value = serde_json::from_slice(body).ok()?;
    match v.get("detail")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let msgs: Vec<String> = items
                .iter()
                .filter_map(|i| i.get("msg").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            (!msgs.is_empty()).then(|| msgs.join("; "))
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// `null` reads the same as a missing key.
fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Float(f64),
        Str(String),
        Null,
    }
    Ok(match Raw::deserialize(d)? {
        Raw::Num(n) => n,
        Raw::Float(f) if f >= 0.0 => f as u64,
        Raw::Str(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_port<'de, D: Deserializer<'de>>(d: D) -> Result<u16, D::Error> {
    let n = lenient_u64(d)?;
    u16::try_from(n).map_err(|_| serde::de::Error::custom(format!("port {n} out of range")))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawService {
    Name(String),
    Detail {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        product: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
}

impl RawService {
    fn label(self) -> String {
        let label = match self {
            RawService::Name(s) => s,
            RawService::Detail {
                name,
                product,
                version,
            } => [name, product, version]
                .into_iter()
                .flatten()
                .filter(|s| !s.trim().is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        };
        if label.trim().is_empty() {
            "unknown".into()
        } else {
            label
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPort {
    #[serde(alias = "number", deserialize_with = "lenient_port")]
    port: u16,
    #[serde(default)]
    service: Option<RawService>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawNetwork {
    #[serde(default, deserialize_with = "null_as_default")]
    open_ports: Vec<RawPort>,
}

#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(default, deserialize_with = "null_as_default")]
    name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    severity: String,
    #[serde(default)]
    cve_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    technical_details: String,
    #[serde(default, deserialize_with = "null_as_default")]
    recommendation: String,
}

#[derive(Debug, Deserialize)]
struct RawProtocol {
    #[serde(default, deserialize_with = "null_as_default")]
    name: String,
    #[serde(default, alias = "packet_count", deserialize_with = "lenient_u64")]
    packets: u64,
    #[serde(default, alias = "byte_count", deserialize_with = "lenient_u64")]
    bytes: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    stats: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTraffic {
    #[serde(default, deserialize_with = "null_as_default")]
    protocols: Vec<RawProtocol>,
}

#[derive(Debug, Default, Deserialize)]
struct RawResults {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    network: Option<RawNetwork>,
    #[serde(default)]
    vulnerabilities: Option<Vec<RawFinding>>,
    #[serde(default)]
    network_analysis: Option<RawTraffic>,
    #[serde(default)]
    artifacts: Option<Vec<Map<String, Value>>>,
    #[serde(default)]
    results: Option<Value>,
}

impl RawResults {
    fn has_sections(&self) -> bool {
        self.network.is_some()
            || self.vulnerabilities.is_some()
            || self.network_analysis.is_some()
            || self.artifacts.is_some()
    }

    /// Some deployments wrap the sections in a `{ status, results: {...} }` envelope.
    fn unwrap_envelope(self) -> Self {
        if self.has_sections() {
            return self;
        }
        match self
            .results
            .clone()
            .and_then(|v| serde_json::from_value::<RawResults>(v).ok())
        {
            Some(inner) if inner.has_sections() => RawResults {
                status: self.status,
                ..inner
            },
            _ => self,
        }
    }

    fn network(&mut self) -> NetworkResult {
        let ports = self.network.take().unwrap_or_default().open_ports;
        NetworkResult {
            open_ports: ports
                .into_iter()
                .map(|p| OpenPort {
                    port: p.port,
                    service: p.service.map(RawService::label).unwrap_or_else(|| "unknown".into()),
                    state: p.state.unwrap_or_else(|| "unknown".into()),
                })
                .collect(),
        }
    }

    fn vulnerability(&mut self) -> VulnerabilityResult {
        VulnerabilityResult {
            findings: self
                .vulnerabilities
                .take()
                .unwrap_or_default()
                .into_iter()
                .map(|f| Finding {
                    name: f.name,
                    severity: Severity::from(f.severity),
                    cve_id: f.cve_id.filter(|c| !c.trim().is_empty()),
                    description: f.description,
                    technical_details: f.technical_details,
                    recommendation: f.recommendation,
                })
                .collect(),
        }
    }

    fn traffic(&mut self) -> TrafficAnalysisResult {
        TrafficAnalysisResult {
            protocols: self
                .network_analysis
                .take()
                .unwrap_or_default()
                .protocols
                .into_iter()
                .map(|p| ProtocolSummary {
                    name: p.name,
                    packet_count: p.packets,
                    byte_count: p.bytes,
                    stats: stringify_map(p.stats),
                })
                .collect(),
        }
    }

    fn forensic(&mut self, tool: ForensicTool) -> ForensicResult {
        let artifacts = self
            .artifacts
            .take()
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, mut item)| {
                let name = ["name", "path", "command"]
                    .iter()
                    .find_map(|k| item.remove(*k).map(value_to_string))
                    .unwrap_or_else(|| format!("item {}", i + 1));
                ForensicArtifact {
                    name,
                    details: stringify_map(item),
                }
            })
            .collect();
        ForensicResult {
            tool: tool.as_str().to_string(),
            artifacts,
        }
    }
}

fn value_to_string(v: Value) -> String {
    match v {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn stringify_map(m: Map<String, Value>) -> BTreeMap<String, String> {
    m.into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k, value_to_string(v)))
        .collect()
}

/// Turn a raw result blob into the payload for `category`.
///
/// A body that only carries a non-completed `status` means the job has not finished.
pub(crate) fn parse_results(category: JobCategory, value: Value) -> Result<ResultPayload, ClientError> {
    let raw: RawResults = serde_json::from_value(value).map_err(|e| ClientError::Server {
        status: None,
        detail: format!("malformed result payload: {e}"),
    })?;
    let mut raw = raw.unwrap_envelope();

    if !raw.has_sections() {
        if let Some(status) = raw.status.as_deref() {
            if !status.eq_ignore_ascii_case("completed") {
                return Err(ClientError::InvalidState(format!(
                    "results are not available while the job is {status}"
                )));
            }
        }
    }

    Ok(match category {
        JobCategory::Network => ResultPayload::Network(raw.network()),
        JobCategory::Vulnerability => ResultPayload::Vulnerability(raw.vulnerability()),
        JobCategory::NetworkAnalysis | JobCategory::Forensic(ForensicTool::NetworkTraffic) => {
            ResultPayload::TrafficAnalysis(raw.traffic())
        }
        JobCategory::Full => ResultPayload::Combined(CombinedResult {
            network: raw.network(),
            vulnerability: raw.vulnerability(),
            traffic: raw.traffic(),
        }),
        JobCategory::Forensic(tool) => ResultPayload::Forensic(raw.forensic(tool)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scan_submission_body() {
        let req = SubmitRequest {
            category: JobCategory::Network,
            target: "10.0.0.5".into(),
            parameters: JobParameters::dashboard_defaults(),
        };
        let body = serde_json::to_value(SubmitBody::from_request(&req)).unwrap();
        assert_eq!(
            body,
            json!({
                "scan_type": "network",
                "target": "10.0.0.5",
                "parameters": { "ports": "1-10000", "duration": 300 }
            })
        );
    }

    #[test]
    fn forensic_submission_body() {
        let req = SubmitRequest {
            category: JobCategory::Forensic(ForensicTool::RootkitScan),
            target: "/var/log".into(),
            parameters: JobParameters::default(),
        };
        let body = serde_json::to_value(SubmitBody::from_request(&req)).unwrap();
        assert_eq!(body, json!({ "tool": "rootkit_scan", "path": "/var/log" }));
    }

    #[test]
    fn snapshot_strips_results_ref_until_completed() {
        let running: JobSnapshot = serde_json::from_value(json!({
            "id": 7, "status": "running", "scan_type": "network",
            "target": "host", "report_id": 3, "started_at": "2024-05-01T10:00:00.123456"
        }))
        .unwrap();
        let job = running.into_job(JobCategory::Network).unwrap();
        assert_eq!(job.id.as_str(), "7");
        assert_eq!(job.results_ref, None);
        assert_eq!(job.created_at.year(), 2024);

        let done: JobSnapshot = serde_json::from_value(json!({
            "id": 7, "status": "completed", "report_id": 3
        }))
        .unwrap();
        let job = done.into_job(JobCategory::Network).unwrap();
        assert_eq!(job.results_ref, Some(ResultsRef("3".into())));
        assert_eq!(job.target, "");
    }

    #[test]
    fn snapshot_with_other_category_is_a_server_error() {
        let snap: JobSnapshot = serde_json::from_value(json!({
            "id": 1, "status": "queued", "scan_type": "vulnerability"
        }))
        .unwrap();
        assert!(matches!(
            snap.into_job(JobCategory::Network),
            Err(ClientError::Server { .. })
        ));
    }

    #[test]
    fn error_detail_variants() {
        assert_eq!(
            error_detail(br#"{"detail":"Scan not found"}"#).as_deref(),
            Some("Scan not found")
        );
        assert_eq!(
            error_detail(br#"{"detail":[{"msg":"field required"},{"msg":"bad ip"}]}"#)
                .as_deref(),
            Some("field required; bad ip")
        );
        assert_eq!(error_detail(b"<html>oops</html>"), None);
        assert_eq!(error_detail(br#"{"error":"x"}"#), None);
    }

    #[test]
    fn network_results_accept_nmap_style_ports() {
        let v = json!({
            "network": { "open_ports": [
                { "port": 22, "service": "ssh", "state": "open" },
                { "number": "80", "service": { "name": "http", "product": "nginx" }, "state": "open" }
            ]}
        });
        let ResultPayload::Network(net) = parse_results(JobCategory::Network, v).unwrap() else {
            panic!("expected network payload");
        };
        assert_eq!(net.open_ports.len(), 2);
        assert_eq!(net.open_ports[1].port, 80);
        assert_eq!(net.open_ports[1].service, "http nginx");
    }

    #[test]
    fn missing_sections_become_empty_collections() {
        let payload = parse_results(JobCategory::Full, json!({ "status": "completed" })).unwrap();
        assert_eq!(payload, ResultPayload::Combined(CombinedResult::default()));
    }

    #[test]
    fn null_sub_collections_read_as_empty() {
        let payload = parse_results(
            JobCategory::Full,
            json!({
                "network": { "open_ports": null },
                "vulnerabilities": [{
                    "name": "Weak cipher", "severity": "low", "cve_id": null,
                    "description": null, "technical_details": null, "recommendation": null
                }],
                "network_analysis": { "protocols": null }
            }),
        )
        .unwrap();
        let ResultPayload::Combined(c) = payload else {
            panic!("expected combined payload");
        };
        assert!(c.network.open_ports.is_empty());
        assert!(c.traffic.protocols.is_empty());
        let f = &c.vulnerability.findings[0];
        assert_eq!(f.name, "Weak cipher");
        assert_eq!(f.description, "");
        assert_eq!(f.recommendation, "");

        let v = json!({ "network_analysis": { "protocols": [
            { "name": null, "packets": 3, "bytes": 90, "stats": null }
        ]}});
        let ResultPayload::TrafficAnalysis(t) =
            parse_results(JobCategory::NetworkAnalysis, v).unwrap()
        else {
            panic!("expected traffic payload");
        };
        assert_eq!(t.protocols[0].name, "");
        assert!(t.protocols[0].stats.is_empty());
    }

    #[test]
    fn status_only_body_is_invalid_state() {
        let err = parse_results(JobCategory::Network, json!({ "status": "running" })).unwrap_err();
        assert!(matches!(err, ClientError::InvalidState(_)));
    }

    #[test]
    fn traffic_stats_are_stringified() {
        let v = json!({ "network_analysis": { "protocols": [
            { "name": "TCP", "packets": 120, "bytes": "4096", "stats": { "avg_size": 34.1, "flags": "SYN", "none": null } }
        ]}});
        let ResultPayload::TrafficAnalysis(t) =
            parse_results(JobCategory::NetworkAnalysis, v).unwrap()
        else {
            panic!("expected traffic payload");
        };
        let p = &t.protocols[0];
        assert_eq!((p.packet_count, p.byte_count), (120, 4096));
        assert_eq!(p.stats.get("avg_size").map(String::as_str), Some("34.1"));
        assert_eq!(p.stats.get("flags").map(String::as_str), Some("SYN"));
        assert!(!p.stats.contains_key("none"));
    }

    #[test]
    fn envelope_is_unwrapped() {
        let v = json!({ "status": "completed", "results": {
            "vulnerabilities": [{ "name": "OpenSSH", "severity": "HIGH", "cve_id": "CVE-2023-38408" }]
        }});
        let ResultPayload::Vulnerability(vr) = parse_results(JobCategory::Vulnerability, v).unwrap()
        else {
            panic!("expected vulnerability payload");
        };
        assert_eq!(vr.findings[0].severity, Severity::High);
        assert_eq!(vr.findings[0].cve_id.as_deref(), Some("CVE-2023-38408"));
    }

    #[test]
    fn forensic_artifacts_are_named() {
        let v = json!({ "artifacts": [
            { "path": "/etc/passwd", "sha256": "abc" },
            { "size": 12 }
        ]});
        let ResultPayload::Forensic(f) =
            parse_results(JobCategory::Forensic(ForensicTool::FileHashes), v).unwrap()
        else {
            panic!("expected forensic payload");
        };
        assert_eq!(f.tool, "file_hashes");
        assert_eq!(f.artifacts[0].name, "/etc/passwd");
        assert_eq!(f.artifacts[0].details.get("sha256").map(String::as_str), Some("abc"));
        assert_eq!(f.artifacts[1].name, "item 2");
    }
}
