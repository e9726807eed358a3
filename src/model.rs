use crate::error::ClientError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    /// Path prefix for job routes; report routes live at the server root.
    pub api_prefix: String,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub download_dir: PathBuf,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            api_prefix: "/api/v1".into(),
            token: None,
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
            download_dir: PathBuf::from("."),
            user_agent: format!("scanwatch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Opaque backend-assigned job identifier.
///
/// The backend hands out integers today; anything it sends is kept verbatim as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Str(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(n) => JobId(n.to_string()),
            Raw::Str(s) => JobId(s),
        })
    }
}

/// Forensic inspection tools offered by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForensicTool {
    Files,
    ShellHistory,
    Processes,
    NetworkTraffic,
    FileHashes,
    RootkitScan,
}

impl ForensicTool {
    pub const ALL: [ForensicTool; 6] = [
        ForensicTool::Files,
        ForensicTool::ShellHistory,
        ForensicTool::Processes,
        ForensicTool::NetworkTraffic,
        ForensicTool::FileHashes,
        ForensicTool::RootkitScan,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ForensicTool::Files => "files",
            ForensicTool::ShellHistory => "shell_history",
            ForensicTool::Processes => "processes",
            ForensicTool::NetworkTraffic => "network_traffic",
            ForensicTool::FileHashes => "file_hashes",
            ForensicTool::RootkitScan => "rootkit_scan",
        }
    }
}

/// Which backend route family serves a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Scan,
    Forensic,
}

impl Surface {
    pub fn path_segment(self) -> &'static str {
        match self {
            Surface::Scan => "scan",
            Surface::Forensic => "forensic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum JobCategory {
    Network,
    Vulnerability,
    NetworkAnalysis,
    Full,
    Forensic(ForensicTool),
}

impl JobCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            JobCategory::Network => "network",
            JobCategory::Vulnerability => "vulnerability",
            JobCategory::NetworkAnalysis => "network_analysis",
            JobCategory::Full => "full",
            JobCategory::Forensic(tool) => tool.as_str(),
        }
    }

    pub fn surface(self) -> Surface {
        match self {
            JobCategory::Forensic(_) => Surface::Forensic,
            _ => Surface::Scan,
        }
    }
}

impl fmt::Display for JobCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job category '{0}'")]
pub struct UnknownCategory(pub String);

impl FromStr for JobCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "network" => Ok(JobCategory::Network),
            "vulnerability" => Ok(JobCategory::Vulnerability),
            "network_analysis" | "traffic" => Ok(JobCategory::NetworkAnalysis),
            "full" => Ok(JobCategory::Full),
            other => ForensicTool::ALL
                .into_iter()
                .find(|t| t.as_str() == other)
                .map(JobCategory::Forensic)
                .ok_or_else(|| UnknownCategory(s.to_string())),
        }
    }
}

impl TryFrom<String> for JobCategory {
    type Error = UnknownCategory;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<JobCategory> for String {
    fn from(c: JobCategory) -> Self {
        c.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[serde(alias = "pending")]
    Queued,
    Running,
    Completed,
    Failed,
    #[serde(alias = "cancelled", alias = "canceled")]
    Stopped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped
        )
    }

    /// Forward-only transition check. Re-observing the same status is not a transition.
    ///
    /// `Queued -> Completed` is accepted because a poll may never observe the
    /// intermediate `Running` state.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Completed)
                | (Running, Completed)
                | (Queued, Failed)
                | (Running, Failed)
                | (Queued, Stopped)
                | (Running, Stopped)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// nmap profile requested for network-style scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScanProfile {
    Quick,
    Full,
    Vulnerability,
    Custom,
}

/// Options fixed at submission time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<String>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ScanProfile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<String>,
}

impl JobParameters {
    /// Defaults submitted by the operator dashboard for every scan.
    pub fn dashboard_defaults() -> Self {
        Self {
            ports: Some("1-10000".into()),
            duration: Some(Duration::from_secs(300)),
            profile: None,
            scripts: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if let Some(ports) = self.ports.as_deref() {
            validate_port_spec(ports)?;
        }
        if let Some(d) = self.duration {
            if d.is_zero() {
                return Err(ClientError::Validation(
                    "capture duration must be greater than zero".into(),
                ));
            }
        }
        if let Some(bad) = self
            .scripts
            .iter()
            .find(|s| s.trim().is_empty() || s.chars().any(char::is_whitespace))
        {
            return Err(ClientError::Validation(format!(
                "invalid script name '{bad}'"
            )));
        }
        Ok(())
    }
}

/// Accepts nmap-style port lists: `22`, `1-1000`, `22,80,8000-8100`.
fn validate_port_spec(spec: &str) -> Result<(), ClientError> {
    let invalid = || ClientError::Validation(format!("invalid port range '{spec}'"));
    let parse_port = |s: &str| -> Result<u16, ClientError> {
        match s.trim().parse::<u16>() {
            Ok(p) if p > 0 => Ok(p),
            _ => Err(invalid()),
        }
    };

    if spec.trim().is_empty() {
        return Err(invalid());
    }
    for item in spec.split(',') {
        match item.split_once('-') {
            Some((lo, hi)) => {
                if parse_port(lo)? > parse_port(hi)? {
                    return Err(invalid());
                }
            }
            None => {
                parse_port(item)?;
            }
        }
    }
    Ok(())
}

/// Handle used to fetch the full result payload of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultsRef(pub String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub category: JobCategory,
    pub target: String,
    #[serde(default)]
    pub parameters: JobParameters,
    pub status: JobStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_ref: Option<ResultsRef>,
}

/// Deterministic client-side filename for a job's downloaded results.
pub fn artifact_filename(category: JobCategory, id: &JobId) -> String {
    format!("{}_results_{}.json", category.as_str(), sanitize_segment(id.as_str()))
}

/// Deterministic client-side filename for a downloaded report.
pub fn report_filename(id: &str) -> String {
    format!("report_results_{}.pdf", sanitize_segment(id))
}

/// Percent-encodes everything outside the URL unreserved set, so distinct ids never
/// share a filename and no id can introduce a path separator.
fn sanitize_segment(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Lifecycle events emitted by the controller and consumed by presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    Submitted {
        job: Box<Job>,
    },
    StatusChanged {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    PollFailed {
        id: JobId,
        error: String,
        retrying: bool,
    },
    ResultsReady {
        id: JobId,
    },
    ResultsFailed {
        id: JobId,
        error: String,
    },
    Stopped {
        id: JobId,
    },
    /// A poll response arrived for a job that is no longer tracked.
    Discarded {
        id: JobId,
    },
    /// The tracking task for this job has exited; no further events follow for it.
    TrackingEnded {
        id: JobId,
    },
    Info(String),
}

impl JobEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            JobEvent::Submitted { job } => format!(
                "[{}] {} job submitted for {} ({})",
                job.id, job.category, job.target, job.status
            ),
            JobEvent::StatusChanged { id, from, to } => format!("[{id}] {from} -> {to}"),
            JobEvent::PollFailed {
                id,
                error,
                retrying,
            } => {
                if *retrying {
                    format!("[{id}] status check failed, retrying: {error}")
                } else {
                    format!("[{id}] status check failed, no longer tracking: {error}")
                }
            }
            JobEvent::ResultsReady { id } => format!("[{id}] results ready"),
            JobEvent::ResultsFailed { id, error } => {
                format!("[{id}] could not fetch results: {error}")
            }
            JobEvent::Stopped { id } => format!("[{id}] stopped"),
            JobEvent::Discarded { id } => format!("[{id}] ignored late status response"),
            JobEvent::TrackingEnded { id } => format!("[{id}] tracking ended"),
            JobEvent::Info(msg) => msg.clone(),
        }
    }
}
