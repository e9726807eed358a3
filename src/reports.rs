//! Saved reports: listing, detail, PDF download and deletion.
//!
//! Report routes live at the server root, outside the job API prefix.

use crate::error::ClientError;
use crate::gateway::{self, wire, Artifact};
use crate::model::{report_filename, ClientConfig, JobCategory};
use crate::payload::ResultPayload;
use crate::storage;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Url};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub scan_type: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub results: Value,
}

impl Report {
    pub fn created_at(&self) -> Option<OffsetDateTime> {
        self.created_at.as_deref().and_then(wire::parse_timestamp)
    }

    pub fn category(&self) -> Option<JobCategory> {
        self.scan_type.parse().ok()
    }

    /// Typed view of the stored results, interpreted by the report's scan type.
    pub fn payload(&self) -> Result<ResultPayload, ClientError> {
        let category = self.category().ok_or_else(|| ClientError::Server {
            status: None,
            detail: format!("report {} has unknown scan type '{}'", self.id, self.scan_type),
        })?;
        wire::parse_results(category, self.results.clone())
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::Int(n) => n.to_string(),
        Raw::Str(s) => s,
    })
}

#[derive(Clone)]
pub struct ReportsClient {
    http: Client,
    base: Url,
}

impl ReportsClient {
    pub fn new(cfg: &ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            http: gateway::build_http_client(cfg)?,
            base: gateway::parse_base_url(&cfg.base_url)?,
        })
    }

    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, ClientError> {
        gateway::join_segments(&self.base, std::iter::once("reports").chain(segments))
    }

    pub async fn list(&self) -> Result<Vec<Report>, ClientError> {
        let url = self.url([""])?;
        debug!(%url, "listing reports");
        let resp = gateway::check_response(self.http.get(url).send().await?).await?;
        Ok(resp.json().await?)
    }

    pub async fn get(&self, id: &str) -> Result<Report, ClientError> {
        let url = self.url([id])?;
        let resp = gateway::check_response(self.http.get(url).send().await?).await?;
        Ok(resp.json().await?)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ClientError> {
        let url = self.url([id])?;
        gateway::check_response(self.http.delete(url).send().await?).await?;
        info!(report_id = id, "report deleted");
        Ok(())
    }

    /// Save the report PDF into `dir` as `report_results_{id}.pdf`.
    pub async fn download(&self, id: &str, dir: &Path) -> Result<PathBuf, ClientError> {
        let url = self.url([id, "download"])?;
        let resp = gateway::check_response(self.http.get(url).send().await?).await?;
        let artifact = Artifact {
            filename: report_filename(id),
            stream: resp.bytes_stream().map_err(ClientError::from).boxed(),
        };
        let path = storage::save_artifact(dir, artifact).await?;
        info!(report_id = id, path = %path.display(), "report downloaded");
        Ok(path)
    }
}
