//! Backend gateway: the only component that talks to the analysis service.
//!
//! The gateway is stateless. Callers pass the job's category next to its id because
//! scans and forensic jobs live on separate route families.

mod http;
pub(crate) mod wire;

pub use http::HttpGateway;
pub(crate) use http::{build_http_client, check_response, join_segments, parse_base_url};

use crate::error::ClientError;
use crate::model::{Job, JobCategory, JobId, JobParameters};
use crate::payload::ResultPayload;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub category: JobCategory,
    pub target: String,
    pub parameters: JobParameters,
}

/// A downloadable file: a byte stream plus the name it should be saved under.
pub struct Artifact {
    pub filename: String,
    pub stream: BoxStream<'static, Result<Bytes, ClientError>>,
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    /// Submit a job. Succeeds with a `queued` or `running` job carrying a fresh id.
    async fn submit(&self, request: &SubmitRequest) -> Result<Job, ClientError>;

    /// Current status snapshot. `NotFound` when the backend no longer knows the id.
    async fn fetch_status(&self, id: &JobId, category: JobCategory) -> Result<Job, ClientError>;

    /// Idempotent: stopping a terminal or unknown job is a success.
    async fn stop(&self, id: &JobId, category: JobCategory) -> Result<(), ClientError>;

    /// Typed results of a completed job; `InvalidState` otherwise.
    async fn fetch_results(
        &self,
        id: &JobId,
        category: JobCategory,
    ) -> Result<ResultPayload, ClientError>;

    async fn download_artifact(
        &self,
        id: &JobId,
        category: JobCategory,
    ) -> Result<Artifact, ClientError>;
}
