use super::wire::{self, JobSnapshot, SubmitBody};
use super::{Artifact, Gateway, SubmitRequest};
use crate::error::ClientError;
use crate::model::{artifact_filename, ClientConfig, Job, JobCategory, JobId, JobParameters};
use crate::payload::ResultPayload;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response, Url};
use tracing::{debug, info};

/// Build the shared HTTP client: user agent, timeout and optional bearer token.
pub(crate) fn build_http_client(cfg: &ClientConfig) -> Result<Client, ClientError> {
    let mut headers = HeaderMap::new();
    if let Some(token) = cfg.token.as_deref() {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ClientError::Validation("token contains invalid characters".into()))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }
    Client::builder()
        .user_agent(cfg.user_agent.clone())
        .timeout(cfg.request_timeout)
        .default_headers(headers)
        .build()
        .map_err(|e| ClientError::Validation(format!("cannot build HTTP client: {e}")))
}

pub(crate) fn parse_base_url(raw: &str) -> Result<Url, ClientError> {
    let url = Url::parse(raw)
        .map_err(|e| ClientError::Validation(format!("invalid base URL '{raw}': {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ClientError::Validation(format!(
            "base URL '{raw}' cannot carry paths"
        )));
    }
    Ok(url)
}

/// Append path segments to `base`; an empty trailing segment yields a trailing slash.
pub(crate) fn join_segments<'a>(
    base: &Url,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url, ClientError> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| ClientError::Validation(format!("base URL '{base}' cannot carry paths")))?;
        path.pop_if_empty();
        for s in segments {
            path.push(s);
        }
    }
    Ok(url)
}

/// Pass successful responses through; normalize everything else using the `detail` body.
pub(crate) async fn check_response(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.bytes().await.unwrap_or_default();
    Err(ClientError::from_status(
        status.as_u16(),
        wire::error_detail(&body),
    ))
}

/// Gateway backed by the analysis service's HTTP JSON API.
#[derive(Clone)]
pub struct HttpGateway {
    http: Client,
    /// Base URL with the API prefix already applied.
    api_base: Url,
}

impl HttpGateway {
    pub fn new(cfg: &ClientConfig) -> Result<Self, ClientError> {
        let base = parse_base_url(&cfg.base_url)?;
        let prefix = cfg.api_prefix.split('/').filter(|s| !s.is_empty());
        let api_base = join_segments(&base, prefix)?;
        Ok(Self {
            http: build_http_client(cfg)?,
            api_base,
        })
    }

    fn job_url(
        &self,
        category: JobCategory,
        id: Option<&JobId>,
        tail: Option<&str>,
    ) -> Result<Url, ClientError> {
        let mut segments = vec![category.surface().path_segment()];
        match id {
            Some(id) => segments.push(id.as_str()),
            None => segments.push(""),
        }
        if let Some(tail) = tail {
            segments.push(tail);
        }
        join_segments(&self.api_base, segments)
    }

    async fn get_results(&self, id: &JobId, category: JobCategory) -> Result<Response, ClientError> {
        let url = self.job_url(category, Some(id), Some("results"))?;
        let resp = self.http.get(url).send().await?;
        check_response(resp).await
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn submit(&self, request: &SubmitRequest) -> Result<Job, ClientError> {
        let url = self.job_url(request.category, None, None)?;
        let body = SubmitBody::from_request(request);
        debug!(%url, category = %request.category, target = %request.target, "submitting job");
        let resp = check_response(self.http.post(url).json(&body).send().await?).await?;
        let snapshot: JobSnapshot = resp.json().await?;
        let mut job = snapshot.into_job(request.category)?;
        // The backend echoes what we sent; fall back to our copy when it does not.
        if job.target.is_empty() {
            job.target = request.target.clone();
        }
        if job.parameters == JobParameters::default() {
            job.parameters = request.parameters.clone();
        }
        info!(job_id = %job.id, status = %job.status, "job accepted");
        Ok(job)
    }

    async fn fetch_status(&self, id: &JobId, category: JobCategory) -> Result<Job, ClientError> {
        let url = self.job_url(category, Some(id), None)?;
        let resp = check_response(self.http.get(url).send().await?).await?;
        let snapshot: JobSnapshot = resp.json().await?;
        if &snapshot.id != id {
            return Err(ClientError::Server {
                status: None,
                detail: format!("status request for job {id} answered for job {}", snapshot.id),
            });
        }
        snapshot.into_job(category)
    }

    async fn stop(&self, id: &JobId, category: JobCategory) -> Result<(), ClientError> {
        let url = self.job_url(category, Some(id), Some("stop"))?;
        let resp = self.http.post(url).send().await?;
        match check_response(resp).await {
            Ok(_) => Ok(()),
            // Unknown, already terminal or otherwise not stoppable: nothing left to stop.
            Err(
                e @ (ClientError::NotFound(_)
                | ClientError::InvalidState(_)
                | ClientError::Validation(_)),
            ) => {
                debug!(job_id = %id, "stop treated as no-op: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_results(
        &self,
        id: &JobId,
        category: JobCategory,
    ) -> Result<ResultPayload, ClientError> {
        let resp = self.get_results(id, category).await?;
        let value: serde_json::Value = resp.json().await?;
        wire::parse_results(category, value)
    }

    async fn download_artifact(
        &self,
        id: &JobId,
        category: JobCategory,
    ) -> Result<Artifact, ClientError> {
        let resp = self.get_results(id, category).await?;
        let stream = resp.bytes_stream().map_err(ClientError::from).boxed();
        Ok(Artifact {
            filename: artifact_filename(category, id),
            stream,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(base: &str, prefix: &str) -> HttpGateway {
        HttpGateway::new(&ClientConfig {
            base_url: base.into(),
            api_prefix: prefix.into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn job_urls() {
        let gw = gateway("http://localhost:8000", "/api/v1");
        let id = JobId::from("12");
        assert_eq!(
            gw.job_url(JobCategory::Network, None, None).unwrap().as_str(),
            "http://localhost:8000/api/v1/scan/"
        );
        assert_eq!(
            gw.job_url(JobCategory::Full, Some(&id), Some("stop"))
                .unwrap()
                .as_str(),
            "http://localhost:8000/api/v1/scan/12/stop"
        );
        assert_eq!(
            gw.job_url(
                JobCategory::Forensic(crate::model::ForensicTool::Processes),
                Some(&id),
                Some("results")
            )
            .unwrap()
            .as_str(),
            "http://localhost:8000/api/v1/forensic/12/results"
        );
    }

    #[test]
    fn empty_prefix_and_trailing_slash() {
        let gw = gateway("http://scanner.local:9000/", "");
        assert_eq!(
            gw.job_url(JobCategory::Network, Some(&JobId::from("1")), None)
                .unwrap()
                .as_str(),
            "http://scanner.local:9000/scan/1"
        );
    }

    #[test]
    fn ids_are_percent_encoded() {
        let gw = gateway("http://localhost:8000", "/api/v1");
        let url = gw
            .job_url(JobCategory::Network, Some(&JobId::from("a/b")), None)
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/v1/scan/a%2Fb");
    }

    #[test]
    fn invalid_base_url_is_a_validation_error() {
        let err = HttpGateway::new(&ClientConfig {
            base_url: "not a url".into(),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, ClientError::Validation(_)));
    }
}
