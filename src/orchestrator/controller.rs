//! Job lifecycle controller.
//!
//! Owns submission, stop and download orchestration and emits events for presentation
//! layers. Status reconciliation runs in one task per job (see `poller`).

use crate::error::ClientError;
use crate::gateway::{Gateway, SubmitRequest};
use crate::model::{ClientConfig, Job, JobCategory, JobEvent, JobId, JobParameters, JobStatus};
use crate::payload::ResultPayload;
use crate::registry::{JobRegistry, TransitionError};
use crate::storage;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub poll_interval: Duration,
    pub download_dir: PathBuf,
}

impl From<&ClientConfig> for ControllerSettings {
    fn from(cfg: &ClientConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval,
            download_dir: cfg.download_dir.clone(),
        }
    }
}

/// Drives every job from submission to a terminal state.
///
/// Cloning is cheap; clones share the gateway, registry and polling tasks.
pub struct LifecycleController<G: Gateway> {
    pub(super) gateway: Arc<G>,
    pub(super) registry: Arc<JobRegistry>,
    /// Cancellation handle per job with a live polling task.
    pub(super) pollers: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
    pub(super) shutdown: CancellationToken,
    pub(super) tasks: TaskTracker,
    pub(super) settings: ControllerSettings,
    pub(super) event_tx: UnboundedSender<JobEvent>,
}

impl<G: Gateway> Clone for LifecycleController<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            registry: self.registry.clone(),
            pollers: self.pollers.clone(),
            shutdown: self.shutdown.clone(),
            tasks: self.tasks.clone(),
            settings: self.settings.clone(),
            event_tx: self.event_tx.clone(),
        }
    }
}

impl<G: Gateway> LifecycleController<G> {
    pub fn new(
        gateway: Arc<G>,
        registry: Arc<JobRegistry>,
        settings: ControllerSettings,
        event_tx: UnboundedSender<JobEvent>,
    ) -> Self {
        Self {
            gateway,
            registry,
            pollers: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            settings,
            event_tx,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.registry.all()
    }

    pub(super) fn emit(&self, ev: JobEvent) {
        let _ = self.event_tx.send(ev);
    }

    /// Validate, submit and start tracking a job.
    ///
    /// Nothing is written to the registry unless the backend accepted the job.
    pub async fn start_job(
        &self,
        category: JobCategory,
        target: &str,
        parameters: JobParameters,
    ) -> Result<Job, ClientError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(ClientError::Validation("target must not be empty".into()));
        }
        parameters.validate()?;

        let request = SubmitRequest {
            category,
            target: target.to_string(),
            parameters,
        };
        let job = self.gateway.submit(&request).await.map_err(|e| {
            warn!(%category, target, "submission failed: {e}");
            e
        })?;

        self.registry
            .upsert(job.clone())
            .map_err(|e| ClientError::InvalidState(e.to_string()))?;
        info!(job_id = %job.id, %category, target, status = %job.status, "tracking job");
        self.emit(JobEvent::Submitted {
            job: Box::new(job.clone()),
        });
        self.begin_tracking(&job);
        Ok(job)
    }

    /// Stop a job on the backend and drop it from the registry.
    ///
    /// Unknown ids and jobs already in a terminal state are a no-op success, and so is a
    /// job that reaches a terminal state before the backend acknowledges the stop. On
    /// failure the job stays tracked and keeps polling.
    pub async fn stop_job(&self, id: &JobId) -> Result<(), ClientError> {
        let Some(job) = self.registry.get(id) else {
            debug!(job_id = %id, "stop requested for untracked job");
            return Ok(());
        };
        if job.status.is_terminal() {
            debug!(job_id = %id, status = %job.status, "stop requested for finished job");
            return Ok(());
        }

        if let Err(e) = self.gateway.stop(id, job.category).await {
            warn!(job_id = %id, "stop failed: {e}");
            self.emit(JobEvent::Info(format!("[{id}] stop failed: {e}")));
            return Err(e);
        }
        // The poller may have seen a terminal status while the stop was in flight.
        if let Some(current) = self.registry.get(id).filter(|j| j.status.is_terminal()) {
            debug!(job_id = %id, status = %current.status, "job finished before stop returned");
            return Ok(());
        }

        self.cancel_polling(id);
        self.registry.remove(id);
        info!(job_id = %id, "job stopped");
        self.emit(JobEvent::Stopped { id: id.clone() });
        Ok(())
    }

    /// Stop every job that has not reached a terminal state.
    pub async fn stop_all(&self) -> Vec<(JobId, Result<(), ClientError>)> {
        let active: Vec<JobId> = self
            .registry
            .all()
            .into_iter()
            .filter(|j| !j.status.is_terminal())
            .map(|j| j.id)
            .collect();
        let stops = active.iter().map(|id| self.stop_job(id));
        let results = futures::future::join_all(stops).await;
        active.into_iter().zip(results).collect()
    }

    /// Remove a job from view without contacting the backend.
    pub fn dismiss(&self, id: &JobId) -> Option<Job> {
        self.cancel_polling(id);
        self.registry.remove(id)
    }

    /// Result payload of a completed job, fetched on first use.
    ///
    /// Fails with `InvalidState`, without contacting the backend, unless the registry
    /// shows the job as completed.
    pub async fn fetch_results(&self, id: &JobId) -> Result<Arc<ResultPayload>, ClientError> {
        let job = self
            .registry
            .get(id)
            .ok_or_else(|| ClientError::NotFound(format!("job {id} is not tracked")))?;
        if let Some(payload) = self.registry.results(id) {
            return Ok(payload);
        }
        if job.status != JobStatus::Completed {
            return Err(ClientError::InvalidState(format!(
                "job {id} is {}, results are only available once completed",
                job.status
            )));
        }
        self.retrieve_results(id, job.category).await
    }

    pub(super) async fn retrieve_results(
        &self,
        id: &JobId,
        category: JobCategory,
    ) -> Result<Arc<ResultPayload>, ClientError> {
        let payload = self.gateway.fetch_results(id, category).await?;
        match self.registry.attach_results(id, payload) {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Err(ClientError::NotFound(format!(
                "job {id} was removed while its results were downloading"
            ))),
            Err(e @ TransitionError::PayloadMismatch { .. }) => Err(ClientError::Server {
                status: None,
                detail: e.to_string(),
            }),
            Err(e) => Err(ClientError::InvalidState(e.to_string())),
        }
    }

    /// Save a completed job's artifact into the download directory.
    pub async fn download_results(&self, id: &JobId) -> Result<PathBuf, ClientError> {
        let job = self
            .registry
            .get(id)
            .ok_or_else(|| ClientError::NotFound(format!("job {id} is not tracked")))?;
        if job.status != JobStatus::Completed {
            return Err(ClientError::InvalidState(format!(
                "job {id} is {}, only completed jobs can be downloaded",
                job.status
            )));
        }
        let artifact = self.gateway.download_artifact(id, job.category).await?;
        let path = storage::save_artifact(&self.settings.download_dir, artifact)
            .await
            .map_err(|e| {
                warn!(job_id = %id, "download failed: {e}");
                e
            })?;
        info!(job_id = %id, path = %path.display(), "results downloaded");
        Ok(path)
    }

    pub(super) fn cancel_polling(&self, id: &JobId) {
        let token = self
            .pollers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(token) = token {
            token.cancel();
        }
    }

    /// Number of jobs with a live tracking task.
    pub fn tracked_count(&self) -> usize {
        self.pollers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Cancel all polling and wait for tracking tasks to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}
