//! Post-job processing utilities.
//!
//! Collects the final snapshot, renders results and saves artifacts once a job's
//! tracking task has ended.

use super::controller::LifecycleController;
use crate::gateway::Gateway;
use crate::model::{Job, JobId, JobStatus};
use crate::payload::ResultPayload;
use crate::text_summary;
use crate::view::{self, Expansion};
use std::path::PathBuf;
use std::sync::Arc;

/// Result of post-job processing, ready for presentation layers.
pub(crate) struct ProcessedJob {
    pub job: Job,
    pub payload: Option<Arc<ResultPayload>>,
    /// Rendered results (or the job header alone when there are none).
    pub lines: Vec<String>,
    pub messages: Vec<String>,
    pub downloaded: Option<PathBuf>,
}

/// Process a job whose tracking has ended. `None` if the job is no longer tracked.
pub(crate) async fn process_job_completion<G: Gateway>(
    controller: &LifecycleController<G>,
    id: &JobId,
    download: bool,
) -> Option<ProcessedJob> {
    let job = controller.registry().get(id)?;
    let mut messages = Vec::new();

    let payload = if job.status == JobStatus::Completed {
        match controller.fetch_results(id).await {
            Ok(p) => Some(p),
            Err(e) => {
                messages.push(format!("[{id}] results unavailable: {e}"));
                None
            }
        }
    } else {
        None
    };

    let lines = match payload.as_deref() {
        Some(p) => {
            let view = view::build_view(p);
            text_summary::build_text_summary(&job, &view, &Expansion::all(&view)).lines
        }
        None => vec![text_summary::job_header(&job)],
    };

    let downloaded = if download && job.status == JobStatus::Completed {
        match controller.download_results(id).await {
            Ok(path) => {
                messages.push(format!("[{id}] saved: {}", path.display()));
                Some(path)
            }
            Err(e) => {
                messages.push(format!("[{id}] download failed: {e}"));
                None
            }
        }
    } else {
        None
    };

    Some(ProcessedJob {
        job,
        payload,
        lines,
        messages,
        downloaded,
    })
}
