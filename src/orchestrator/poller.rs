//! Per-job status reconciliation.
//!
//! Each tracked job gets exactly one task, so a job is never polled again while an
//! earlier poll for it is outstanding. Ticks missed during a slow poll are skipped.

use super::controller::LifecycleController;
use crate::error::ClientError;
use crate::gateway::Gateway;
use crate::model::{Job, JobCategory, JobEvent, JobId, JobStatus};
use crate::registry::Upserted;
use std::sync::PoisonError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a job's polling loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Terminal(JobStatus),
    /// Stopped, dismissed, shut down or no longer reconcilable.
    Abandoned,
}

impl<G: Gateway> LifecycleController<G> {
    /// Spawn the tracking task for a freshly registered job.
    pub(super) fn begin_tracking(&self, job: &Job) {
        let token = {
            let mut pollers = self.pollers.lock().unwrap_or_else(PoisonError::into_inner);
            if pollers.contains_key(&job.id) {
                debug!(job_id = %job.id, "already tracking");
                return;
            }
            let token = self.shutdown.child_token();
            pollers.insert(job.id.clone(), token.clone());
            token
        };

        let this = self.clone();
        let id = job.id.clone();
        let category = job.category;
        let status = job.status;
        self.tasks.spawn(async move {
            this.run_tracking(id, category, status, token).await;
        });
    }

    async fn run_tracking(
        &self,
        id: JobId,
        category: JobCategory,
        status: JobStatus,
        token: CancellationToken,
    ) {
        let outcome = if status.is_terminal() {
            PollOutcome::Terminal(status)
        } else {
            self.poll_until_terminal(&id, category, &token).await
        };

        if outcome == PollOutcome::Terminal(JobStatus::Completed) && !token.is_cancelled() {
            match self.retrieve_results(&id, category).await {
                Ok(_) => {
                    info!(job_id = %id, "results retrieved");
                    self.emit(JobEvent::ResultsReady { id: id.clone() });
                }
                Err(e) => {
                    warn!(job_id = %id, "result retrieval failed: {e}");
                    self.emit(JobEvent::ResultsFailed {
                        id: id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.pollers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        self.emit(JobEvent::TrackingEnded { id });
    }

    async fn poll_until_terminal(
        &self,
        id: &JobId,
        category: JobCategory,
        token: &CancellationToken,
    ) -> PollOutcome {
        let period = self.settings.poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => return PollOutcome::Abandoned,
                _ = ticker.tick() => {}
            }

            // An in-flight poll is never aborted; its response is checked on arrival.
            let res = self.gateway.fetch_status(id, category).await;
            if token.is_cancelled() {
                debug!(job_id = %id, "discarding poll response after cancellation");
                self.emit(JobEvent::Discarded { id: id.clone() });
                return PollOutcome::Abandoned;
            }

            match res {
                Ok(snapshot) => match self.registry.reconcile(snapshot) {
                    Ok(None) => {
                        debug!(job_id = %id, "discarding poll response for removed job");
                        self.emit(JobEvent::Discarded { id: id.clone() });
                        return PollOutcome::Abandoned;
                    }
                    Ok(Some(Upserted::Updated { from, to })) => {
                        info!(job_id = %id, %from, %to, "status changed");
                        self.emit(JobEvent::StatusChanged {
                            id: id.clone(),
                            from,
                            to,
                        });
                        if to.is_terminal() {
                            return PollOutcome::Terminal(to);
                        }
                    }
                    Ok(Some(_)) => {}
                    Err(e) => {
                        warn!(job_id = %id, "rejected status snapshot: {e}");
                        self.emit(JobEvent::PollFailed {
                            id: id.clone(),
                            error: e.to_string(),
                            retrying: false,
                        });
                        return PollOutcome::Abandoned;
                    }
                },
                Err(e) if e.is_transient() => {
                    warn!(job_id = %id, "status poll failed, retrying next interval: {e}");
                    self.emit(JobEvent::PollFailed {
                        id: id.clone(),
                        error: e.to_string(),
                        retrying: true,
                    });
                }
                Err(e) => {
                    if matches!(e, ClientError::NotFound(_)) {
                        warn!(job_id = %id, "backend no longer knows this job");
                    } else {
                        warn!(job_id = %id, "status poll failed: {e}");
                    }
                    self.emit(JobEvent::PollFailed {
                        id: id.clone(),
                        error: e.to_string(),
                        retrying: false,
                    });
                    return PollOutcome::Abandoned;
                }
            }
        }
    }
}
