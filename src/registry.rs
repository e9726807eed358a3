//! Session-scoped registry of tracked jobs.
//!
//! The registry is the only shared mutable state in the client. Every mutation is
//! applied under a single lock, so concurrent readers always observe a whole `Job`
//! snapshot or nothing. Entries are not persisted; a fresh session starts empty.

use crate::model::{Job, JobCategory, JobId, JobStatus};
use crate::payload::ResultPayload;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

/// Outcome of a successful upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Inserted,
    Updated { from: JobStatus, to: JobStatus },
    /// Same status as before; the snapshot was refreshed in place.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job {id}: illegal status transition {from} -> {to}")]
    Illegal {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("job {id}: snapshot does not describe the tracked job ({field} changed)")]
    IdentityChanged { id: JobId, field: &'static str },
    #[error("job {id}: results can only be attached to a completed job (status {status})")]
    NotCompleted { id: JobId, status: JobStatus },
    #[error("job {id}: {kind} payload does not belong to a {category} job")]
    PayloadMismatch {
        id: JobId,
        kind: &'static str,
        category: JobCategory,
    },
}

struct Entry {
    job: Job,
    results: Option<Arc<ResultPayload>>,
}

#[derive(Default)]
struct Inner {
    order: Vec<JobId>,
    entries: HashMap<JobId, Entry>,
}

impl Inner {
    fn apply(&mut self, mut job: Job) -> Result<Upserted, TransitionError> {
        if job.status != JobStatus::Completed {
            job.results_ref = None;
        }
        let Some(entry) = self.entries.get_mut(&job.id) else {
            self.order.push(job.id.clone());
            self.entries.insert(
                job.id.clone(),
                Entry {
                    job,
                    results: None,
                },
            );
            return Ok(Upserted::Inserted);
        };

        // Target, parameters and submission time are immutable; a snapshot only
        // refreshes status and the results handle.
        let current = &mut entry.job;
        if current.category != job.category {
            return Err(TransitionError::IdentityChanged {
                id: job.id,
                field: "category",
            });
        }
        if !job.target.is_empty() && current.target != job.target {
            return Err(TransitionError::IdentityChanged {
                id: job.id,
                field: "target",
            });
        }

        let from = current.status;
        let to = job.status;
        if from != to && !from.can_transition_to(to) {
            return Err(TransitionError::Illegal {
                id: job.id,
                from,
                to,
            });
        }
        current.status = to;
        current.results_ref = job.results_ref;
        if from == to {
            Ok(Upserted::Unchanged)
        } else {
            Ok(Upserted::Updated { from, to })
        }
    }
}

#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every mutation completes before the guard drops, so a poisoned lock still
        // holds consistent data.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the entry for `job.id`, enforcing forward-only status.
    pub fn upsert(&self, job: Job) -> Result<Upserted, TransitionError> {
        self.lock().apply(job)
    }

    /// Apply a reconciliation snapshot only if the job is still tracked.
    ///
    /// Returns `Ok(None)` when the id is absent, so late poll responses for removed
    /// jobs are dropped instead of resurrecting the entry.
    pub fn reconcile(&self, job: Job) -> Result<Option<Upserted>, TransitionError> {
        let mut inner = self.lock();
        if !inner.entries.contains_key(&job.id) {
            debug!(job_id = %job.id, "dropping snapshot for untracked job");
            return Ok(None);
        }
        inner.apply(job).map(Some)
    }

    /// Hard delete; the job becomes indistinguishable from one never seen.
    pub fn remove(&self, id: &JobId) -> Option<Job> {
        let mut inner = self.lock();
        let entry = inner.entries.remove(id)?;
        inner.order.retain(|x| x != id);
        Some(entry.job)
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.lock().entries.get(id).map(|e| e.job.clone())
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.lock().entries.contains_key(id)
    }

    /// Snapshot of every tracked job in submission order.
    pub fn all(&self) -> Vec<Job> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .map(|e| e.job.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tracked jobs not yet in a terminal state.
    pub fn active_count(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|e| !e.job.status.is_terminal())
            .count()
    }

    pub fn results(&self, id: &JobId) -> Option<Arc<ResultPayload>> {
        self.lock().entries.get(id).and_then(|e| e.results.clone())
    }

    /// Attach a fetched payload to a completed job.
    ///
    /// Returns `Ok(None)` if the job was removed while the payload was in flight.
    pub fn attach_results(
        &self,
        id: &JobId,
        payload: ResultPayload,
    ) -> Result<Option<Arc<ResultPayload>>, TransitionError> {
        let mut inner = self.lock();
        let Some(entry) = inner.entries.get_mut(id) else {
            return Ok(None);
        };
        if entry.job.status != JobStatus::Completed {
            return Err(TransitionError::NotCompleted {
                id: id.clone(),
                status: entry.job.status,
            });
        }
        if !payload.matches(entry.job.category) {
            return Err(TransitionError::PayloadMismatch {
                id: id.clone(),
                kind: payload.kind(),
                category: entry.job.category,
            });
        }
        let payload = Arc::new(payload);
        entry.results = Some(payload.clone());
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobParameters, ResultsRef};
    use crate::payload::{NetworkResult, VulnerabilityResult};
    use time::OffsetDateTime;

    fn job(id: &str, status: JobStatus) -> Job {
        Job {
            id: JobId::from(id),
            category: JobCategory::Network,
            target: "10.0.0.5".into(),
            parameters: JobParameters::default(),
            status,
            created_at: OffsetDateTime::UNIX_EPOCH,
            results_ref: None,
        }
    }

    #[test]
    fn upsert_inserts_then_advances() {
        let reg = JobRegistry::new();
        assert_eq!(reg.upsert(job("a", JobStatus::Queued)), Ok(Upserted::Inserted));
        assert_eq!(
            reg.upsert(job("a", JobStatus::Running)),
            Ok(Upserted::Updated {
                from: JobStatus::Queued,
                to: JobStatus::Running
            })
        );
        assert_eq!(reg.upsert(job("a", JobStatus::Running)), Ok(Upserted::Unchanged));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(&"a".into()).unwrap().status, JobStatus::Running);
    }

    #[test]
    fn backward_transition_is_rejected_and_not_applied() {
        let reg = JobRegistry::new();
        reg.upsert(job("a", JobStatus::Completed)).unwrap();
        let err = reg.upsert(job("a", JobStatus::Running)).unwrap_err();
        assert!(matches!(err, TransitionError::Illegal { .. }));
        assert_eq!(reg.get(&"a".into()).unwrap().status, JobStatus::Completed);

        reg.upsert(job("b", JobStatus::Failed)).unwrap();
        assert!(reg.upsert(job("b", JobStatus::Completed)).is_err());
    }

    #[test]
    fn category_change_is_rejected() {
        let reg = JobRegistry::new();
        reg.upsert(job("a", JobStatus::Running)).unwrap();
        let mut other = job("a", JobStatus::Running);
        other.category = JobCategory::Full;
        assert!(matches!(
            reg.upsert(other),
            Err(TransitionError::IdentityChanged { field: "category", .. })
        ));
    }

    #[test]
    fn snapshots_without_target_keep_submitted_fields() {
        let reg = JobRegistry::new();
        let mut submitted = job("a", JobStatus::Queued);
        submitted.parameters.ports = Some("1-100".into());
        reg.upsert(submitted).unwrap();

        let mut snapshot = job("a", JobStatus::Completed);
        snapshot.target = String::new();
        snapshot.results_ref = Some(ResultsRef("r1".into()));
        reg.upsert(snapshot).unwrap();

        let stored = reg.get(&"a".into()).unwrap();
        assert_eq!(stored.target, "10.0.0.5");
        assert_eq!(stored.parameters.ports.as_deref(), Some("1-100"));
        assert_eq!(stored.results_ref, Some(ResultsRef("r1".into())));
    }

    #[test]
    fn all_preserves_submission_order() {
        let reg = JobRegistry::new();
        for id in ["3", "1", "2"] {
            reg.upsert(job(id, JobStatus::Queued)).unwrap();
        }
        reg.upsert(job("1", JobStatus::Running)).unwrap();
        let ids: Vec<_> = reg.all().into_iter().map(|j| j.id.to_string()).collect();
        assert_eq!(ids, ["3", "1", "2"]);
    }

    #[test]
    fn reconcile_never_resurrects_removed_jobs() {
        let reg = JobRegistry::new();
        reg.upsert(job("a", JobStatus::Running)).unwrap();
        assert!(reg.remove(&"a".into()).is_some());
        assert_eq!(reg.reconcile(job("a", JobStatus::Completed)), Ok(None));
        assert!(!reg.contains(&"a".into()));
        assert!(reg.all().is_empty());
    }

    #[test]
    fn results_ref_is_dropped_for_non_completed_snapshots() {
        let reg = JobRegistry::new();
        let mut j = job("a", JobStatus::Running);
        j.results_ref = Some(ResultsRef("9".into()));
        reg.upsert(j).unwrap();
        assert_eq!(reg.get(&"a".into()).unwrap().results_ref, None);
    }

    #[test]
    fn results_attach_only_to_completed_matching_jobs() {
        let reg = JobRegistry::new();
        reg.upsert(job("a", JobStatus::Running)).unwrap();
        let payload = ResultPayload::Network(NetworkResult::default());
        assert!(matches!(
            reg.attach_results(&"a".into(), payload.clone()),
            Err(TransitionError::NotCompleted { .. })
        ));

        reg.upsert(job("a", JobStatus::Completed)).unwrap();
        assert!(matches!(
            reg.attach_results(
                &"a".into(),
                ResultPayload::Vulnerability(VulnerabilityResult::default())
            ),
            Err(TransitionError::PayloadMismatch { .. })
        ));
        assert!(reg.attach_results(&"a".into(), payload).unwrap().is_some());
        assert!(reg.results(&"a".into()).is_some());

        reg.remove(&"a".into());
        assert!(reg.results(&"a".into()).is_none());
        assert_eq!(
            reg.attach_results(&"a".into(), ResultPayload::Network(NetworkResult::default())),
            Ok(None)
        );
    }

    #[test]
    fn active_count_ignores_terminal_jobs() {
        let reg = JobRegistry::new();
        reg.upsert(job("a", JobStatus::Running)).unwrap();
        reg.upsert(job("b", JobStatus::Failed)).unwrap();
        reg.upsert(job("c", JobStatus::Queued)).unwrap();
        assert_eq!(reg.active_count(), 2);
    }
}
