//! Scripted in-process gateway for controller tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use scanwatch::gateway::{Artifact, Gateway, SubmitRequest};
use scanwatch::model::{artifact_filename, Job, JobCategory, JobEvent, JobId, JobStatus, ResultsRef};
use scanwatch::orchestrator::{ControllerSettings, LifecycleController};
use scanwatch::payload::{NetworkResult, OpenPort, ResultPayload, VulnerabilityResult};
use scanwatch::registry::JobRegistry;
use scanwatch::ClientError;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

type Step = Result<JobStatus, ClientError>;

#[derive(Default)]
struct State {
    next_ids: VecDeque<String>,
    counter: u64,
    initial_status: HashMap<String, JobStatus>,
    /// Successive poll answers per job; the last one repeats.
    scripts: HashMap<JobId, VecDeque<Step>>,
    jobs: HashMap<JobId, Job>,
    submit_error: Option<ClientError>,
    stop_error: Option<ClientError>,
    results: HashMap<JobId, ResultPayload>,
}

#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<State>,
    /// While set, status polls block until released.
    gate: Mutex<Option<Arc<Semaphore>>>,
    /// Per-job holds, applied on top of `gate`.
    job_gates: Mutex<HashMap<JobId, Arc<Semaphore>>>,
    /// While set, stop calls block until released.
    stop_gate: Mutex<Option<Arc<Semaphore>>>,
    pub poll_started: Notify,
    pub stop_started: Notify,
    pub submits: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub results_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ids handed out by the next submissions, in order.
    pub fn next_ids<const N: usize>(&self, ids: [&str; N]) {
        let mut st = self.state.lock().unwrap();
        st.next_ids.extend(ids.iter().map(|s| s.to_string()));
    }

    /// Status the backend reports when `target` is submitted (default `running`).
    pub fn submit_status(&self, target: &str, status: JobStatus) {
        self.state
            .lock()
            .unwrap()
            .initial_status
            .insert(target.to_string(), status);
    }

    pub fn script(&self, id: &str, steps: Vec<Step>) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(JobId::from(id), steps.into());
    }

    pub fn fail_submissions(&self, e: ClientError) {
        self.state.lock().unwrap().submit_error = Some(e);
    }

    pub fn fail_stops(&self, e: Option<ClientError>) {
        self.state.lock().unwrap().stop_error = e;
    }

    pub fn hold_polls(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_polls(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.add_permits(1024);
        }
    }

    pub fn hold_polls_of(&self, id: &str) {
        self.job_gates
            .lock()
            .unwrap()
            .insert(JobId::from(id), Arc::new(Semaphore::new(0)));
    }

    pub fn release_polls_of(&self, id: &str) {
        if let Some(gate) = self.job_gates.lock().unwrap().remove(&JobId::from(id)) {
            gate.add_permits(1024);
        }
    }

    pub fn hold_stops(&self) {
        *self.stop_gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_stops(&self) {
        if let Some(gate) = self.stop_gate.lock().unwrap().take() {
            gate.add_permits(1024);
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub fn sample_payload(category: JobCategory) -> ResultPayload {
    match category {
        JobCategory::Vulnerability => ResultPayload::Vulnerability(VulnerabilityResult::default()),
        _ => ResultPayload::Network(NetworkResult {
            open_ports: vec![OpenPort {
                port: 22,
                service: "ssh".into(),
                state: "open".into(),
            }],
        }),
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn submit(&self, request: &SubmitRequest) -> Result<Job, ClientError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        let mut st = self.state.lock().unwrap();
        if let Some(e) = st.submit_error.clone() {
            return Err(e);
        }
        st.counter += 1;
        let n = st.counter;
        let id = st
            .next_ids
            .pop_front()
            .unwrap_or_else(|| format!("job-{n}"));
        let status = st
            .initial_status
            .get(&request.target)
            .copied()
            .unwrap_or(JobStatus::Running);
        let job = Job {
            id: JobId::new(id),
            category: request.category,
            target: request.target.clone(),
            parameters: request.parameters.clone(),
            status,
            created_at: time::OffsetDateTime::now_utc(),
            results_ref: None,
        };
        st.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn fetch_status(&self, id: &JobId, _category: JobCategory) -> Result<Job, ClientError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.poll_started.notify_one();
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.unwrap();
        }
        let job_gate = self.job_gates.lock().unwrap().get(id).cloned();
        if let Some(gate) = job_gate {
            let _permit = gate.acquire().await.unwrap();
        }

        let mut st = self.state.lock().unwrap();
        let step = match st.scripts.get_mut(id) {
            Some(steps) if steps.len() > 1 => steps.pop_front().unwrap(),
            Some(steps) => steps.front().cloned().unwrap(),
            None => return Err(ClientError::NotFound(format!("job {id}"))),
        };
        let status = step?;
        let job = st
            .jobs
            .get_mut(id)
            .ok_or_else(|| ClientError::NotFound(format!("job {id}")))?;
        job.status = status;
        if status == JobStatus::Completed {
            job.results_ref = Some(ResultsRef(id.to_string()));
        }
        Ok(job.clone())
    }

    async fn stop(&self, id: &JobId, _category: JobCategory) -> Result<(), ClientError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stop_started.notify_one();
        let gate = self.stop_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.unwrap();
        }
        let mut st = self.state.lock().unwrap();
        if let Some(e) = st.stop_error.clone() {
            return Err(e);
        }
        if let Some(job) = st.jobs.get_mut(id) {
            if !job.status.is_terminal() {
                job.status = JobStatus::Stopped;
            }
        }
        Ok(())
    }

    async fn fetch_results(
        &self,
        id: &JobId,
        category: JobCategory,
    ) -> Result<ResultPayload, ClientError> {
        self.results_calls.fetch_add(1, Ordering::SeqCst);
        let st = self.state.lock().unwrap();
        match st.jobs.get(id).map(|j| j.status) {
            Some(JobStatus::Completed) => Ok(st
                .results
                .get(id)
                .cloned()
                .unwrap_or_else(|| sample_payload(category))),
            Some(status) => Err(ClientError::InvalidState(format!("job {id} is {status}"))),
            None => Err(ClientError::NotFound(format!("job {id}"))),
        }
    }

    async fn download_artifact(
        &self,
        id: &JobId,
        category: JobCategory,
    ) -> Result<Artifact, ClientError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Artifact {
            filename: artifact_filename(category, id),
            stream: stream::iter(vec![Ok(Bytes::from_static(b"{\"open_ports\":[]}"))]).boxed(),
        })
    }
}

pub fn controller(
    gateway: Arc<FakeGateway>,
    download_dir: &Path,
) -> (
    LifecycleController<FakeGateway>,
    mpsc::UnboundedReceiver<JobEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let settings = ControllerSettings {
        poll_interval: POLL_INTERVAL,
        download_dir: download_dir.to_path_buf(),
    };
    let ctl = LifecycleController::new(gateway, Arc::new(JobRegistry::new()), settings, tx);
    (ctl, rx)
}

/// Collect events until tracking of `id` ends (inclusive).
pub async fn events_until_ended(
    rx: &mut mpsc::UnboundedReceiver<JobEvent>,
    id: &JobId,
) -> Vec<JobEvent> {
    let mut seen = Vec::new();
    let wait = async {
        while let Some(ev) = rx.recv().await {
            let done = matches!(&ev, JobEvent::TrackingEnded { id: ended } if ended == id);
            seen.push(ev);
            if done {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(600), wait)
        .await
        .expect("tracking did not end");
    seen
}

pub fn has_event(events: &[JobEvent], pred: impl Fn(&JobEvent) -> bool) -> bool {
    events.iter().any(pred)
}
