/// Scripted in-memory backend and push source
///
/// Both fakes read the paused tokio clock, so a script like "Processing from
/// t=5s" means five seconds after the fake was created.
use async_trait::async_trait;
use futures::StreamExt;
use jobwatch_lib::modules::jobs::domain::{
    ErrorDetail, JobBackend, JobId, JobKind, JobSnapshot, JobState, PushSource, PushStream,
};
use jobwatch_lib::shared::errors::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// What the backend answers from a given moment on
#[derive(Debug, Clone)]
pub enum Reply {
    State(JobState),
    Done(serde_json::Value),
    Failed(&'static str),
    Error(AppError),
}

#[derive(Default)]
struct BackendState {
    timelines: HashMap<String, Vec<(Duration, Reply)>>,
    fetches: HashMap<String, u32>,
    cancellations: Vec<String>,
    resubmissions: Vec<String>,
}

pub struct ScriptedBackend {
    origin: Instant,
    state: Mutex<BackendState>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(BackendState::default()),
        }
    }

    /// Replace the script of `job_id`. Entries must be sorted by time.
    pub fn script(self, job_id: &str, timeline: Vec<(u64, Reply)>) -> Self {
        self.set_script(job_id, timeline);
        self
    }

    pub fn set_script(&self, job_id: &str, timeline: Vec<(u64, Reply)>) {
        let timeline = timeline
            .into_iter()
            .map(|(secs, reply)| (Duration::from_secs(secs), reply))
            .collect();
        self.state
            .lock()
            .unwrap()
            .timelines
            .insert(job_id.to_string(), timeline);
    }

    pub fn fetches(&self, job_id: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .fetches
            .get(job_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn cancellations(&self) -> Vec<String> {
        self.state.lock().unwrap().cancellations.clone()
    }

    pub fn resubmissions(&self) -> Vec<String> {
        self.state.lock().unwrap().resubmissions.clone()
    }
}

#[async_trait]
impl JobBackend for ScriptedBackend {
    async fn fetch_snapshot(&self, job_id: &JobId) -> AppResult<JobSnapshot> {
        let elapsed = self.origin.elapsed();
        let mut state = self.state.lock().unwrap();
        *state.fetches.entry(job_id.to_string()).or_default() += 1;

        let reply = state
            .timelines
            .get(job_id.as_str())
            .and_then(|timeline| {
                timeline
                    .iter()
                    .rev()
                    .find(|(at, _)| *at <= elapsed)
                    .map(|(_, reply)| reply.clone())
            })
            .ok_or_else(|| AppError::NotFound(format!("unknown job {}", job_id)))?;

        snapshot_for(job_id, reply)
    }

    async fn request_cancellation(&self, job_id: &JobId) -> AppResult<()> {
        self.state
            .lock()
            .unwrap()
            .cancellations
            .push(job_id.to_string());
        Ok(())
    }

    async fn resubmit(&self, job_id: &JobId, _kind: JobKind) -> AppResult<JobId> {
        let mut state = self.state.lock().unwrap();
        state.resubmissions.push(job_id.to_string());
        JobId::new(format!("{}-r{}", job_id, state.resubmissions.len()))
    }

    async fn start_job(&self, kind: JobKind, _params: serde_json::Value) -> AppResult<JobId> {
        JobId::new(format!("{}-new", kind))
    }
}

fn snapshot_for(job_id: &JobId, reply: Reply) -> AppResult<JobSnapshot> {
    match reply {
        Reply::State(state) => Ok(JobSnapshot::new(job_id.clone(), state)),
        Reply::Done(result) => Ok(JobSnapshot::done(job_id.clone(), Some(result))),
        Reply::Failed(message) => Ok(JobSnapshot::failed(
            job_id.clone(),
            ErrorDetail::reported(message),
        )),
        Reply::Error(error) => Err(error),
    }
}

/// How the push side behaves for one job
#[derive(Debug, Clone)]
pub enum PushScript {
    /// Subscription is refused
    Refuse,
    /// Subscription succeeds but nothing is ever pushed
    Silent,
    /// Frames delivered at the given offsets from the fake's creation
    Frames(Vec<(u64, Reply)>),
}

pub struct ScriptedPush {
    origin: Instant,
    scripts: Mutex<HashMap<String, PushScript>>,
    subscriptions: Mutex<HashMap<String, u32>>,
}

impl ScriptedPush {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            scripts: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn script(self, job_id: &str, script: PushScript) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(job_id.to_string(), script);
        self
    }

    pub fn subscriptions(&self, job_id: &str) -> u32 {
        self.subscriptions
            .lock()
            .unwrap()
            .get(job_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl PushSource for ScriptedPush {
    async fn subscribe(&self, job_id: &JobId) -> AppResult<PushStream> {
        *self
            .subscriptions
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default() += 1;

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(job_id.as_str())
            .cloned()
            .unwrap_or(PushScript::Refuse);

        match script {
            PushScript::Refuse => Err(AppError::BackendUnavailable(
                "subscription refused".to_string(),
            )),
            PushScript::Silent => Ok(futures::stream::pending().boxed()),
            PushScript::Frames(frames) => {
                let origin = self.origin;
                let job_id = job_id.clone();
                let stream = futures::stream::iter(frames).then(move |(secs, reply)| {
                    let job_id = job_id.clone();
                    async move {
                        tokio::time::sleep_until(origin + Duration::from_secs(secs)).await;
                        snapshot_for(&job_id, reply)
                    }
                });
                // Keep the socket open after the last frame.
                Ok(stream.chain(futures::stream::pending()).boxed())
            }
        }
    }
}
