/// Test helper functions and registry builders
use super::fakes::{ScriptedBackend, ScriptedPush};
use jobwatch_lib::modules::jobs::application::{
    JobTracker, TrackerConfig, TrackerContext, TrackerRegistry,
};
use jobwatch_lib::modules::jobs::domain::{JobId, JobKind, JobUpdate};
use std::sync::Arc;

pub struct TestHarness {
    pub backend: Arc<ScriptedBackend>,
    pub push: Arc<ScriptedPush>,
    pub context: TrackerContext,
}

impl TestHarness {
    pub fn new(backend: ScriptedBackend, push: ScriptedPush) -> Self {
        let backend = Arc::new(backend);
        let push = Arc::new(push);
        let context = TrackerContext::new(
            backend.clone(),
            push.clone(),
            TrackerConfig::default(),
        );
        Self {
            backend,
            push,
            context,
        }
    }

    pub fn start(&self, job_id: &str, kind: JobKind) -> JobTracker {
        JobTracker::start(&self.context, job_id_of(job_id), kind)
    }

    pub fn registry(&self) -> TrackerRegistry {
        TrackerRegistry::new(self.context.clone())
    }
}

pub fn job_id_of(raw: &str) -> JobId {
    JobId::new(raw).unwrap()
}

/// Published states in order, marking the cancelled pseudo-state
pub fn states(updates: &[JobUpdate]) -> Vec<String> {
    updates
        .iter()
        .map(|update| {
            if update.is_cancelled() {
                "cancelled".to_string()
            } else {
                update.state.to_string()
            }
        })
        .collect()
}
