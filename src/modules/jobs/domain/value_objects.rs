/// Value objects for jobs domain
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle state of a tracked job, declared in forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Processing,
    Transcribing,
    Done,
    Failed,
}

impl JobState {
    /// Position in the forward order. Both terminal states share the last rank.
    pub fn rank(self) -> u8 {
        match self {
            JobState::Queued => 0,
            JobState::Processing => 1,
            JobState::Transcribing => 2,
            JobState::Done | JobState::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Processing => write!(f, "processing"),
            JobState::Transcribing => write!(f, "transcribing"),
            JobState::Done => write!(f, "done"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatusVocabulary::default()
            .resolve(s)
            .ok_or_else(|| format!("Invalid job status: {}", s))
    }
}

/// Maps the labels a backend uses for job status onto [`JobState`].
///
/// Different features report the same state under different names
/// (`published`, `analyzed`, `completed` all mean done), and new labels show
/// up over time, so the mapping is data rather than a closed match.
#[derive(Debug, Clone)]
pub struct StatusVocabulary {
    labels: HashMap<String, JobState>,
}

impl StatusVocabulary {
    pub fn empty() -> Self {
        Self {
            labels: HashMap::new(),
        }
    }

    /// Register an additional label. Labels are case-insensitive.
    pub fn with_alias(mut self, label: &str, state: JobState) -> Self {
        self.insert(label, state);
        self
    }

    pub fn insert(&mut self, label: &str, state: JobState) {
        self.labels.insert(Self::normalize(label), state);
    }

    pub fn resolve(&self, label: &str) -> Option<JobState> {
        self.labels.get(&Self::normalize(label)).copied()
    }

    fn normalize(label: &str) -> String {
        label.trim().to_lowercase().replace(['-', ' '], "_")
    }
}

impl Default for StatusVocabulary {
    fn default() -> Self {
        let aliases: [(&str, JobState); 18] = [
            ("queued", JobState::Queued),
            ("draft", JobState::Queued),
            ("uploaded", JobState::Queued),
            ("pending", JobState::Queued),
            ("processing", JobState::Processing),
            ("analyzing", JobState::Processing),
            ("running", JobState::Processing),
            ("transcribing", JobState::Transcribing),
            ("done", JobState::Done),
            ("published", JobState::Done),
            ("analyzed", JobState::Done),
            ("completed", JobState::Done),
            ("complete", JobState::Done),
            ("succeeded", JobState::Done),
            ("success", JobState::Done),
            ("failed", JobState::Failed),
            ("error", JobState::Failed),
            ("errored", JobState::Failed),
        ];

        let mut vocabulary = Self::empty();
        for (label, state) in aliases {
            vocabulary.insert(label, state);
        }
        vocabulary
    }
}
