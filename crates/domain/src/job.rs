use crate::session::{ConversationId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type JobId = Uuid;

/// §4.H named queues. Names are conventions; mapping to cores/capacity is
/// deployment-time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    Default,
    Transcription,
    Memory,
}

impl Queue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Queue::Default => "default",
            Queue::Transcription => "transcription",
            Queue::Memory => "memory",
        }
    }
}

/// §4.H informative priority mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// §3 Job.meta — a typed struct with a small open-ended `extra` map (§9
/// redesign guidance), rather than an ad hoc attribute bag. `audio_uuid`,
/// `conversation_id`, and `client_id` are first-class because every job in
/// the post-processing chain cascades them (§3 Cascade).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMeta {
    pub audio_uuid: Option<SessionId>,
    pub conversation_id: Option<ConversationId>,
    pub client_id: Option<String>,
    /// §4.G.e progress fields the Conversation/Speech-Detection controllers
    /// write back every tick.
    pub transcript_preview: Option<String>,
    pub transcript_length: Option<usize>,
    pub speakers: Vec<String>,
    pub word_count: Option<usize>,
    pub duration_seconds: Option<f64>,
    pub has_speech: Option<bool>,
    pub chunks_processed: Option<u64>,
    pub inactivity_seconds: Option<u64>,
    pub last_update: Option<chrono::DateTime<chrono::Utc>>,
    /// Open-ended bag for job-specific fields that don't warrant a
    /// first-class struct member.
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl JobMeta {
    /// §3 Cascade: propagate `conversation_id`/`audio_uuid` from an upstream
    /// job's metadata into this (downstream) job's metadata, once known.
    /// Fields already set on `self` are left untouched.
    pub fn cascade_from(&mut self, upstream: &JobMeta) {
        if self.audio_uuid.is_none() {
            self.audio_uuid = upstream.audio_uuid;
        }
        if self.conversation_id.is_none() {
            self.conversation_id = upstream.conversation_id;
        }
        if self.client_id.is_none() {
            self.client_id = upstream.client_id.clone();
        }
    }
}

/// §4.H per-job contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Deferred,
    Running,
    Finished,
    Failed,
    DeferredForever,
    Cancelled,
}

/// §3 Job — a unit of work on a named queue with priority, a dependency set,
/// a timeout, a result TTL, and cascading metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: Queue,
    pub function: String,
    pub args: serde_json::Value,
    pub priority: Priority,
    pub dependency_ids: Vec<JobId>,
    pub timeout_secs: u64,
    pub result_ttl_secs: u64,
    pub meta: JobMeta,
    pub status: JobStatus,
    pub description: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Job {
    pub fn is_runnable_given(&self, dependency_statuses: &[JobStatus]) -> bool {
        dependency_statuses.iter().all(|s| *s == JobStatus::Finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cascade_fills_only_unset_fields() {
        let mut downstream = JobMeta {
            client_id: Some("explicit-client".to_string()),
            ..Default::default()
        };
        let upstream = JobMeta {
            audio_uuid: Some(Uuid::new_v4()),
            conversation_id: Some(Uuid::new_v4()),
            client_id: Some("upstream-client".to_string()),
            ..Default::default()
        };

        downstream.cascade_from(&upstream);

        assert_eq!(downstream.audio_uuid, upstream.audio_uuid);
        assert_eq!(downstream.conversation_id, upstream.conversation_id);
        assert_eq!(downstream.client_id.as_deref(), Some("explicit-client"));
    }

    #[test]
    fn runnable_only_when_all_dependencies_finished() {
        assert!(JobMeta::default().audio_uuid.is_none());
        assert!(Job::is_runnable_given(
            &dummy_job(),
            &[JobStatus::Finished, JobStatus::Finished]
        ));
        assert!(!Job::is_runnable_given(
            &dummy_job(),
            &[JobStatus::Finished, JobStatus::Failed]
        ));
    }

    fn dummy_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            queue: Queue::Default,
            function: "noop".to_string(),
            args: serde_json::json!({}),
            priority: Priority::default(),
            dependency_ids: vec![],
            timeout_secs: 60,
            result_ttl_secs: 60,
            meta: JobMeta::default(),
            status: JobStatus::Queued,
            description: None,
            retry_count: 0,
            max_retries: 3,
        }
    }
}
