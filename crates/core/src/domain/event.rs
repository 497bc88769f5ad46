// Queue Event Model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::error::DomainError;
use super::job::JobId;

/// Observable event categories forwarded to stream clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Completed,
    Failed,
    Progress,
    Stalled,
    Active,
    Waiting,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Completed,
        EventKind::Failed,
        EventKind::Progress,
        EventKind::Stalled,
        EventKind::Active,
        EventKind::Waiting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
            EventKind::Progress => "progress",
            EventKind::Stalled => "stalled",
            EventKind::Active => "active",
            EventKind::Waiting => "waiting",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DomainError::UnknownEventKind(s.to_string()))
    }
}

/// One change notification produced by an engine for one queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEvent {
    pub kind: EventKind,
    pub fields: Map<String, Value>,
}

impl QueueEvent {
    pub fn new(kind: EventKind, fields: Map<String, Value>) -> Self {
        Self { kind, fields }
    }

    fn for_job(kind: EventKind, job_id: &JobId) -> Self {
        let mut fields = Map::new();
        fields.insert("jobId".to_string(), Value::String(job_id.clone()));
        Self { kind, fields }
    }

    fn with(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn waiting(job_id: &JobId) -> Self {
        Self::for_job(EventKind::Waiting, job_id)
    }

    pub fn active(job_id: &JobId) -> Self {
        Self::for_job(EventKind::Active, job_id).with("prev", Value::from("waiting"))
    }

    pub fn progress(job_id: &JobId, data: Value) -> Self {
        Self::for_job(EventKind::Progress, job_id).with("data", data)
    }

    pub fn completed(job_id: &JobId, returnvalue: Value) -> Self {
        Self::for_job(EventKind::Completed, job_id)
            .with("returnvalue", returnvalue)
            .with("prev", Value::from("active"))
    }

    pub fn failed(job_id: &JobId, reason: &str) -> Self {
        Self::for_job(EventKind::Failed, job_id)
            .with("failedReason", Value::from(reason))
            .with("prev", Value::from("active"))
    }

    pub fn stalled(job_id: &JobId) -> Self {
        Self::for_job(EventKind::Stalled, job_id)
    }

    /// Event fields plus the queue name, as written to stream clients
    pub fn to_payload(&self, queue: &str) -> Value {
        let mut payload = self.fields.clone();
        payload.insert("queue".to_string(), Value::from(queue));
        Value::Object(payload)
    }

    /// Decode a stored `(event, payload)` pair
    pub fn from_stored(event: &str, payload: &str) -> Result<Self, DomainError> {
        let kind = event.parse::<EventKind>()?;
        let fields = match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                return Err(DomainError::ValidationError(format!(
                    "event payload is not a JSON object: {}",
                    payload
                )))
            }
        };
        Ok(Self { kind, fields })
    }
}
