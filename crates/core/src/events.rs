use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::request::RequestId;
use crate::domain::worker::WorkerId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Request,
    Routing,
    Execution,
    Decision,
    Load,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Success,
    Degraded,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub event_id: String,
    pub request_id: Option<RequestId>,
    pub worker_id: Option<WorkerId>,
    pub event_type: String,
    pub category: EventCategory,
    pub outcome: EventOutcome,
    pub payload: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(
        event_type: impl Into<String>,
        category: EventCategory,
        outcome: EventOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            request_id: None,
            worker_id: None,
            event_type: event_type.into(),
            category,
            outcome,
            payload: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn for_request(mut self, request_id: &RequestId) -> Self {
        self.request_id = Some(request_id.clone());
        self
    }

    pub fn for_worker(mut self, worker_id: &WorkerId) -> Self {
        self.worker_id = Some(worker_id.clone());
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// Fire-and-forget publication. Implementations swallow their own delivery
/// failures; nothing a sink does may change pipeline behaviour.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: PipelineEvent);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: PipelineEvent) {}
}

#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl InMemoryEventSink {
    pub fn events(&self) -> Vec<PipelineEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn of_type(&self, event_type: &str) -> Vec<PipelineEvent> {
        self.events().into_iter().filter(|event| event.event_type == event_type).collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn publish(&self, event: PipelineEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
