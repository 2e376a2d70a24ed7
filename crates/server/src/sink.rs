use arbiter_core::events::{EventOutcome, EventSink, PipelineEvent};
use tracing::{info, warn};

/// Forwards pipeline events to the tracing subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: PipelineEvent) {
        let request_id = event.request_id.as_ref().map_or("none", |id| id.0.as_str());
        let worker_id = event.worker_id.as_ref().map_or("none", |id| id.0.as_str());
        let payload = serde_json::to_string(&event.payload).unwrap_or_default();

        match event.outcome {
            EventOutcome::Failed => warn!(
                event_name = %event.event_type,
                event_id = %event.event_id,
                category = ?event.category,
                request_id,
                worker_id,
                payload = %payload,
                "pipeline event"
            ),
            EventOutcome::Success | EventOutcome::Degraded => info!(
                event_name = %event.event_type,
                event_id = %event.event_id,
                category = ?event.category,
                request_id,
                worker_id,
                degraded = event.outcome == EventOutcome::Degraded,
                payload = %payload,
                "pipeline event"
            ),
        }
    }
}
