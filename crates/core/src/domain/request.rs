use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::worker::WorkerId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("REQ-{}", &suffix[..8].to_ascii_uppercase()))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub request_type: String,
    pub priority: Priority,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub processing_time_ms: Option<u64>,
    pub assigned_agents: Vec<WorkerId>,
}

impl Request {
    pub fn new(request_type: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: RequestId::generate(),
            request_type: request_type.into(),
            priority,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            processing_time_ms: None,
            assigned_agents: Vec::new(),
        }
    }

    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        matches!(
            (self.status, next),
            (RequestStatus::Pending, RequestStatus::Processing)
                | (RequestStatus::Pending, RequestStatus::Failed)
                | (RequestStatus::Processing, RequestStatus::Completed)
                | (RequestStatus::Processing, RequestStatus::Failed)
        )
    }

    pub fn transition_to(&mut self, next: RequestStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidRequestTransition { from: self.status, to: next })
    }

    /// Records the routed workers and moves the request into `processing`.
    ///
    /// Only a pending request can be assigned, so the worker set is written once.
    pub fn begin_processing(&mut self, workers: Vec<WorkerId>) -> Result<(), DomainError> {
        self.transition_to(RequestStatus::Processing)?;
        self.assigned_agents = workers;
        Ok(())
    }

    pub fn finish(&mut self, status: RequestStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(status)?;
        let elapsed = now.signed_duration_since(self.created_at).num_milliseconds();
        self.processing_time_ms = Some(elapsed.max(0) as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Priority, Request, RequestStatus};
    use crate::domain::worker::Specialization;
    use crate::errors::DomainError;

    #[test]
    fn lifecycle_moves_forward_only() {
        let mut request = Request::new("Loan Application", Priority::High);
        request
            .begin_processing(vec![Specialization::Credit.worker_id()])
            .expect("pending -> processing");
        request.finish(RequestStatus::Completed, Utc::now()).expect("processing -> completed");

        let error = request
            .transition_to(RequestStatus::Processing)
            .expect_err("completed -> processing must be rejected");
        assert!(matches!(error, DomainError::InvalidRequestTransition { .. }));
        assert!(request.processing_time_ms.is_some());
    }

    #[test]
    fn assigned_agents_are_written_once() {
        let mut request = Request::new("Fraud Claim", Priority::Medium);
        request.begin_processing(vec![Specialization::Fraud.worker_id()]).expect("first assign");

        let error = request
            .begin_processing(vec![Specialization::Esg.worker_id()])
            .expect_err("second assignment must fail");
        assert!(matches!(error, DomainError::InvalidRequestTransition { .. }));
        assert_eq!(request.assigned_agents, vec![Specialization::Fraud.worker_id()]);
    }

    #[test]
    fn generated_ids_are_prefixed() {
        let request = Request::new("ESG Review", Priority::Low);
        assert!(request.id.0.starts_with("REQ-"));
        assert_eq!(request.id.0.len(), 12);
    }
}
