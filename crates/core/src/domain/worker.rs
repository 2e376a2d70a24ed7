use serde::{Deserialize, Serialize};

use crate::domain::request::RequestId;

/// Load above which a worker reports itself as overloaded.
pub const OVERLOAD_LOAD: u8 = 90;
pub const MAX_LOAD: u8 = 100;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialization {
    Credit,
    Fraud,
    Esg,
}

impl Specialization {
    pub const ALL: [Specialization; 3] = [Self::Credit, Self::Fraud, Self::Esg];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Fraud => "fraud",
            Self::Esg => "esg",
        }
    }

    /// Accepts the bare tag as well as the worker id form (`credit-agent`).
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        let tag = normalized.strip_suffix("-agent").unwrap_or(&normalized);
        match tag {
            "credit" => Some(Self::Credit),
            "fraud" => Some(Self::Fraud),
            "esg" => Some(Self::Esg),
            _ => None,
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        WorkerId(format!("{}-agent", self.as_str()))
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Credit => "Credit Risk Analyst",
            Self::Fraud => "Fraud Detection Specialist",
            Self::Esg => "ESG Compliance Reviewer",
        }
    }

    pub fn default_threshold(&self) -> u8 {
        match self {
            Self::Esg => 60,
            Self::Credit => 70,
            Self::Fraud => 80,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Processing,
    Overloaded,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Overloaded => "overloaded",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub specialization: Specialization,
    pub status: WorkerStatus,
    pub current_load: u8,
    pub queue: Vec<RequestId>,
    pub scaling_threshold: u8,
    pub is_scaling: bool,
}

impl Worker {
    pub fn new(specialization: Specialization, initial_load: u8, scaling_threshold: u8) -> Self {
        let mut worker = Self {
            id: specialization.worker_id(),
            name: specialization.display_name().to_string(),
            specialization,
            status: WorkerStatus::Idle,
            current_load: 0,
            queue: Vec::new(),
            scaling_threshold,
            is_scaling: false,
        };
        worker.apply_load(initial_load);
        worker
    }

    /// Sets the load (capped at [`MAX_LOAD`]) and recomputes the derived fields.
    pub fn apply_load(&mut self, load: u8) {
        self.current_load = load.min(MAX_LOAD);
        self.refresh_derived();
    }

    pub fn refresh_derived(&mut self) {
        self.status = if self.current_load > OVERLOAD_LOAD {
            WorkerStatus::Overloaded
        } else if self.queue.is_empty() {
            WorkerStatus::Idle
        } else {
            WorkerStatus::Processing
        };
        self.is_scaling = self.current_load > self.scaling_threshold;
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }
}
