//! Task data model: urgency, status, the task record and list filters.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How soon a task needs attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    /// Deadline within 24 hours or explicit urgency language.
    #[serde(alias = "URGENTE")]
    Urgent,
    /// Deadline in 1–3 days or medium importance.
    #[serde(alias = "MEDIANO")]
    Medium,
    /// No explicit deadline; administrative content.
    #[serde(alias = "ROTINEIRA")]
    Routine,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "URGENT",
            Self::Medium => "MEDIUM",
            Self::Routine => "ROUTINE",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "URGENT" | "URGENTE" => Ok(Self::Urgent),
            "MEDIUM" | "MEDIANO" | "MEDIA" | "MÉDIA" => Ok(Self::Medium),
            "ROUTINE" | "ROTINEIRA" | "LOW" => Ok(Self::Routine),
            other => Err(format!("unknown urgency: {other}")),
        }
    }
}

/// Task lifecycle. `Pending` → `Completed` is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// An actionable task derived from an email (or submitted manually).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Provider message id, globally unique. Immutable.
    pub dedup_key: String,
    pub summary: String,
    pub urgency: Urgency,
    pub category: String,
    /// Immutable.
    pub from_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub received_at: DateTime<Utc>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub raw_body: String,
    pub sanitized_body: String,
    /// Last reply sent for this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task.
    pub fn new(
        tenant_id: Uuid,
        dedup_key: impl Into<String>,
        summary: impl Into<String>,
        urgency: Urgency,
        category: impl Into<String>,
        from_address: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            dedup_key: dedup_key.into(),
            summary: summary.into(),
            urgency,
            category: category.into(),
            from_address: from_address.into(),
            to_address: None,
            subject: None,
            received_at,
            status: TaskStatus::Pending,
            confidence: None,
            raw_body: String::new(),
            sanitized_body: String::new(),
            completion_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Builder: set recipient.
    pub fn with_to_address(mut self, to: impl Into<String>) -> Self {
        self.to_address = Some(to.into());
        self
    }

    /// Builder: set classifier confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Builder: set raw and sanitized bodies.
    pub fn with_body(mut self, raw: impl Into<String>, sanitized: impl Into<String>) -> Self {
        self.raw_body = raw.into();
        self.sanitized_body = sanitized.into();
        self
    }

    /// Move to `Completed`. Returns false if already completed.
    pub fn complete(&mut self) -> bool {
        if self.status == TaskStatus::Completed {
            return false;
        }
        self.status = TaskStatus::Completed;
        self.updated_at = Utc::now();
        true
    }
}

/// Per-tenant dashboard counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub urgent_count: u64,
    pub pending_count: u64,
    pub completed_count: u64,
}

/// Optional filters for task listings. Empty filter matches everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilter {
    #[serde(default)]
    pub urgency: Option<Urgency>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub category: Option<String>,
    /// Case-insensitive substring of summary or subject.
    #[serde(default)]
    pub query: Option<String>,
    /// Inclusive lower bound on `received_at`.
    #[serde(default)]
    pub received_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `received_at`.
    #[serde(default)]
    pub received_before: Option<DateTime<Utc>>,
}

/// One page of a task listing plus totals for the whole filtered set.
#[derive(Debug, Clone, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub page: u32,
    pub size: u32,
    pub total_items: u64,
    pub total_pages: u64,
}

impl TaskPage {
    pub fn new(tasks: Vec<Task>, page: u32, size: u32, total_items: u64) -> Self {
        let size = size.max(1);
        Self {
            tasks,
            page,
            size,
            total_items,
            total_pages: total_items.div_ceil(u64::from(size)),
        }
    }
}
