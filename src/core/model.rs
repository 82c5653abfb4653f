//! Domain objects persisted by the vault.
//!
//! The core never mutates these; a change is a new version that gets
//! re-signed and re-written. Field names serialize camelCase and enum values
//! kebab-case, matching the on-disk documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

pub const INITIATIVE_SCHEMA_VERSION: u32 = 1;

pub type Metadata = Map<String, JsonValue>;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum InitiativeStatus {
    Planning,
    Active,
    OnHold,
    Completed,
    Cancelled,
}

impl InitiativeStatus {
    pub fn as_str(&self) -> &str {
        match self {
            InitiativeStatus::Planning => "planning",
            InitiativeStatus::Active => "active",
            InitiativeStatus::OnHold => "on-hold",
            InitiativeStatus::Completed => "completed",
            InitiativeStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Initiative {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub status: InitiativeStatus,
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Initiative {
    pub fn new(id: &str, name: &str, owner: &str) -> Self {
        let now = crate::core::time::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            owner: owner.to_string(),
            status: InitiativeStatus::Planning,
            schema_version: INITIATIVE_SCHEMA_VERSION,
            created_at: now,
            updated_at: now,
            metadata: Metadata::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Review,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(&self) -> &str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
        }
    }
}

/// Checklist item embedded in its parent task.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: String,
    pub title: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

/// Governance/UX annotations. Opaque to the vault; stored as given.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskSignals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_priority: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ai_signals: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Owning initiative. Fixed for the lifetime of the task.
    pub initiative_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub signals: TaskSignals,
}

impl Task {
    pub fn new(id: &str, initiative_id: &str, title: &str) -> Self {
        let now = crate::core::time::now();
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            initiative_id: initiative_id.to_string(),
            parent_task_id: None,
            subtasks: Vec::new(),
            dependencies: Vec::new(),
            assignee: None,
            due_date: None,
            created_at: now,
            updated_at: now,
            metadata: Metadata::new(),
            signals: TaskSignals::default(),
        }
    }

    /// Due date when set, otherwise creation date.
    pub fn effective_date(&self) -> DateTime<Utc> {
        self.due_date.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipKind {
    Blocks,
    DependsOn,
    Follows,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &str {
        match self {
            RelationshipKind::Blocks => "blocks",
            RelationshipKind::DependsOn => "depends-on",
            RelationshipKind::Follows => "follows",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sla {
    pub target_date: DateTime<Utc>,
    pub tolerance_hours: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RiskAnnotation {
    pub level: RiskLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Directed relationship `from -> to`: `from` must happen before `to`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DependencyContract {
    pub from: String,
    pub to: String,
    pub kind: RelationshipKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla: Option<Sla>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskAnnotation>,
}

impl DependencyContract {
    pub fn new(from: &str, to: &str, kind: RelationshipKind) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            kind,
            sla: None,
            risk: None,
        }
    }

    pub fn key(&self) -> (String, String) {
        (self.from.clone(), self.to.clone())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JournalStatus {
    Pending,
    Completed,
    Failed,
}

impl JournalStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JournalStatus::Pending => "pending",
            JournalStatus::Completed => "completed",
            JournalStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JournalStatus::Pending)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub initiative_id: String,
    pub operation: String,
    #[serde(default)]
    pub payload: JsonValue,
    pub status: JournalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// What a caller hands to the journal; id and timestamp are assigned on append.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalIntent {
    pub operation: String,
    pub payload: JsonValue,
    pub request_id: Option<String>,
}

impl JournalIntent {
    pub fn new(operation: &str, payload: JsonValue) -> Self {
        Self {
            operation: operation.to_string(),
            payload,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<&str>) -> Self {
        self.request_id = request_id.map(String::from);
        self
    }
}
