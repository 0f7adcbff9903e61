use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::SyncError;
use crate::status::OperationStatus;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for OperationKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            _ => Err(SyncError::Parse {
                kind: "operation kind",
                value: s.to_string(),
                valid: "create, update, delete",
            }),
        }
    }
}

/// Dispatch priority. Lower numbers drain first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub enum Priority {
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
}

impl Priority {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for Priority {
    type Error = SyncError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::High),
            2 => Ok(Priority::Medium),
            3 => Ok(Priority::Low),
            other => Err(SyncError::InvalidPriority(other)),
        }
    }
}

impl From<Priority> for i64 {
    fn from(priority: Priority) -> Self {
        priority.as_i64()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "1 (high)"),
            Priority::Medium => write!(f, "2 (medium)"),
            Priority::Low => write!(f, "3 (low)"),
        }
    }
}

impl FromStr for Priority {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1" | "high" => Ok(Priority::High),
            "2" | "medium" => Ok(Priority::Medium),
            "3" | "low" => Ok(Priority::Low),
            _ => Err(SyncError::Parse {
                kind: "priority",
                value: s.to_string(),
                valid: "1/high, 2/medium, 3/low",
            }),
        }
    }
}

/// One queued mutation of a syncable entity.
///
/// The entity is referenced by `(entity_type, entity_id)` only; `payload` is
/// the full snapshot taken at enqueue time, since the entity can change again
/// (or be deleted) before the operation is dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(rename = "operationKind")]
    pub kind: OperationKind,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub status: OperationStatus,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncOperation {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        kind: OperationKind,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            kind,
            payload,
            priority: Priority::default(),
            status: OperationStatus::Pending,
            error_message: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Entity version captured in the payload snapshot, if present.
    pub fn payload_version(&self) -> Option<u64> {
        self.payload.get("version").and_then(serde_json::Value::as_u64)
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}/{} [{}] priority {} retries {}/{}",
            self.id,
            self.kind,
            self.entity_type,
            self.entity_id,
            self.status,
            self.priority.as_i64(),
            self.retry_count,
            self.max_retries
        )?;
        if let Some(err) = &self.error_message {
            write!(f, " - {}", err)?;
        }
        Ok(())
    }
}
