//! Operation (audit) log entries

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use deckhand_wire::OperationLogView;

/// Operation an audit entry brackets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Build,
    Deploy,
}

/// Kind of subject an audit entry is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    Image,
    Deployment,
    Service,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Image => "image",
            SubjectType::Deployment => "deployment",
            SubjectType::Service => "service",
        }
    }
}

impl std::str::FromStr for SubjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(SubjectType::Image),
            "deployment" => Ok(SubjectType::Deployment),
            "service" => Ok(SubjectType::Service),
            _ => Err(format!("Invalid subject type: {}", s)),
        }
    }
}

/// Outcome recorded on an audit entry.
///
/// Entries are written `Unconfirmed` and only a successful job moves them to
/// `Success`. An entry left `Unconfirmed` means the operation never confirmed
/// success; it must not be read as "still running".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Unconfirmed,
    Success,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStatus::Unconfirmed => f.write_str("unconfirmed"),
            OperationStatus::Success => f.write_str("success"),
        }
    }
}

/// Subject of an audit entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub subject_type: SubjectType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub id: Uuid,
    pub user_id: i64,
    pub subject: Subject,
    pub operation: OperationKind,
    pub operation_status: OperationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OperationLogEntry {
    pub fn to_view(&self) -> OperationLogView {
        OperationLogView {
            id: self.id,
            user_id: self.user_id,
            subject_id: self.subject.id.clone(),
            subject_type: self.subject.subject_type.as_str().to_string(),
            operation: match self.operation {
                OperationKind::Build => "build".to_string(),
                OperationKind::Deploy => "deploy".to_string(),
            },
            operation_status: self.operation_status.to_string(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
