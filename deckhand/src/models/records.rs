//! Deployment, image and application records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::status::{AppHealth, EntityStatus};

/// Application owning images and deployments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub health: AppHealth,
}

/// How a deployment is realised on its hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentKind {
    Kubernetes,
    Docker,
}

impl DeploymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentKind::Kubernetes => "kubernetes",
            DeploymentKind::Docker => "docker",
        }
    }
}

/// Deployment record, keyed by (name, app_id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub name: String,
    pub app_id: i64,
    pub kind: DeploymentKind,
    pub status: EntityStatus,
    pub server_ids: Vec<i64>,

    /// Manifest or container spec that was applied
    #[serde(default)]
    pub payload: Option<String>,

    /// Per-host transcript: `{"<host>": {"out": [...], "err": [...]}}`
    #[serde(default)]
    pub log: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    pub fn same_key(&self, other: &DeploymentRecord) -> bool {
        self.name == other.name && self.app_id == other.app_id
    }
}

/// Image record, keyed by (name, version)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub name: String,
    pub version: String,
    pub app_id: i64,

    /// Registry reference the image was pushed to
    pub url: String,

    pub status: EntityStatus,

    #[serde(default)]
    pub log: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
