//! Live channel and inspection API models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final message of a channel whose job reached a success terminal state
pub const SUCCESS: &str = "success";

/// Final message of a channel whose job was rejected or failed
pub const FAILURE: &str = "failure";

/// Image build request, sent as the first message on `/ws/build`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildJobRequest {
    /// Owning application
    #[serde(default)]
    pub app_id: i64,

    #[serde(default)]
    pub image_name: String,

    #[serde(default)]
    pub version: String,

    /// Git URL of the source to build
    #[serde(default)]
    pub repos_url: String,

    #[serde(default)]
    pub branch: String,

    /// Dockerfile path relative to the repository root
    #[serde(default)]
    pub dockerfile: Option<String>,
}

/// Deployment request, sent as the first message on `/ws/deploy`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployJobRequest {
    #[serde(default)]
    pub app_id: i64,

    #[serde(default)]
    pub app_name: String,

    #[serde(default)]
    pub deployment_name: String,

    /// Hosts to deploy to, visited in order
    #[serde(default)]
    pub server_ids: Vec<i64>,

    /// Name of the deployment this one replaces, when it is being renamed
    #[serde(default)]
    pub replaces: Option<String>,

    pub payload: DeployPayload,
}

/// What gets applied on each target host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeployPayload {
    /// A Kubernetes manifest applied with `kubectl`
    Manifest {
        #[serde(default)]
        object: ObjectKind,
        yaml: String,
    },

    /// A plain Docker container
    Container {
        image: String,
        #[serde(default)]
        ports: Vec<PortMapping>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
}

/// Kubernetes object kind carried by a manifest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    #[default]
    Deployment,
    Service,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Deployment => "deployment",
            ObjectKind::Service => "service",
        }
    }
}

/// Host to container port mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
    #[serde(default)]
    pub protocol: Option<String>,
}

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// One audit entry as shown to operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLogView {
    pub id: Uuid,
    pub user_id: i64,
    pub subject_id: String,
    pub subject_type: String,
    pub operation: String,
    pub operation_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Operation log listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLogResponse {
    pub entries: Vec<OperationLogView>,
    pub total: usize,
}

/// Build transcript of an image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageLogResponse {
    pub name: String,
    pub version: String,
    pub status: String,
    pub url: String,
    pub log: Vec<String>,
}

/// Deployment record with its last transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResponse {
    pub name: String,
    pub app_id: i64,
    pub kind: String,
    pub status: String,
    pub server_ids: Vec<i64>,
    pub payload: Option<String>,
    pub log: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}
