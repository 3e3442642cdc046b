//! Entity status values and keys

use std::fmt;

use serde::{Deserialize, Serialize};

/// Build/deploy status of a subject entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityStatus {
    Init,
    Building,
    BuildSuccess,
    BuildFailure,
    Deploying,
    DeploySuccess,
    DeployFailure,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Init => "init",
            EntityStatus::Building => "building",
            EntityStatus::BuildSuccess => "build-success",
            EntityStatus::BuildFailure => "build-failure",
            EntityStatus::Deploying => "deploying",
            EntityStatus::DeploySuccess => "deploy-success",
            EntityStatus::DeployFailure => "deploy-failure",
        }
    }

    /// Whether a job still owns the entity
    pub fn is_in_progress(&self) -> bool {
        matches!(self, EntityStatus::Building | EntityStatus::Deploying)
    }

    /// Whether no further transition follows without a new job
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EntityStatus::BuildSuccess
                | EntityStatus::BuildFailure
                | EntityStatus::DeploySuccess
                | EntityStatus::DeployFailure
        )
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health flag of an application, independent of its subjects' statuses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppHealth {
    #[default]
    Init,
    Normal,
    Abnormal,
}

/// Natural key of an entity whose status a job drives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityKey {
    Image { name: String, version: String },
    Deployment { app_id: i64, name: String },
    Service { app_id: i64, name: String },
}

impl EntityKey {
    pub fn kind(&self) -> &'static str {
        match self {
            EntityKey::Image { .. } => "image",
            EntityKey::Deployment { .. } => "deployment",
            EntityKey::Service { .. } => "service",
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Image { name, version } => write!(f, "image:{}:{}", name, version),
            EntityKey::Deployment { app_id, name } => write!(f, "deployment:{}:{}", app_id, name),
            EntityKey::Service { app_id, name } => write!(f, "service:{}:{}", app_id, name),
        }
    }
}
