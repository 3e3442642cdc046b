//! In-memory store with an optional JSON snapshot on disk

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::DeckhandError;
use crate::filesys::file::File;
use crate::models::operation::{OperationLogEntry, OperationStatus, SubjectType};
use crate::models::records::{Application, DeploymentRecord, ImageRecord};
use crate::models::server::ServerRecord;
use crate::models::status::{AppHealth, EntityKey, EntityStatus};
use crate::store::Store;

/// One status write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: EntityStatus,
    pub at: DateTime<Utc>,
}

/// Status writes kept per entity, oldest dropped first
pub const STATUS_HISTORY_LEN: usize = 16;

/// Status row of an entity, with its most recent writes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEntry {
    pub key: EntityKey,
    pub history: Vec<StatusChange>,
}

/// Everything the store holds; also the on-disk snapshot format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub servers: Vec<ServerRecord>,
    #[serde(default)]
    pub applications: Vec<Application>,
    #[serde(default)]
    pub statuses: Vec<StatusEntry>,
    #[serde(default)]
    pub deployments: Vec<DeploymentRecord>,
    #[serde(default)]
    pub images: Vec<ImageRecord>,
    #[serde(default)]
    pub operations: Vec<OperationLogEntry>,
}

pub struct MemoryStore {
    data: RwLock<Snapshot>,
    snapshot_file: Option<File>,
}

impl MemoryStore {
    /// A store that lives only as long as the process
    pub fn new() -> Self {
        Self::from_snapshot(Snapshot::default())
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            data: RwLock::new(snapshot),
            snapshot_file: None,
        }
    }

    /// Load the snapshot file if it exists and rewrite it after every mutation
    pub async fn open(file: File) -> Result<Self, DeckhandError> {
        let snapshot = if file.exists().await {
            let snapshot: Snapshot = file.read_json().await?;
            info!(
                "Loaded store snapshot from {} ({} servers, {} deployments, {} images)",
                file.path().display(),
                snapshot.servers.len(),
                snapshot.deployments.len(),
                snapshot.images.len()
            );
            snapshot
        } else {
            info!("No store snapshot at {}, starting empty", file.path().display());
            Snapshot::default()
        };

        Ok(Self {
            data: RwLock::new(snapshot),
            snapshot_file: Some(file),
        })
    }

    pub async fn insert_server(&self, server: ServerRecord) -> Result<(), DeckhandError> {
        self.mutate(|data| {
            data.servers.retain(|s| s.id != server.id);
            data.servers.push(server);
        })
        .await
    }

    pub async fn insert_application(&self, application: Application) -> Result<(), DeckhandError> {
        self.mutate(|data| {
            data.applications.retain(|a| a.id != application.id);
            data.applications.push(application);
        })
        .await
    }

    /// Every status written for `key`, oldest first
    pub async fn status_history(&self, key: &EntityKey) -> Vec<EntityStatus> {
        let data = self.data.read().await;
        data.statuses
            .iter()
            .find(|entry| &entry.key == key)
            .map(|entry| entry.history.iter().map(|change| change.status).collect())
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.data.read().await.clone()
    }

    async fn mutate<R>(&self, f: impl FnOnce(&mut Snapshot) -> R) -> Result<R, DeckhandError> {
        let mut data = self.data.write().await;
        let result = f(&mut *data);

        // Written under the lock so snapshots land in mutation order
        if let Some(file) = &self.snapshot_file {
            file.write_json_atomic(&*data).await.map_err(|e| {
                DeckhandError::StorageError(format!(
                    "Failed to write snapshot {}: {}",
                    file.path().display(),
                    e
                ))
            })?;
            debug!("Store snapshot written to {}", file.path().display());
        }

        Ok(result)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn server(&self, id: i64) -> Result<Option<ServerRecord>, DeckhandError> {
        let data = self.data.read().await;
        Ok(data.servers.iter().find(|s| s.id == id).cloned())
    }

    async fn application(&self, id: i64) -> Result<Option<Application>, DeckhandError> {
        let data = self.data.read().await;
        Ok(data.applications.iter().find(|a| a.id == id).cloned())
    }

    async fn set_app_health(&self, app_id: i64, health: AppHealth) -> Result<(), DeckhandError> {
        self.mutate(|data| {
            match data.applications.iter_mut().find(|a| a.id == app_id) {
                Some(application) => {
                    application.health = health;
                    Ok(())
                }
                None => Err(DeckhandError::NotFound(format!("application {}", app_id))),
            }
        })
        .await?
    }

    async fn status(&self, key: &EntityKey) -> Result<Option<EntityStatus>, DeckhandError> {
        let data = self.data.read().await;
        Ok(data
            .statuses
            .iter()
            .find(|entry| &entry.key == key)
            .and_then(|entry| entry.history.last())
            .map(|change| change.status))
    }

    async fn set_status(&self, key: &EntityKey, status: EntityStatus) -> Result<(), DeckhandError> {
        let change = StatusChange {
            status,
            at: Utc::now(),
        };
        self.mutate(|data| match data.statuses.iter_mut().find(|entry| &entry.key == key) {
            Some(entry) => {
                entry.history.push(change);
                let excess = entry.history.len().saturating_sub(STATUS_HISTORY_LEN);
                entry.history.drain(..excess);
            }
            None => data.statuses.push(StatusEntry {
                key: key.clone(),
                history: vec![change],
            }),
        })
        .await
    }

    async fn deployment(
        &self,
        app_id: i64,
        name: &str,
    ) -> Result<Option<DeploymentRecord>, DeckhandError> {
        let data = self.data.read().await;
        Ok(data
            .deployments
            .iter()
            .find(|d| d.app_id == app_id && d.name == name)
            .cloned())
    }

    async fn deployments_named(&self, name: &str) -> Result<Vec<DeploymentRecord>, DeckhandError> {
        let data = self.data.read().await;
        Ok(data
            .deployments
            .iter()
            .filter(|d| d.name == name)
            .cloned()
            .collect())
    }

    async fn upsert_deployment(&self, mut record: DeploymentRecord) -> Result<(), DeckhandError> {
        self.mutate(|data| {
            match data.deployments.iter_mut().find(|d| d.same_key(&record)) {
                Some(existing) => {
                    record.created_at = existing.created_at;
                    *existing = record;
                }
                None => data.deployments.push(record),
            }
        })
        .await
    }

    async fn remove_deployment(&self, app_id: i64, name: &str) -> Result<bool, DeckhandError> {
        self.mutate(|data| {
            let before = data.deployments.len();
            data.deployments
                .retain(|d| !(d.app_id == app_id && d.name == name));
            data.deployments.len() != before
        })
        .await
    }

    async fn image(&self, name: &str, version: &str) -> Result<Option<ImageRecord>, DeckhandError> {
        let data = self.data.read().await;
        Ok(data
            .images
            .iter()
            .find(|i| i.name == name && i.version == version)
            .cloned())
    }

    async fn upsert_image(&self, mut record: ImageRecord) -> Result<(), DeckhandError> {
        self.mutate(|data| {
            match data
                .images
                .iter_mut()
                .find(|i| i.name == record.name && i.version == record.version)
            {
                Some(existing) => {
                    record.created_at = existing.created_at;
                    *existing = record;
                }
                None => data.images.push(record),
            }
        })
        .await
    }

    async fn insert_operation(&self, entry: OperationLogEntry) -> Result<(), DeckhandError> {
        self.mutate(|data| data.operations.push(entry)).await
    }

    async fn update_operation_status(
        &self,
        id: Uuid,
        status: OperationStatus,
    ) -> Result<bool, DeckhandError> {
        self.mutate(|data| match data.operations.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.operation_status = status;
                entry.updated_at = Utc::now();
                true
            }
            None => false,
        })
        .await
    }

    async fn operations(
        &self,
        subject_type: Option<SubjectType>,
        subject_id: Option<&str>,
    ) -> Result<Vec<OperationLogEntry>, DeckhandError> {
        let data = self.data.read().await;
        let mut entries: Vec<OperationLogEntry> = data
            .operations
            .iter()
            .filter(|e| subject_type.map_or(true, |t| e.subject.subject_type == t))
            .filter(|e| subject_id.map_or(true, |id| e.subject.id == id))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }
}
