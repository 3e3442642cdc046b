//! Persistent store seam.
//!
//! The core only needs keyed reads, updates and upserts; the relational
//! schema behind them belongs to the CRUD side of the dashboard.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::DeckhandError;
use crate::models::operation::{OperationLogEntry, OperationStatus, SubjectType};
use crate::models::records::{Application, DeploymentRecord, ImageRecord};
use crate::models::server::ServerRecord;
use crate::models::status::{AppHealth, EntityKey, EntityStatus};

pub use memory::MemoryStore;

#[async_trait]
pub trait Store: Send + Sync {
    async fn server(&self, id: i64) -> Result<Option<ServerRecord>, DeckhandError>;

    async fn application(&self, id: i64) -> Result<Option<Application>, DeckhandError>;

    async fn set_app_health(&self, app_id: i64, health: AppHealth) -> Result<(), DeckhandError>;

    async fn status(&self, key: &EntityKey) -> Result<Option<EntityStatus>, DeckhandError>;

    async fn set_status(&self, key: &EntityKey, status: EntityStatus) -> Result<(), DeckhandError>;

    async fn deployment(
        &self,
        app_id: i64,
        name: &str,
    ) -> Result<Option<DeploymentRecord>, DeckhandError>;

    /// Every deployment carrying `name`, across applications
    async fn deployments_named(&self, name: &str) -> Result<Vec<DeploymentRecord>, DeckhandError>;

    /// Insert, or overwrite the record with the same (name, app_id)
    async fn upsert_deployment(&self, record: DeploymentRecord) -> Result<(), DeckhandError>;

    async fn remove_deployment(&self, app_id: i64, name: &str) -> Result<bool, DeckhandError>;

    async fn image(&self, name: &str, version: &str) -> Result<Option<ImageRecord>, DeckhandError>;

    /// Insert, or overwrite the record with the same (name, version)
    async fn upsert_image(&self, record: ImageRecord) -> Result<(), DeckhandError>;

    async fn insert_operation(&self, entry: OperationLogEntry) -> Result<(), DeckhandError>;

    /// Returns false when no entry has this id
    async fn update_operation_status(
        &self,
        id: Uuid,
        status: OperationStatus,
    ) -> Result<bool, DeckhandError>;

    /// Audit entries, newest first
    async fn operations(
        &self,
        subject_type: Option<SubjectType>,
        subject_id: Option<&str>,
    ) -> Result<Vec<OperationLogEntry>, DeckhandError>;
}
