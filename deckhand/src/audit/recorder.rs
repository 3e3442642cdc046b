//! Audit log recorder.
//!
//! Writes go through a dedicated queue so a job never waits on the store for
//! its audit entry. An entry is written `Unconfirmed` when the job starts and
//! only a successful job moves it to `Success`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::DeckhandError;
use crate::models::operation::{OperationKind, OperationLogEntry, OperationStatus, Subject};
use crate::store::Store;

enum AuditCommand {
    Start(OperationLogEntry),
    Finish(Uuid),
    Flush(oneshot::Sender<()>),
}

/// Handle jobs use to schedule audit writes
#[derive(Clone)]
pub struct AuditRecorder {
    tx: mpsc::Sender<AuditCommand>,
}

/// Receiving side, driven by [`AuditWorker::run`]
pub struct AuditWorker {
    rx: mpsc::Receiver<AuditCommand>,
}

impl AuditRecorder {
    /// Create a recorder and the worker that applies its writes
    pub fn new(capacity: usize) -> (Self, AuditWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, AuditWorker { rx })
    }

    /// Schedule the pessimistic "started" entry and return its id.
    ///
    /// Fails when the write cannot be queued; the job itself may go on.
    pub fn start(
        &self,
        user_id: i64,
        subject: Subject,
        operation: OperationKind,
    ) -> Result<Uuid, DeckhandError> {
        let now = Utc::now();
        let entry = OperationLogEntry {
            id: Uuid::new_v4(),
            user_id,
            subject,
            operation,
            operation_status: OperationStatus::Unconfirmed,
            created_at: now,
            updated_at: now,
        };
        let id = entry.id;

        self.tx
            .try_send(AuditCommand::Start(entry))
            .map_err(|e| DeckhandError::AuditError(format!("Cannot schedule audit entry: {}", e)))?;
        Ok(id)
    }

    /// Confirm entry `id` as successful. Queued after its start.
    pub async fn finish(&self, id: Uuid) -> Result<(), DeckhandError> {
        self.tx
            .send(AuditCommand::Finish(id))
            .await
            .map_err(|_| DeckhandError::AuditError("Audit worker is gone".to_string()))
    }

    /// Wait until every write queued so far has been applied
    pub async fn flush(&self) -> Result<(), DeckhandError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(AuditCommand::Flush(ack_tx))
            .await
            .map_err(|_| DeckhandError::AuditError("Audit worker is gone".to_string()))?;
        ack_rx
            .await
            .map_err(|_| DeckhandError::AuditError("Audit worker stopped".to_string()))
    }
}

impl AuditWorker {
    /// Apply queued writes until shutdown, then drain what is left
    pub async fn run(
        mut self,
        store: Arc<dyn Store>,
        mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
    ) {
        info!("Audit recorder starting...");

        loop {
            tokio::select! {
                _ = &mut shutdown_signal => {
                    info!("Audit recorder shutting down, draining queue...");
                    break;
                }
                command = self.rx.recv() => match command {
                    Some(command) => apply(store.as_ref(), command).await,
                    None => {
                        info!("All audit handles dropped");
                        return;
                    }
                }
            }
        }

        self.rx.close();
        let mut drained = 0;
        while let Some(command) = self.rx.recv().await {
            apply(store.as_ref(), command).await;
            drained += 1;
        }
        info!("Audit recorder stopped ({} queued writes applied)", drained);
    }
}

async fn apply(store: &dyn Store, command: AuditCommand) {
    match command {
        AuditCommand::Start(entry) => {
            let id = entry.id;
            match store.insert_operation(entry).await {
                Ok(()) => debug!("Audit entry {} started", id),
                Err(e) => error!("Failed to write audit entry {}: {}", id, e),
            }
        }
        AuditCommand::Finish(id) => {
            match store.update_operation_status(id, OperationStatus::Success).await {
                Ok(true) => debug!("Audit entry {} confirmed", id),
                Ok(false) => warn!("Audit entry {} not found, cannot confirm", id),
                Err(e) => error!("Failed to confirm audit entry {}: {}", id, e),
            }
        }
        AuditCommand::Flush(ack) => {
            let _ = ack.send(());
        }
    }
}
