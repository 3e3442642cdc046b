//! Job controller.
//!
//! Drives one build or deploy job through `Received → Validated → InProgress
//! → Terminated`. It is the only writer of entity statuses and the only
//! component that confirms audit entries. Once a job has entered
//! `InProgress`, every exit path writes a terminal status.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use deckhand_wire::{BuildJobRequest, DeployJobRequest, DeployPayload, ObjectKind};

use crate::audit::AuditRecorder;
use crate::credentials::CredentialVault;
use crate::errors::DeckhandError;
use crate::filesys::dir::Dir;
use crate::jobs::commands::{apply_commands, delete_commands, image_reference, BuildCommand};
use crate::jobs::fsm::{JobEvent, JobFsm};
use crate::jobs::validate::{validate_build, validate_deploy};
use crate::models::operation::{OperationKind, Subject, SubjectType};
use crate::models::records::{DeploymentKind, DeploymentRecord, ImageRecord};
use crate::models::status::{AppHealth, EntityKey, EntityStatus};
use crate::remote::executor::ExecutionTranscript;
use crate::remote::fanout::{FanOutCoordinator, FanOutResult};
use crate::remote::session::Target;
use crate::remote::sink::{HostLabeled, LineSink};
use crate::store::Store;

/// Why a job did not succeed
#[derive(Error, Debug)]
pub enum JobError {
    /// Refused during validation; nothing was written
    #[error("{0}")]
    Rejected(String),

    /// Ran to completion with at least one failed target
    #[error("{key} failed on {}", .failed_hosts.join(", "))]
    Failed {
        key: EntityKey,
        failed_hosts: Vec<String>,
    },

    /// Raised an error or panicked while in progress
    #[error("{0}")]
    Internal(String),
}

/// A job that succeeded on every target
#[derive(Debug)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub key: EntityKey,
    pub status: EntityStatus,
    pub result: FanOutResult,
}

/// Job controller options
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Server that builds and pushes images
    pub build_server_id: i64,

    /// Registry images are pushed to
    pub registry: String,

    /// Parent of per-job work directories on the build server
    pub build_workdir: String,

    /// Where applied manifests are archived locally; `None` disables it
    pub manifest_dir: Option<Dir>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            build_server_id: 1,
            registry: String::new(),
            build_workdir: "/tmp/deckhand/builds".to_string(),
            manifest_dir: None,
        }
    }
}

/// A job that has entered `InProgress`
struct Running {
    job_id: Uuid,
    app_id: i64,
    key: EntityKey,
    audit_id: Option<Uuid>,
    failure: EntityStatus,
}

pub struct JobController {
    store: Arc<dyn Store>,
    vault: Arc<CredentialVault>,
    fanout: FanOutCoordinator,
    audit: AuditRecorder,
    options: ControllerOptions,
}

impl JobController {
    pub fn new(
        store: Arc<dyn Store>,
        vault: Arc<CredentialVault>,
        fanout: FanOutCoordinator,
        audit: AuditRecorder,
        options: ControllerOptions,
    ) -> Self {
        Self {
            store,
            vault,
            fanout,
            audit,
            options,
        }
    }

    /// Build `request` on the build server and push it to the registry
    pub async fn run_build(
        &self,
        job_id: Uuid,
        user_id: i64,
        request: BuildJobRequest,
        sink: &dyn LineSink,
    ) -> Result<JobOutcome, JobError> {
        let span = info_span!("job", id = %job_id, kind = "build", image = %request.image_name);
        self.build(job_id, user_id, request, sink).instrument(span).await
    }

    /// Apply `request` on each of its servers, in order
    pub async fn run_deploy(
        &self,
        job_id: Uuid,
        user_id: i64,
        request: DeployJobRequest,
        sink: &dyn LineSink,
    ) -> Result<JobOutcome, JobError> {
        let span = info_span!(
            "job",
            id = %job_id,
            kind = "deploy",
            name = %request.deployment_name
        );
        self.deploy(job_id, user_id, request, sink).instrument(span).await
    }

    async fn build(
        &self,
        job_id: Uuid,
        user_id: i64,
        request: BuildJobRequest,
        sink: &dyn LineSink,
    ) -> Result<JobOutcome, JobError> {
        let mut fsm = JobFsm::new();
        if let Err(e) = validate_build(&request) {
            return reject(&mut fsm, e);
        }
        advance(&mut fsm, JobEvent::Accept)?;

        let key = EntityKey::Image {
            name: request.image_name.clone(),
            version: request.version.clone(),
        };
        let subject = Subject {
            id: format!("{}:{}", request.image_name, request.version),
            subject_type: SubjectType::Image,
        };
        let job = self
            .begin(
                &mut fsm,
                job_id,
                user_id,
                request.app_id,
                key,
                subject,
                OperationKind::Build,
                (EntityStatus::Building, EntityStatus::BuildFailure),
            )
            .await?;

        let image_ref = image_reference(
            &self.options.registry,
            &request.image_name,
            &request.version,
        );
        let phase = guarded(self.build_phase(job_id, &request, &image_ref, sink)).await;

        let result = match phase {
            Ok(result) => result,
            Err(message) => return self.abort(&mut fsm, &job, message).await,
        };

        let success = !result.overall_failed;
        let status = if success {
            EntityStatus::BuildSuccess
        } else {
            EntityStatus::BuildFailure
        };

        let now = Utc::now();
        let record = ImageRecord {
            name: request.image_name.clone(),
            version: request.version.clone(),
            app_id: request.app_id,
            url: image_ref,
            status,
            log: result
                .transcripts
                .iter()
                .flat_map(|t| t.output_lines.iter().chain(t.error_lines.iter()).cloned())
                .collect(),
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.store.upsert_image(record).await {
            return self.abort(&mut fsm, &job, format!("Failed to save image record: {}", e)).await;
        }

        self.settle(&mut fsm, job, status, success, result).await
    }

    async fn build_phase(
        &self,
        job_id: Uuid,
        request: &BuildJobRequest,
        image_ref: &str,
        sink: &dyn LineSink,
    ) -> Result<FanOutResult, DeckhandError> {
        let target = self
            .vault
            .resolve(self.store.as_ref(), self.options.build_server_id)
            .await?;

        let command = BuildCommand {
            job_id,
            workdir_base: &self.options.build_workdir,
            repos_url: &request.repos_url,
            branch: &request.branch,
            dockerfile: request.dockerfile.as_deref(),
            image_ref,
        }
        .render();

        Ok(self
            .fanout
            .run_on_targets(std::slice::from_ref(&target), |_| vec![command.clone()], false, sink)
            .await)
    }

    async fn deploy(
        &self,
        job_id: Uuid,
        user_id: i64,
        request: DeployJobRequest,
        sink: &dyn LineSink,
    ) -> Result<JobOutcome, JobError> {
        let mut fsm = JobFsm::new();
        if let Err(e) = validate_deploy(self.store.as_ref(), &request).await {
            return reject(&mut fsm, e);
        }
        advance(&mut fsm, JobEvent::Accept)?;

        let (key, subject_type) = match &request.payload {
            DeployPayload::Manifest {
                object: ObjectKind::Service,
                ..
            } => (
                EntityKey::Service {
                    app_id: request.app_id,
                    name: request.deployment_name.clone(),
                },
                SubjectType::Service,
            ),
            _ => (
                EntityKey::Deployment {
                    app_id: request.app_id,
                    name: request.deployment_name.clone(),
                },
                SubjectType::Deployment,
            ),
        };
        let subject = Subject {
            id: format!("{}:{}", request.app_id, request.deployment_name),
            subject_type,
        };
        let job = self
            .begin(
                &mut fsm,
                job_id,
                user_id,
                request.app_id,
                key,
                subject,
                OperationKind::Deploy,
                (EntityStatus::Deploying, EntityStatus::DeployFailure),
            )
            .await?;

        let phase = guarded(self.deploy_phase(&request, sink)).await;

        let result = match phase {
            Ok(result) => result,
            Err(message) => return self.abort(&mut fsm, &job, message).await,
        };

        let success = !result.overall_failed;
        let status = if success {
            EntityStatus::DeploySuccess
        } else {
            EntityStatus::DeployFailure
        };

        let now = Utc::now();
        let (kind, payload) = match &request.payload {
            DeployPayload::Manifest { yaml, .. } => {
                (DeploymentKind::Kubernetes, Some(yaml.clone()))
            }
            container => (
                DeploymentKind::Docker,
                serde_json::to_string(container).ok(),
            ),
        };
        let record = DeploymentRecord {
            name: request.deployment_name.clone(),
            app_id: request.app_id,
            kind,
            status,
            server_ids: request.server_ids.clone(),
            payload,
            log: result.to_log(),
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.store.upsert_deployment(record).await {
            return self
                .abort(&mut fsm, &job, format!("Failed to save deployment record: {}", e))
                .await;
        }

        self.settle(&mut fsm, job, status, success, result).await
    }

    async fn deploy_phase(
        &self,
        request: &DeployJobRequest,
        sink: &dyn LineSink,
    ) -> Result<FanOutResult, DeckhandError> {
        let targets = self.resolve_all(&request.server_ids).await?;

        let removal = match self.replaced(request).await? {
            Some(old) => Some(self.remove_replaced(request, &old, sink).await),
            None => None,
        };

        if let Some(dir) = &self.options.manifest_dir {
            if let DeployPayload::Manifest { yaml, .. } = &request.payload {
                let file = dir.file(&format!(
                    "{}_{}.yaml",
                    request.app_name, request.deployment_name
                ));
                file.write_string(yaml).await?;
                info!("Manifest archived at {}", file.path().display());
            }
        }

        let mut result = self
            .fanout
            .run_on_targets(
                &targets,
                |_| apply_commands(&request.app_name, &request.deployment_name, &request.payload),
                true,
                sink,
            )
            .await;

        if let Some(removal) = removal {
            fold_removal(&mut result, removal);
        }
        Ok(result)
    }

    /// The record being renamed away from, if it still exists
    async fn replaced(
        &self,
        request: &DeployJobRequest,
    ) -> Result<Option<DeploymentRecord>, DeckhandError> {
        match &request.replaces {
            Some(old) if *old != request.deployment_name => {
                self.store.deployment(request.app_id, old).await
            }
            _ => Ok(None),
        }
    }

    /// Delete the remote objects of `old`. Failures, including servers that
    /// no longer resolve, end up in the transcript and never stop the apply;
    /// the record is dropped only when every host confirmed the removal.
    async fn remove_replaced(
        &self,
        request: &DeployJobRequest,
        old: &DeploymentRecord,
        sink: &dyn LineSink,
    ) -> FanOutResult {
        info!("Removing replaced deployment {}", old.name);
        let mut targets = Vec::with_capacity(old.server_ids.len());
        let mut unresolved = Vec::new();
        for id in &old.server_ids {
            match self.vault.resolve(self.store.as_ref(), *id).await {
                Ok(target) => targets.push(target),
                Err(e) => {
                    let label = format!("server {}", id);
                    let line = format!("Cannot remove {}: {}", old.name, e);
                    HostLabeled::new(&label, sink).push(&line);
                    unresolved.push(ExecutionTranscript::not_run(&label, line));
                }
            }
        }

        let mut removal = self
            .fanout
            .run_on_targets(
                &targets,
                |_| delete_commands(&old.name, &request.payload),
                true,
                sink,
            )
            .await;
        removal.overall_failed |= !unresolved.is_empty();
        removal.transcripts.extend(unresolved);

        if removal.overall_failed {
            warn!("Removal of {} failed, applying {} anyway", old.name, request.deployment_name);
        } else if let Err(e) = self.store.remove_deployment(old.app_id, &old.name).await {
            let line = format!("Failed to drop record of {}: {}", old.name, e);
            error!("{}", line);
            sink.push(&line);
            removal
                .transcripts
                .push(ExecutionTranscript::not_run(&old.name, line));
            removal.overall_failed = true;
        }
        removal
    }

    async fn resolve_all(&self, server_ids: &[i64]) -> Result<Vec<Target>, DeckhandError> {
        let mut targets = Vec::with_capacity(server_ids.len());
        for id in server_ids {
            targets.push(self.vault.resolve(self.store.as_ref(), *id).await?);
        }
        Ok(targets)
    }

    /// Schedule the audit entry and write the in-progress status
    #[allow(clippy::too_many_arguments)]
    async fn begin(
        &self,
        fsm: &mut JobFsm,
        job_id: Uuid,
        user_id: i64,
        app_id: i64,
        key: EntityKey,
        subject: Subject,
        operation: OperationKind,
        (in_progress, failure): (EntityStatus, EntityStatus),
    ) -> Result<Running, JobError> {
        let audit_id = match self.audit.start(user_id, subject, operation) {
            Ok(id) => Some(id),
            Err(e) => {
                error!("Audit entry not recorded: {}", e);
                None
            }
        };

        self.store
            .set_status(&key, in_progress)
            .await
            .map_err(|e| JobError::Internal(format!("Failed to write status of {}: {}", key, e)))?;
        advance(fsm, JobEvent::Start)?;
        info!("{} is {}", key, in_progress);

        Ok(Running {
            job_id,
            app_id,
            key,
            audit_id,
            failure,
        })
    }

    /// Terminal bookkeeping of a job whose remote work ran to completion
    async fn settle(
        &self,
        fsm: &mut JobFsm,
        job: Running,
        status: EntityStatus,
        success: bool,
        result: FanOutResult,
    ) -> Result<JobOutcome, JobError> {
        let health = if success {
            AppHealth::Normal
        } else {
            AppHealth::Abnormal
        };
        self.write_terminal(&job.key, status, job.app_id, health).await?;

        if !success {
            let failed_hosts: Vec<String> = result
                .transcripts
                .iter()
                .filter(|t| t.failed)
                .map(|t| t.target.clone())
                .collect();
            advance(fsm, JobEvent::Fail(failed_hosts.join(", ")))?;
            return Err(JobError::Failed {
                key: job.key,
                failed_hosts,
            });
        }

        if let Some(id) = job.audit_id {
            if let Err(e) = self.audit.finish(id).await {
                error!("Audit entry {} not confirmed: {}", id, e);
            }
        }
        advance(fsm, JobEvent::Succeed)?;

        Ok(JobOutcome {
            job_id: job.job_id,
            key: job.key,
            status,
            result,
        })
    }

    /// Terminal bookkeeping of a job that raised an error while in progress.
    /// The audit entry is left unconfirmed.
    async fn abort(
        &self,
        fsm: &mut JobFsm,
        job: &Running,
        message: String,
    ) -> Result<JobOutcome, JobError> {
        error!("{} aborted: {}", job.key, message);
        self.write_terminal(&job.key, job.failure, job.app_id, AppHealth::Abnormal)
            .await?;
        advance(fsm, JobEvent::Fail(message.clone()))?;
        Err(JobError::Internal(message))
    }

    async fn write_terminal(
        &self,
        key: &EntityKey,
        status: EntityStatus,
        app_id: i64,
        health: AppHealth,
    ) -> Result<(), JobError> {
        self.store
            .set_status(key, status)
            .await
            .map_err(|e| JobError::Internal(format!("Failed to write status of {}: {}", key, e)))?;
        info!("{} is {}", key, status);

        if let Err(e) = self.store.set_app_health(app_id, health).await {
            warn!("Health of application {} not updated: {}", app_id, e);
        }
        Ok(())
    }
}

fn reject(fsm: &mut JobFsm, error: DeckhandError) -> Result<JobOutcome, JobError> {
    let message = match error {
        DeckhandError::ValidationError(message) => message,
        other => other.to_string(),
    };
    warn!("Request rejected: {}", message);
    advance(fsm, JobEvent::Reject(message.clone()))?;
    Err(JobError::Rejected(message))
}

fn advance(fsm: &mut JobFsm, event: JobEvent) -> Result<(), JobError> {
    fsm.process(event).map_err(JobError::Internal)
}

/// Run the in-progress phase, turning errors and panics into a message
async fn guarded<F>(phase: F) -> Result<FanOutResult, String>
where
    F: Future<Output = Result<FanOutResult, DeckhandError>>,
{
    match AssertUnwindSafe(phase).catch_unwind().await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("Job panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("Job panicked: {}", message)
    } else {
        "Job panicked".to_string()
    }
}

/// Prepend the removal transcripts to the apply transcripts of the same host
fn fold_removal(result: &mut FanOutResult, removal: FanOutResult) {
    for mut removed in removal.transcripts {
        match result
            .transcripts
            .iter_mut()
            .find(|t| t.target == removed.target)
        {
            Some(applied) => {
                let applied_now = std::mem::take(applied);
                removed.absorb(applied_now);
                *applied = removed;
            }
            None => result.transcripts.push(removed),
        }
    }
    result.overall_failed = result.transcripts.iter().any(|t| t.failed);
}
