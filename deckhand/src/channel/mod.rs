//! Live channel adapter.
//!
//! One channel carries one job: the client sends a single request message,
//! receives every output line as it is produced, then exactly one `success`
//! or `failure` sentinel, after which the channel is closed.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use deckhand_wire::{BuildJobRequest, DeployJobRequest, FAILURE, SUCCESS};

use crate::jobs::{JobController, JobError, JobOutcome};
use crate::remote::sink::LineSink;

/// Message queued for the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Forwards streamed lines to the client. Lines pushed after the client went
/// away are dropped; the job keeps running.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }

    fn send(&self, message: Outbound) {
        if self.tx.send(message).is_err() {
            debug!("Client channel closed, message dropped");
        }
    }
}

impl LineSink for ChannelSink {
    fn push(&self, line: &str) {
        self.send(Outbound::Text(line.to_string()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Build,
    Deploy,
}

enum JobRequest {
    Build(BuildJobRequest),
    Deploy(DeployJobRequest),
}

/// Runs channel sessions against the job controller, at most
/// `max_concurrent` jobs at a time
pub struct LiveChannel {
    controller: Arc<JobController>,
    pool: Arc<Semaphore>,
}

impl LiveChannel {
    pub fn new(controller: Arc<JobController>, max_concurrent: usize) -> Self {
        Self {
            controller,
            pool: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Serve one channel session until its job terminates.
    ///
    /// Always ends with one sentinel followed by `Outbound::Close`.
    pub async fn serve<I>(
        &self,
        kind: JobKind,
        user_id: i64,
        mut inbound: I,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) where
        I: Stream<Item = String> + Unpin,
    {
        let sink = ChannelSink::new(outbound);
        let job_id = Uuid::new_v4();

        // build clients track their job by this token
        if kind == JobKind::Build {
            sink.send(Outbound::Text(job_id.to_string()));
        }

        let result = match inbound.next().await {
            Some(message) => self.dispatch(kind, job_id, user_id, &message, &sink).await,
            None => Err(JobError::Rejected(
                "Channel closed before a request was received".to_string(),
            )),
        };

        match result {
            Ok(outcome) => {
                info!(job = %job_id, "{} is {}", outcome.key, outcome.status);
                sink.send(Outbound::Text(SUCCESS.to_string()));
            }
            Err(JobError::Failed { key, failed_hosts }) => {
                info!(job = %job_id, "{} failed on {:?}", key, failed_hosts);
                sink.send(Outbound::Text(FAILURE.to_string()));
            }
            Err(e) => {
                warn!(job = %job_id, "Job did not run to completion: {}", e);
                sink.send(Outbound::Text(e.to_string()));
                sink.send(Outbound::Text(FAILURE.to_string()));
            }
        }
        sink.send(Outbound::Close);
    }

    async fn dispatch(
        &self,
        kind: JobKind,
        job_id: Uuid,
        user_id: i64,
        message: &str,
        sink: &ChannelSink,
    ) -> Result<JobOutcome, JobError> {
        let request = parse_request(kind, message)?;

        let permit = self
            .pool
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| JobError::Internal("Worker pool is closed".to_string()))?;

        let controller = self.controller.clone();
        let sink = sink.clone();
        let task = tokio::spawn(async move {
            let _permit = permit;
            match request {
                JobRequest::Build(request) => {
                    controller.run_build(job_id, user_id, request, &sink).await
                }
                JobRequest::Deploy(request) => {
                    controller.run_deploy(job_id, user_id, request, &sink).await
                }
            }
        });

        task.await
            .map_err(|e| JobError::Internal(format!("Job task failed: {}", e)))?
    }
}

fn parse_request(kind: JobKind, message: &str) -> Result<JobRequest, JobError> {
    let invalid = |e: serde_json::Error| JobError::Rejected(format!("Invalid request: {}", e));
    match kind {
        JobKind::Build => serde_json::from_str(message).map(JobRequest::Build).map_err(invalid),
        JobKind::Deploy => serde_json::from_str(message).map(JobRequest::Deploy).map_err(invalid),
    }
}
