//! Runs a job's command on each of its targets, one after another

use std::sync::Arc;

use tracing::{info, warn};

use crate::remote::executor::{ExecutionTranscript, StreamingExecutor};
use crate::remote::session::{Connector, RemoteSession, SessionError, Target};
use crate::remote::sink::{HostLabeled, LineSink};

/// Per-host transcripts in target order
#[derive(Debug, Default)]
pub struct FanOutResult {
    pub transcripts: Vec<ExecutionTranscript>,
    pub overall_failed: bool,
}

impl FanOutResult {
    pub fn get(&self, host: &str) -> Option<&ExecutionTranscript> {
        self.transcripts.iter().find(|t| t.target == host)
    }

    /// `{"<host>": {"out": [...], "err": [...]}}`
    pub fn to_log(&self) -> serde_json::Value {
        let map = self
            .transcripts
            .iter()
            .map(|t| (t.target.clone(), t.to_log()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

pub struct FanOutCoordinator {
    connector: Arc<dyn Connector>,
    executor: StreamingExecutor,
}

impl FanOutCoordinator {
    pub fn new(connector: Arc<dyn Connector>, executor: StreamingExecutor) -> Self {
        Self {
            connector,
            executor,
        }
    }

    /// Run the commands `build` yields for each target, sequentially. A
    /// target stops at its first failing command.
    ///
    /// A target that fails, including one that cannot be reached, is recorded
    /// and the remaining targets still run. With `label_hosts` every streamed
    /// line is prefixed with its host.
    pub async fn run_on_targets<F>(
        &self,
        targets: &[Target],
        build: F,
        label_hosts: bool,
        sink: &dyn LineSink,
    ) -> FanOutResult
    where
        F: Fn(&Target) -> Vec<String>,
    {
        let mut result = FanOutResult::default();

        for target in targets {
            let commands = build(target);
            let labeled = HostLabeled::new(target.label(), sink);
            let target_sink: &dyn LineSink = if label_hosts { &labeled } else { sink };

            let transcript = match self.run_on_target(target, &commands, target_sink).await {
                Ok(transcript) => transcript,
                Err(e) => {
                    warn!(host = %target.host, "Target failed: {}", e);
                    let transcript = ExecutionTranscript::unreachable(target.label(), &e);
                    for line in &transcript.error_lines {
                        target_sink.push(line);
                    }
                    transcript
                }
            };

            info!(
                host = %target.host,
                failed = transcript.failed,
                "Target finished"
            );
            result.overall_failed |= transcript.failed;
            result.transcripts.push(transcript);
        }

        result
    }

    async fn run_on_target(
        &self,
        target: &Target,
        commands: &[String],
        sink: &dyn LineSink,
    ) -> Result<ExecutionTranscript, SessionError> {
        let mut session = self.connector.open(target).await?;
        let transcript = self.run_commands(session.as_mut(), target, commands, sink).await;
        session.close().await;
        Ok(transcript)
    }

    /// A channel error ends the target but keeps what earlier commands printed
    async fn run_commands(
        &self,
        session: &mut dyn RemoteSession,
        target: &Target,
        commands: &[String],
        sink: &dyn LineSink,
    ) -> ExecutionTranscript {
        let mut transcript = ExecutionTranscript {
            target: target.label().to_string(),
            ..Default::default()
        };
        for command in commands {
            let step = match self.executor.run(session, target.label(), command, sink).await {
                Ok(step) => step,
                Err(e) => {
                    warn!(host = %target.host, "Command failed to run: {}", e);
                    let line = e.to_string();
                    sink.push(&line);
                    transcript.error_lines.push(line);
                    transcript.failed = true;
                    break;
                }
            };
            let failed = step.failed;
            transcript.absorb(step);
            if failed {
                break;
            }
        }
        transcript
    }
}
